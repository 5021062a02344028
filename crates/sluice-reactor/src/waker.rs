//! `Waker` - eventfd used to interrupt a blocked `epoll_wait`.
//!
//! Coalescing: several `wake()` calls before the poller drains the counter
//! produce a single wakeup (eventfd counter semantics). `wake()` is a single
//! `write(2)`, so it is async-signal-safe when called through the raw fd.

use std::io;
use std::os::unix::io::RawFd;

pub struct Waker {
    fd: RawFd,
}

impl Waker {
    /// Create a new non-blocking, close-on-exec eventfd.
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self { fd })
    }

    /// Raw descriptor, for registering with epoll or waking from a signal
    /// handler.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Bump the counter so the poller returns.
    pub fn wake(&self) -> io::Result<()> {
        wake_fd(self.fd)
    }

    /// Reset the counter to zero. Returns the number of coalesced wakes.
    pub fn drain(&self) -> u64 {
        let mut val: u64 = 0;
        let ret = unsafe {
            libc::read(
                self.fd,
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        // EAGAIN: nothing pending.
        if ret < 0 {
            0
        } else {
            val
        }
    }
}

/// Write 1 to an eventfd. Only calls `write(2)`.
pub fn wake_fd(fd: RawFd) -> io::Result<()> {
    let val: u64 = 1;
    let ret = unsafe {
        libc::write(
            fd,
            &val as *const u64 as *const libc::c_void,
            std::mem::size_of::<u64>(),
        )
    };
    if ret < 0 {
        let err = io::Error::last_os_error();
        // EAGAIN means the counter is saturated, so a wakeup is already
        // pending.
        if err.raw_os_error() == Some(libc::EAGAIN) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

impl Drop for Waker {
    fn drop(&mut self) {
        if self.fd >= 0 {
            unsafe {
                libc::close(self.fd);
            }
            self.fd = -1;
        }
    }
}

impl std::fmt::Debug for Waker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waker").field("fd", &self.fd).finish()
    }
}
