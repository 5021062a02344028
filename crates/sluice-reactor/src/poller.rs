//! Linux `epoll` readiness multiplexer.
//!
//! The poller owns:
//! - an `epoll` instance,
//! - a [`Waker`] eventfd registered under [`WAKE_TOKEN`],
//! - a reusable buffer for the raw kernel events.
//!
//! `poll()` is the only blocking call in the event loop. It is always given
//! a bounded timeout so the loop re-checks its running flag even when no
//! wakeup arrives.

use crate::waker::Waker;

use libc::{
    epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
};
use std::fmt;
use std::io;
use std::ops::BitOr;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Identifies a registered descriptor in returned events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Token(pub u64);

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reserved for the internal eventfd. Never surfaces from `poll()`.
pub const WAKE_TOKEN: Token = Token(u64::MAX);

/// Reserved for the listening socket.
pub const LISTENER_TOKEN: Token = Token(u64::MAX - 1);

/// Readiness interest set. Exactly one set is armed per descriptor.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Interest(u8);

impl Interest {
    pub const READABLE: Interest = Interest(0b01);
    pub const WRITABLE: Interest = Interest(0b10);

    #[inline]
    pub fn is_readable(self) -> bool {
        self.0 & Self::READABLE.0 != 0
    }

    #[inline]
    pub fn is_writable(self) -> bool {
        self.0 & Self::WRITABLE.0 != 0
    }

    fn to_epoll(self) -> u32 {
        let mut flags = 0;
        if self.is_readable() {
            flags |= EPOLLIN;
        }
        if self.is_writable() {
            flags |= EPOLLOUT;
        }
        flags as u32
    }
}

impl BitOr for Interest {
    type Output = Interest;

    fn bitor(self, rhs: Interest) -> Interest {
        Interest(self.0 | rhs.0)
    }
}

impl fmt::Debug for Interest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.is_readable(), self.is_writable()) {
            (true, true) => write!(f, "READABLE | WRITABLE"),
            (true, false) => write!(f, "READABLE"),
            (false, true) => write!(f, "WRITABLE"),
            (false, false) => write!(f, "NONE"),
        }
    }
}

/// One readiness notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Event {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// `EPOLLERR`: a pending socket error.
    pub error: bool,
    /// `EPOLLHUP`: both directions are shut.
    pub hangup: bool,
}

impl Event {
    fn from_raw(raw: &epoll_event) -> Self {
        // `epoll_event` is packed on x86_64; copy fields out by value.
        let bits = raw.events;
        let token = raw.u64;
        Self {
            token: Token(token),
            readable: bits & EPOLLIN as u32 != 0,
            writable: bits & EPOLLOUT as u32 != 0,
            error: bits & EPOLLERR as u32 != 0,
            hangup: bits & EPOLLHUP as u32 != 0,
        }
    }
}

pub struct Poller {
    epoll: RawFd,
    events: Vec<epoll_event>,
    waker: Arc<Waker>,
}

impl Poller {
    /// Create the epoll instance and its wake eventfd.
    ///
    /// `capacity` bounds the number of events returned per `poll()`.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Self::with_waker(capacity, Arc::new(Waker::new()?))
    }

    /// Like [`Poller::new`], registering an existing waker.
    pub fn with_waker(capacity: usize, waker: Arc<Waker>) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        // Construct immediately so Drop closes the epoll fd on later errors.
        let poller = Self {
            epoll,
            events: vec![epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            waker,
        };
        let wake_fd = poller.waker.fd();
        poller.ctl(EPOLL_CTL_ADD, wake_fd, WAKE_TOKEN, Interest::READABLE)?;
        Ok(poller)
    }

    /// Shared handle to the wake eventfd.
    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    pub fn register(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_ADD, fd, token, interest)
    }

    /// Replace the interest set of an already registered descriptor.
    pub fn reregister(&self, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        self.ctl(EPOLL_CTL_MOD, fd, token, interest)
    }

    pub fn deregister(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: Token, interest: Interest) -> io::Result<()> {
        let mut event = epoll_event {
            events: interest.to_epoll(),
            u64: token.0,
        };
        let rc = unsafe { epoll_ctl(self.epoll, op, fd, &mut event) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wait for readiness.
    ///
    /// Blocks until a descriptor is ready, the waker fires, or `timeout`
    /// expires (`None` blocks indefinitely). `events` is cleared first and
    /// receives every non-wake event. `EINTR` is an empty, successful poll.
    pub fn poll(&mut self, events: &mut Vec<Event>, timeout: Option<Duration>) -> io::Result<usize> {
        events.clear();

        let timeout_ms = match timeout {
            Some(t) => t.as_millis().min(i32::MAX as u128) as i32,
            None => -1,
        };

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.len() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }

        for raw in &self.events[..n as usize] {
            let event = Event::from_raw(raw);
            if event.token == WAKE_TOKEN {
                self.waker.drain();
                continue;
            }
            events.push(event);
        }

        Ok(events.len())
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}
