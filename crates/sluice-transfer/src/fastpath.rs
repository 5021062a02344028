//! Direct (kernel-assisted) transfer primitives.
//!
//! A fast path moves bytes from a source descriptor at an explicit offset to
//! a destination descriptor without staging them in user memory. Returning
//! `Ok(0)` means "not available for this pair"; the engine then falls back to
//! buffered copying. Errors are treated the same way.

use std::io;
use std::os::fd::BorrowedFd;

pub trait FastPath {
    /// Move up to `count` bytes starting at `offset` in `src` to `dst`.
    ///
    /// The source's own file position is left alone. The destination's
    /// position advances by the bytes written.
    fn transfer(
        &mut self,
        src: BorrowedFd<'_>,
        dst: BorrowedFd<'_>,
        offset: u64,
        count: usize,
    ) -> io::Result<usize>;

    fn name(&self) -> &'static str;
}

/// `sendfile(2)` where the platform has it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sendfile;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        impl FastPath for Sendfile {
            fn transfer(
                &mut self,
                src: BorrowedFd<'_>,
                dst: BorrowedFd<'_>,
                offset: u64,
                count: usize,
            ) -> io::Result<usize> {
                let mut off = libc::off_t::try_from(offset)
                    .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
                nix::sys::sendfile::sendfile(dst, src, Some(&mut off), count).map_err(io::Error::from)
            }

            fn name(&self) -> &'static str {
                "sendfile"
            }
        }
    } else {
        impl FastPath for Sendfile {
            fn transfer(
                &mut self,
                _src: BorrowedFd<'_>,
                _dst: BorrowedFd<'_>,
                _offset: u64,
                _count: usize,
            ) -> io::Result<usize> {
                Ok(0)
            }

            fn name(&self) -> &'static str {
                "unavailable"
            }
        }
    }
}

/// Always unavailable; forces the buffered path.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

impl FastPath for Disabled {
    fn transfer(
        &mut self,
        _src: BorrowedFd<'_>,
        _dst: BorrowedFd<'_>,
        _offset: u64,
        _count: usize,
    ) -> io::Result<usize> {
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "disabled"
    }
}

impl<F: FastPath + ?Sized> FastPath for &mut F {
    fn transfer(
        &mut self,
        src: BorrowedFd<'_>,
        dst: BorrowedFd<'_>,
        offset: u64,
        count: usize,
    ) -> io::Result<usize> {
        (**self).transfer(src, dst, offset, count)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

impl<F: FastPath + ?Sized> FastPath for Box<F> {
    fn transfer(
        &mut self,
        src: BorrowedFd<'_>,
        dst: BorrowedFd<'_>,
        offset: u64,
        count: usize,
    ) -> io::Result<usize> {
        (**self).transfer(src, dst, offset, count)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::os::fd::AsFd;

    fn temp_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sluice-fastpath-{}-{}", std::process::id(), tag))
    }

    #[test]
    fn test_sendfile_at_offset() {
        let src_path = temp_path("src");
        let dst_path = temp_path("dst");
        fs::write(&src_path, b"0123456789").unwrap();

        let src = File::open(&src_path).unwrap();
        let mut dst = File::create(&dst_path).unwrap();

        let n = Sendfile.transfer(src.as_fd(), dst.as_fd(), 4, 3).unwrap();
        assert_eq!(n, 3);
        dst.flush().unwrap();
        assert_eq!(fs::read(&dst_path).unwrap(), b"456".to_vec());

        // Source position untouched.
        let mut src = src;
        assert_eq!(src.seek(SeekFrom::Current(0)).unwrap(), 0);
        let mut first = [0u8; 1];
        src.read_exact(&mut first).unwrap();
        assert_eq!(&first, b"0");

        fs::remove_file(&src_path).ok();
        fs::remove_file(&dst_path).ok();
    }

    #[test]
    fn test_sendfile_at_eof_returns_zero() {
        let src_path = temp_path("eof-src");
        let dst_path = temp_path("eof-dst");
        fs::write(&src_path, b"abc").unwrap();
        let src = File::open(&src_path).unwrap();
        let dst = File::create(&dst_path).unwrap();

        assert_eq!(Sendfile.transfer(src.as_fd(), dst.as_fd(), 3, 10).unwrap(), 0);

        fs::remove_file(&src_path).ok();
        fs::remove_file(&dst_path).ok();
    }

    #[test]
    fn test_disabled() {
        let src_path = temp_path("dis");
        fs::write(&src_path, b"abc").unwrap();
        let f = File::open(&src_path).unwrap();
        assert_eq!(Disabled.transfer(f.as_fd(), f.as_fd(), 0, 3).unwrap(), 0);
        fs::remove_file(&src_path).ok();
    }
}
