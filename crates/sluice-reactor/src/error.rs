//! Reactor error types.
//!
//! Only loop-level failures surface here. A single connection's I/O error
//! never becomes a `ReactorError`: it closes that connection and is logged.

use std::fmt;
use std::io;
use std::net::SocketAddr;

#[derive(Debug)]
pub enum ReactorError {
    /// Binding the listening socket failed.
    Bind(SocketAddr, io::Error),
    /// Configuring the listener (non-blocking, local_addr) failed.
    Listener(io::Error),
    /// `epoll_create1` failed.
    Poller(io::Error),
    /// `eventfd` creation or registration failed.
    Waker(io::Error),
    /// Registering the listener with the poller failed.
    Register(io::Error),
    /// `epoll_wait` failed with something other than `EINTR`.
    Poll(io::Error),
    /// The reaper thread could not be started.
    ReaperSpawn(io::Error),
}

impl fmt::Display for ReactorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind(addr, e) => write!(f, "bind {}: {}", addr, e),
            Self::Listener(e) => write!(f, "listener setup: {}", e),
            Self::Poller(e) => write!(f, "epoll setup: {}", e),
            Self::Waker(e) => write!(f, "eventfd waker: {}", e),
            Self::Register(e) => write!(f, "register listener: {}", e),
            Self::Poll(e) => write!(f, "epoll_wait: {}", e),
            Self::ReaperSpawn(e) => write!(f, "spawn reaper: {}", e),
        }
    }
}

impl std::error::Error for ReactorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind(_, e)
            | Self::Listener(e)
            | Self::Poller(e)
            | Self::Waker(e)
            | Self::Register(e)
            | Self::Poll(e)
            | Self::ReaperSpawn(e) => Some(e),
        }
    }
}

pub type ReactorResult<T> = std::result::Result<T, ReactorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let e = ReactorError::Poll(io::Error::from_raw_os_error(libc::EBADF));
        assert!(format!("{}", e).starts_with("epoll_wait: "));

        let addr: SocketAddr = "127.0.0.1:80".parse().unwrap();
        let e = ReactorError::Bind(addr, io::ErrorKind::AddrInUse.into());
        assert!(format!("{}", e).starts_with("bind 127.0.0.1:80: "));
    }

    #[test]
    fn test_error_source() {
        let e = ReactorError::Waker(io::ErrorKind::Other.into());
        assert!(e.source().is_some());
    }
}
