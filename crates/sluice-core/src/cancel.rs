//! Cancel flag for cooperative cancellation of long-running jobs.
//!
//! A `CancelFlag` is a shared atomic boolean. Any thread may set it; the job
//! polls it at well-defined points (before each transfer call / chunk) and
//! stops there. Nothing is interrupted mid-chunk.

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Returned by [`CancelFlag::check`] once cancellation has been requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

impl fmt::Display for Cancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operation cancelled")
    }
}

impl std::error::Error for Cancelled {}

/// Shared, clonable cancellation flag.
///
/// Clones share state: cancelling one cancels all of them.
#[derive(Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation. Safe to call from any thread, any number of times.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// `Err(Cancelled)` if cancellation was requested.
    ///
    /// ```ignore
    /// while copied < total {
    ///     flag.check()?;
    ///     // ... next chunk ...
    /// }
    /// ```
    #[inline]
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for CancelFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelFlag")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_basic_cancel() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        assert!(flag.check().is_ok());

        flag.cancel();
        assert!(flag.is_cancelled());
        assert_eq!(flag.check(), Err(Cancelled));
    }

    #[test]
    fn test_clones_share_state() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        other.cancel();
        other.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_cancel_from_other_thread() {
        let flag = CancelFlag::new();
        let remote = flag.clone();
        thread::spawn(move || remote.cancel()).join().unwrap();
        assert!(flag.is_cancelled());
    }
}
