//! Idle connection reaper
//!
//! Single thread that periodically scans the registry and force-closes
//! connections idle past their threshold.
//!
//! # Design
//!
//! The reaper thread:
//! 1. Takes `now` and evicts every connection whose idle time exceeds the
//!    threshold for its state
//! 2. Drops the evicted connections outside the registry lock, which closes
//!    their descriptors (epoll forgets closed descriptors on its own)
//! 3. Parks until the next tick or until shutdown unparks it
//!
//! The loop is never notified. A connection the reaper closed simply stops
//! appearing in the registry, and late events for its token are ignored.

use crate::connection::{Channel, CloseReason, ConnState, Connection};
use crate::registry::Registry;

use sluice_core::{kdebug, kinfo};

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Idle thresholds per connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePolicy {
    /// No complete request yet.
    pub read_timeout: Duration,
    /// Response staged but not fully written.
    pub write_timeout: Duration,
}

impl IdlePolicy {
    pub fn new(read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            read_timeout,
            write_timeout,
        }
    }

    /// One threshold for every state.
    pub fn uniform(timeout: Duration) -> Self {
        Self::new(timeout, timeout)
    }

    /// Threshold that applies to `state`. A closed connection is always due.
    pub fn threshold(&self, state: ConnState) -> Duration {
        match state {
            ConnState::AwaitingRequest => self.read_timeout,
            ConnState::RequestComplete | ConnState::SendingResponse => self.write_timeout,
            ConnState::Closed => Duration::ZERO,
        }
    }

    pub fn is_expired<C: Channel>(&self, conn: &Connection<C>, now: Instant) -> bool {
        conn.state() == ConnState::Closed || conn.idle_for(now) > self.threshold(conn.state())
    }
}

/// Configuration for the reaper thread
#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Time between scans
    /// Default: 1s
    pub interval: Duration,

    pub policy: IdlePolicy,

    /// Thread name
    /// Default: "sluice-reaper"
    pub thread_name: String,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            policy: IdlePolicy::uniform(Duration::from_secs(3)),
            thread_name: "sluice-reaper".into(),
        }
    }
}

/// Statistics from reaper thread execution
#[derive(Debug, Clone, Default)]
pub struct ReaperStats {
    /// Completed scans
    pub ticks: u64,

    /// Connections force-closed
    pub evicted: u64,

    /// Total time spent scanning
    pub scan_time: Duration,
}

/// Handle to a running reaper thread
///
/// Dropping the handle stops the thread and waits for it.
pub struct ReaperHandle {
    handle: Option<JoinHandle<ReaperStats>>,
    shutdown: Arc<AtomicBool>,
}

impl ReaperHandle {
    /// Request shutdown and wait for the reaper thread to exit
    pub fn shutdown(mut self) -> ReaperStats {
        self.stop().unwrap_or_default()
    }

    /// Request shutdown without waiting
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn stop(&mut self) -> Option<ReaperStats> {
        self.request_shutdown();
        // A panicked reaper has no stats to report.
        self.handle.take().and_then(|h| h.join().ok())
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Spawn the reaper thread over `registry`.
pub fn spawn_reaper<C>(registry: Arc<Registry<C>>, config: ReaperConfig) -> io::Result<ReaperHandle>
where
    C: Channel + Send + 'static,
{
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    let handle = thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || reaper_loop(registry, shutdown_clone, config))?;

    Ok(ReaperHandle {
        handle: Some(handle),
        shutdown,
    })
}

/// One scan at `now`. Returns the number of evicted connections.
pub fn reap_once<C: Channel>(registry: &Registry<C>, policy: &IdlePolicy, now: Instant) -> usize {
    let evicted = registry.evict_where(CloseReason::IdleTimeout, |c| policy.is_expired(c, now));
    for conn in &evicted {
        kdebug!(
            "reaper: evicted conn {} after {:?} idle ({:?})",
            conn.token(),
            conn.idle_for(now),
            conn.state()
        );
    }
    // Descriptors close here, outside the registry lock.
    evicted.len()
}

/// Main reaper loop
fn reaper_loop<C: Channel>(
    registry: Arc<Registry<C>>,
    shutdown: Arc<AtomicBool>,
    config: ReaperConfig,
) -> ReaperStats {
    let mut stats = ReaperStats::default();
    let mut next_tick = Instant::now() + config.interval;

    while !shutdown.load(Ordering::Acquire) {
        let now = Instant::now();
        if now < next_tick {
            // Spurious unparks are fine; the deadline is re-checked.
            thread::park_timeout(next_tick - now);
            continue;
        }

        let evicted = reap_once(&registry, &config.policy, now);
        if evicted > 0 {
            kinfo!("reaper: evicted {} idle connection(s)", evicted);
        }

        stats.ticks += 1;
        stats.evicted += evicted as u64;
        stats.scan_time += now.elapsed();
        next_tick = now + config.interval;
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::BufferPool;
    use std::io::{Read, Write};

    struct Idle;

    impl Read for Idle {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
    }

    impl Write for Idle {
        fn write(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(io::ErrorKind::WouldBlock.into())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Channel for Idle {
        fn shutdown_both(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn registry_with(ages: &[Duration], now: Instant) -> Registry<Idle> {
        let pool = Arc::new(BufferPool::new(16, 8));
        let reg = Registry::new();
        for age in ages {
            let token = reg.next_token();
            reg.insert(Connection::new(token, Idle, pool.clone(), 64, now - *age));
        }
        reg
    }

    #[test]
    fn test_threshold_per_state() {
        let p = IdlePolicy::new(Duration::from_secs(3), Duration::from_secs(7));
        assert_eq!(p.threshold(ConnState::AwaitingRequest), Duration::from_secs(3));
        assert_eq!(p.threshold(ConnState::SendingResponse), Duration::from_secs(7));
        assert_eq!(p.threshold(ConnState::RequestComplete), Duration::from_secs(7));
        assert_eq!(p.threshold(ConnState::Closed), Duration::ZERO);
    }

    #[test]
    fn test_reap_once_evicts_only_stale() {
        let now = Instant::now();
        let reg = registry_with(
            &[Duration::from_secs(10), Duration::from_millis(10), Duration::from_secs(4)],
            now,
        );
        let policy = IdlePolicy::uniform(Duration::from_secs(3));

        assert_eq!(reap_once(&reg, &policy, now), 2);
        assert_eq!(reg.len(), 1);
        // Nothing left to evict at the same instant.
        assert_eq!(reap_once(&reg, &policy, now), 0);
    }

    #[test]
    fn test_self_closed_connection_is_collected() {
        let now = Instant::now();
        let reg = registry_with(&[Duration::ZERO], now);
        let token = crate::poller::Token(1);
        reg.with(token, |c| c.close(CloseReason::PeerClosed));

        let policy = IdlePolicy::uniform(Duration::from_secs(60));
        assert_eq!(reap_once(&reg, &policy, now), 1);
        assert!(reg.is_empty());
    }

    #[test]
    fn test_reaper_thread_evicts_within_a_tick() {
        let now = Instant::now();
        let reg = Arc::new(registry_with(&[Duration::from_secs(5)], now));
        let config = ReaperConfig {
            interval: Duration::from_millis(20),
            policy: IdlePolicy::uniform(Duration::from_secs(1)),
            thread_name: "test-reaper".into(),
        };

        let handle = spawn_reaper(reg.clone(), config).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !reg.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        let stats = handle.shutdown();

        assert!(reg.is_empty());
        assert_eq!(stats.evicted, 1);
        assert!(stats.ticks >= 1);
    }

    #[test]
    fn test_shutdown_is_prompt() {
        let reg = Arc::new(Registry::<Idle>::new());
        let config = ReaperConfig {
            interval: Duration::from_secs(60),
            ..ReaperConfig::default()
        };
        let handle = spawn_reaper(reg, config).unwrap();
        let start = Instant::now();
        let stats = handle.shutdown();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(stats.ticks, 0);
    }
}
