//! Progress reporting for transfer jobs.
//!
//! The engine reports through a [`ProgressSink`] each time the cumulative
//! byte count crosses a multiple of the reporting interval, and once more on
//! completion. Formatting is the caller's business; [`Progress`] only carries
//! the numbers (its `Display` is a convenience).

use std::fmt;
use std::time::{Duration, Instant};

const MIB: f64 = 1024.0 * 1024.0;

/// Which strategy moved the bytes being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPath {
    /// Kernel-assisted direct transfer (`sendfile`).
    Direct,
    /// Read into a buffer, write from it.
    Buffered,
}

impl fmt::Display for TransferPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferPath::Direct => write!(f, "direct"),
            TransferPath::Buffered => write!(f, "buffered"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    pub transferred: u64,
    pub total: u64,
    /// `100 * transferred / total`; 100 for an empty job.
    pub percent: f64,
    pub elapsed: Duration,
    /// MiB/s, only when some time has elapsed.
    pub throughput_mib_s: Option<f64>,
    pub path: TransferPath,
}

impl Progress {
    pub fn new(transferred: u64, total: u64, elapsed: Duration, path: TransferPath) -> Self {
        let secs = elapsed.as_secs_f64();
        Self {
            transferred,
            total,
            percent: percent(transferred, total),
            elapsed,
            throughput_mib_s: (secs > 0.0).then(|| transferred as f64 / MIB / secs),
            path,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.transferred >= self.total
    }
}

/// `100 * transferred / total`, with an empty total counting as done.
pub fn percent(transferred: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    100.0 * transferred as f64 / total as f64
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.1}% ({:.1}/{:.1} MB)",
            self.percent,
            self.transferred as f64 / MIB,
            self.total as f64 / MIB
        )?;
        match self.throughput_mib_s {
            Some(rate) => write!(f, " @ {:.1} MB/s", rate),
            None => write!(f, " @ -- MB/s"),
        }
    }
}

/// Receives progress updates from a running job.
pub trait ProgressSink {
    fn report(&mut self, progress: &Progress);
}

impl<F: FnMut(&Progress)> ProgressSink for F {
    fn report(&mut self, progress: &Progress) {
        self(progress)
    }
}

/// Discards every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _: &Progress) {}
}

/// Decides when a report is due and builds it.
#[derive(Debug)]
pub struct ProgressTracker {
    total: u64,
    interval: u64,
    next_report: u64,
    start: Instant,
    reports: u64,
    completion_reported: bool,
}

impl ProgressTracker {
    pub fn new(total: u64, interval: u64) -> Self {
        let interval = interval.max(1);
        Self {
            total,
            interval,
            next_report: interval,
            start: Instant::now(),
            reports: 0,
            completion_reported: false,
        }
    }

    /// Report if `transferred` crossed an interval boundary or reached the
    /// total. Returns whether a report was sent.
    pub fn update<S: ProgressSink + ?Sized>(
        &mut self,
        transferred: u64,
        path: TransferPath,
        sink: &mut S,
    ) -> bool {
        if transferred >= self.total {
            return self.complete(transferred, path, sink);
        }
        if transferred < self.next_report {
            return false;
        }
        // One report even if several boundaries were crossed at once.
        self.next_report = (transferred / self.interval + 1) * self.interval;
        self.emit(transferred, path, sink);
        true
    }

    /// Send the completion report unless it already went out.
    pub fn complete<S: ProgressSink + ?Sized>(
        &mut self,
        transferred: u64,
        path: TransferPath,
        sink: &mut S,
    ) -> bool {
        if self.completion_reported {
            return false;
        }
        self.completion_reported = true;
        self.emit(transferred, path, sink);
        true
    }

    fn emit<S: ProgressSink + ?Sized>(&mut self, transferred: u64, path: TransferPath, sink: &mut S) {
        self.reports += 1;
        sink.report(&Progress::new(transferred, self.total, self.start.elapsed(), path));
    }

    pub fn reports(&self) -> u64 {
        self.reports
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent_guards_zero_total() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(5, 10), 50.0);
    }

    #[test]
    fn test_throughput_only_with_elapsed() {
        let p = Progress::new(1 << 20, 1 << 21, Duration::ZERO, TransferPath::Direct);
        assert!(p.throughput_mib_s.is_none());
        assert_eq!(format!("{}", p), "50.0% (1.0/2.0 MB) @ -- MB/s");

        let p = Progress::new(4 << 20, 4 << 20, Duration::from_secs(2), TransferPath::Buffered);
        assert_eq!(p.throughput_mib_s, Some(2.0));
        assert_eq!(format!("{}", p), "100.0% (4.0/4.0 MB) @ 2.0 MB/s");
        assert!(p.is_complete());
    }

    #[test]
    fn test_tracker_reports_on_boundaries() {
        let mut seen = Vec::new();
        let mut sink = |p: &Progress| seen.push(p.transferred);
        let mut t = ProgressTracker::new(1000, 100);

        assert!(!t.update(50, TransferPath::Buffered, &mut sink));
        assert!(t.update(100, TransferPath::Buffered, &mut sink));
        assert!(!t.update(150, TransferPath::Buffered, &mut sink));
        // Jumping several boundaries yields one report.
        assert!(t.update(420, TransferPath::Buffered, &mut sink));
        assert!(!t.update(480, TransferPath::Buffered, &mut sink));
        assert!(t.update(500, TransferPath::Buffered, &mut sink));
        assert!(t.update(1000, TransferPath::Buffered, &mut sink));
        assert!(!t.complete(1000, TransferPath::Buffered, &mut sink));

        assert_eq!(t.reports(), 4);
        assert_eq!(seen, vec![100, 420, 500, 1000]);
    }

    #[test]
    fn test_tracker_empty_job() {
        let mut last = None;
        let mut sink = |p: &Progress| last = Some(p.percent);
        let mut t = ProgressTracker::new(0, 100);
        assert!(t.update(0, TransferPath::Direct, &mut sink));
        assert_eq!(t.reports(), 1);
        assert_eq!(last, Some(100.0));
    }
}
