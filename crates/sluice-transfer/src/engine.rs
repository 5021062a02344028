//! Bulk transfer engine: direct path first, buffered fallback second.
//!
//! # Algorithm
//!
//! 1. Direct path: repeated [`FastPath`] calls from the source's current
//!    position, checking the cancel flag before each call. `Ok(0)` or an
//!    error ends the direct phase silently.
//! 2. Fallback: the source is seeked to where the direct phase stopped, then
//!    a single reusable [`ByteBuffer`] is filled, flipped, drained into the
//!    destination (partial writes included) and reset, until the total is
//!    reached or the source ends. The cancel flag is checked before each fill.
//! 3. A short count without cancellation is [`TransferError::Incomplete`].
//!
//! The engine blocks. Run it on the caller's thread or a worker, never from
//! an event loop dispatch. Endpoints stay open; closing them is the caller's
//! job.

use crate::config::TransferConfig;
use crate::error::{TransferError, TransferResult};
use crate::fastpath::{FastPath, Sendfile};
use crate::progress::{ProgressSink, ProgressTracker, TransferPath};

use sluice_core::{kdebug, ktrace, ByteBuffer, CancelFlag, Fill};

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::AsFd;

/// How a job ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Every requested byte was written.
    Completed(u64),
    /// The cancel flag was observed after this many bytes.
    Cancelled(u64),
}

impl TransferOutcome {
    pub fn transferred(&self) -> u64 {
        match *self {
            TransferOutcome::Completed(n) | TransferOutcome::Cancelled(n) => n,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferOutcome::Cancelled(_))
    }
}

/// Transfer engine with a pluggable direct path.
///
/// The fallback buffer is allocated on first use and kept for later jobs.
pub struct TransferEngine<F = Sendfile> {
    config: TransferConfig,
    fast_path: F,
    buffer: Option<ByteBuffer>,
}

impl TransferEngine<Sendfile> {
    pub fn new(config: TransferConfig) -> Self {
        Self::with_fast_path(config, Sendfile)
    }
}

impl Default for TransferEngine<Sendfile> {
    fn default() -> Self {
        Self::new(TransferConfig::from_env())
    }
}

impl<F: FastPath> TransferEngine<F> {
    pub fn with_fast_path(config: TransferConfig, fast_path: F) -> Self {
        Self {
            config: config.validate(),
            fast_path,
            buffer: None,
        }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn fast_path(&self) -> &F {
        &self.fast_path
    }

    /// Move `total` bytes from `source` (starting at its current position)
    /// to `dest`.
    pub fn transfer<S, D, P>(
        &mut self,
        source: &mut S,
        dest: &mut D,
        total: u64,
        sink: &mut P,
        cancel: &CancelFlag,
    ) -> TransferResult<TransferOutcome>
    where
        S: Read + Seek + AsFd + ?Sized,
        D: Write + AsFd + ?Sized,
        P: ProgressSink + ?Sized,
    {
        let mut tracker = ProgressTracker::new(total, self.config.progress_interval);

        if total == 0 {
            tracker.complete(0, TransferPath::Direct, sink);
            return Ok(TransferOutcome::Completed(0));
        }

        let base = source
            .stream_position()
            .map_err(|e| TransferError::io(0, e))?;
        let mut transferred = 0u64;

        if self.config.fast_path {
            let phase = self.direct_phase(source, dest, base, total, &mut tracker, sink, cancel);
            // The direct path never moves the source; line it up with the
            // destination whatever the outcome.
            match phase {
                Phase::Done(n) | Phase::Cancelled(n) => {
                    source
                        .seek(SeekFrom::Start(base + n))
                        .map_err(|e| TransferError::io(n, e))?;
                    return Ok(match phase {
                        Phase::Cancelled(_) => TransferOutcome::Cancelled(n),
                        _ => TransferOutcome::Completed(n),
                    });
                }
                Phase::Fallback(n) => transferred = n,
            }
        }

        source
            .seek(SeekFrom::Start(base + transferred))
            .map_err(|e| TransferError::io(transferred, e))?;

        let mut buf = match self.buffer.take() {
            Some(buf) if buf.capacity() == self.config.buffer_size => buf,
            _ => ByteBuffer::with_capacity(self.config.buffer_size),
        };
        buf.reset_for_fill();

        let result = buffered_phase(
            &mut buf,
            source,
            dest,
            transferred,
            total,
            &mut tracker,
            sink,
            cancel,
        );
        self.buffer = Some(buf);
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn direct_phase<S, D, P>(
        &mut self,
        source: &S,
        dest: &D,
        base: u64,
        total: u64,
        tracker: &mut ProgressTracker,
        sink: &mut P,
        cancel: &CancelFlag,
    ) -> Phase
    where
        S: AsFd + ?Sized,
        D: AsFd + ?Sized,
        P: ProgressSink + ?Sized,
    {
        let (src_fd, dst_fd) = (source.as_fd(), dest.as_fd());
        let mut transferred = 0u64;

        while transferred < total {
            if cancel.is_cancelled() {
                kdebug!("transfer cancelled after {} bytes (direct)", transferred);
                return Phase::Cancelled(transferred);
            }

            let count = (total - transferred).min(self.config.max_direct_chunk as u64) as usize;
            match self.fast_path.transfer(src_fd, dst_fd, base + transferred, count) {
                Ok(0) => {
                    kdebug!(
                        "{} unavailable after {} bytes, falling back",
                        self.fast_path.name(),
                        transferred
                    );
                    return Phase::Fallback(transferred);
                }
                Ok(n) => {
                    transferred += (n as u64).min(total - transferred);
                    tracker.update(transferred, TransferPath::Direct, sink);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    kdebug!(
                        "{} failed after {} bytes ({}), falling back",
                        self.fast_path.name(),
                        transferred,
                        e
                    );
                    return Phase::Fallback(transferred);
                }
            }
        }

        tracker.complete(transferred, TransferPath::Direct, sink);
        Phase::Done(transferred)
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Done(u64),
    Cancelled(u64),
    Fallback(u64),
}

#[allow(clippy::too_many_arguments)]
fn buffered_phase<S, D, P>(
    buf: &mut ByteBuffer,
    source: &mut S,
    dest: &mut D,
    mut transferred: u64,
    total: u64,
    tracker: &mut ProgressTracker,
    sink: &mut P,
    cancel: &CancelFlag,
) -> TransferResult<TransferOutcome>
where
    S: Read + ?Sized,
    D: Write + ?Sized,
    P: ProgressSink + ?Sized,
{
    while transferred < total {
        if cancel.is_cancelled() {
            kdebug!("transfer cancelled after {} bytes (buffered)", transferred);
            return Ok(TransferOutcome::Cancelled(transferred));
        }

        // Never read past the requested length.
        let mut limited = (&mut *source).take(total - transferred);
        match buf.fill(&mut limited) {
            Ok(Fill::Data(n)) => ktrace!("read {} bytes", n),
            Ok(Fill::EndOfStream) => break,
            Ok(Fill::NotReady) => {
                return Err(TransferError::io(transferred, io::ErrorKind::WouldBlock.into()))
            }
            Err(e) => return Err(TransferError::io(transferred, e)),
        }

        buf.begin_consume();
        while buf.has_remaining() {
            match buf.consume(dest) {
                Ok(0) => {
                    return Err(TransferError::io(transferred, io::ErrorKind::WriteZero.into()))
                }
                Ok(n) => transferred += n as u64,
                Err(e) => return Err(TransferError::io(transferred, e)),
            }
        }
        buf.reset_for_fill();
        tracker.update(transferred, TransferPath::Buffered, sink);
    }

    if transferred != total {
        return Err(TransferError::Incomplete {
            transferred,
            expected: total,
        });
    }
    dest.flush().map_err(|e| TransferError::io(transferred, e))?;
    tracker.complete(transferred, TransferPath::Buffered, sink);
    Ok(TransferOutcome::Completed(transferred))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastpath::Disabled;
    use crate::progress::{NoProgress, Progress};
    use std::fs::{self, File};
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::BorrowedFd;
    use std::path::PathBuf;
    use std::thread;

    const MIB: usize = 1024 * 1024;

    fn temp_path(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("sluice-engine-{}-{}", std::process::id(), tag))
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn source_file(tag: &str, data: &[u8]) -> (PathBuf, File) {
        let path = temp_path(tag);
        fs::write(&path, data).unwrap();
        let file = File::open(&path).unwrap();
        (path, file)
    }

    /// Delegates to sendfile for a fixed number of calls, then reports
    /// itself unavailable.
    struct FlakyDirect {
        calls_left: usize,
        chunk: usize,
        calls: usize,
    }

    impl FastPath for FlakyDirect {
        fn transfer(
            &mut self,
            src: BorrowedFd<'_>,
            dst: BorrowedFd<'_>,
            offset: u64,
            count: usize,
        ) -> io::Result<usize> {
            self.calls += 1;
            if self.calls_left == 0 {
                return Ok(0);
            }
            self.calls_left -= 1;
            Sendfile.transfer(src, dst, offset, count.min(self.chunk))
        }

        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    struct Failing;

    impl FastPath for Failing {
        fn transfer(
            &mut self,
            _: BorrowedFd<'_>,
            _: BorrowedFd<'_>,
            _: u64,
            _: usize,
        ) -> io::Result<usize> {
            Err(io::Error::from_raw_os_error(libc::EINVAL))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_ten_mib_fallback_reports_every_mib() {
        let data = pattern(10 * MIB);
        let (src_path, mut src) = source_file("10m-src", &data);
        let dst_path = temp_path("10m-dst");
        let mut dst = File::create(&dst_path).unwrap();

        let mut reports: Vec<Progress> = Vec::new();
        let mut sink = |p: &Progress| reports.push(p.clone());
        let mut engine = TransferEngine::with_fast_path(TransferConfig::new(), Disabled);
        let outcome = engine
            .transfer(&mut src, &mut dst, data.len() as u64, &mut sink, &CancelFlag::new())
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Completed(10 * MIB as u64));
        assert!(reports.len() >= 10, "{} reports", reports.len());
        let last = reports.last().unwrap();
        assert_eq!(last.percent, 100.0);
        assert_eq!(last.path, TransferPath::Buffered);
        assert_eq!(fs::read(&dst_path).unwrap(), data);

        fs::remove_file(&src_path).ok();
        fs::remove_file(&dst_path).ok();
    }

    #[test]
    fn test_direct_path_completes() {
        let data = pattern(3 * MIB + 17);
        let (src_path, mut src) = source_file("direct-src", &data);
        let dst_path = temp_path("direct-dst");
        let mut dst = File::create(&dst_path).unwrap();

        let mut engine = TransferEngine::new(TransferConfig::new());
        let outcome = engine
            .transfer(&mut src, &mut dst, data.len() as u64, &mut NoProgress, &CancelFlag::new())
            .unwrap();

        assert_eq!(outcome.transferred(), data.len() as u64);
        assert_eq!(fs::read(&dst_path).unwrap(), data);
        fs::remove_file(&src_path).ok();
        fs::remove_file(&dst_path).ok();
    }

    #[test]
    fn test_unavailable_on_first_call_falls_back() {
        let data = pattern(MIB + 3);
        let (src_path, mut src) = source_file("first0-src", &data);
        let dst_path = temp_path("first0-dst");
        let mut dst = File::create(&dst_path).unwrap();

        let flaky = FlakyDirect {
            calls_left: 0,
            chunk: 0,
            calls: 0,
        };
        let mut engine = TransferEngine::with_fast_path(TransferConfig::new(), flaky);
        let outcome = engine
            .transfer(&mut src, &mut dst, data.len() as u64, &mut NoProgress, &CancelFlag::new())
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Completed(data.len() as u64));
        assert_eq!(engine.fast_path().calls, 1);
        assert_eq!(fs::read(&dst_path).unwrap(), data);
        fs::remove_file(&src_path).ok();
        fs::remove_file(&dst_path).ok();
    }

    #[test]
    fn test_direct_then_fallback_resumes_at_offset() {
        let data = pattern(2 * MIB + 5);
        let (src_path, mut src) = source_file("mid-src", &data);
        let dst_path = temp_path("mid-dst");
        let mut dst = File::create(&dst_path).unwrap();

        let flaky = FlakyDirect {
            calls_left: 2,
            chunk: 300_000,
            calls: 0,
        };
        let mut paths = Vec::new();
        let mut sink = |p: &Progress| paths.push(p.path);
        let mut engine = TransferEngine::with_fast_path(TransferConfig::new(), flaky);
        let outcome = engine
            .transfer(&mut src, &mut dst, data.len() as u64, &mut sink, &CancelFlag::new())
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Completed(data.len() as u64));
        assert_eq!(fs::read(&dst_path).unwrap(), data);
        assert_eq!(paths.last(), Some(&TransferPath::Buffered));
        fs::remove_file(&src_path).ok();
        fs::remove_file(&dst_path).ok();
    }

    #[test]
    fn test_fast_path_error_is_silent() {
        let data = pattern(4096);
        let (src_path, mut src) = source_file("err-src", &data);
        let dst_path = temp_path("err-dst");
        let mut dst = File::create(&dst_path).unwrap();

        let mut engine = TransferEngine::with_fast_path(TransferConfig::new(), Failing);
        let outcome = engine
            .transfer(&mut src, &mut dst, 4096, &mut NoProgress, &CancelFlag::new())
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Completed(4096));
        assert_eq!(fs::read(&dst_path).unwrap(), data);
        fs::remove_file(&src_path).ok();
        fs::remove_file(&dst_path).ok();
    }

    #[test]
    fn test_cancel_before_start() {
        let data = pattern(MIB);
        let (src_path, mut src) = source_file("c0-src", &data);
        let dst_path = temp_path("c0-dst");
        let mut dst = File::create(&dst_path).unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();
        for fast in [true, false] {
            let config = TransferConfig::new().fast_path(fast);
            let mut engine = TransferEngine::new(config);
            let outcome = engine
                .transfer(&mut src, &mut dst, MIB as u64, &mut NoProgress, &cancel)
                .unwrap();
            assert_eq!(outcome, TransferOutcome::Cancelled(0));
        }
        assert_eq!(fs::metadata(&dst_path).unwrap().len(), 0);
        fs::remove_file(&src_path).ok();
        fs::remove_file(&dst_path).ok();
    }

    #[test]
    fn test_cancel_after_k_bytes_writes_nothing_more() {
        let data = pattern(4 * MIB);
        let (src_path, mut src) = source_file("ck-src", &data);
        let dst_path = temp_path("ck-dst");
        let mut dst = File::create(&dst_path).unwrap();

        let cancel = CancelFlag::new();
        let remote = cancel.clone();
        let mut sink = |p: &Progress| {
            if p.transferred >= MIB as u64 {
                remote.cancel();
            }
        };
        let mut engine = TransferEngine::with_fast_path(TransferConfig::new(), Disabled);
        let outcome = engine
            .transfer(&mut src, &mut dst, data.len() as u64, &mut sink, &cancel)
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Cancelled(MIB as u64));
        let written = fs::read(&dst_path).unwrap();
        assert_eq!(written.len(), MIB);
        assert_eq!(&written[..], &data[..MIB]);
        fs::remove_file(&src_path).ok();
        fs::remove_file(&dst_path).ok();
    }

    #[test]
    fn test_cancel_mid_direct_keeps_source_in_step() {
        let data = pattern(4 * MIB);
        let (src_path, mut src) = source_file("ckd-src", &data);
        let dst_path = temp_path("ckd-dst");
        let mut dst = File::create(&dst_path).unwrap();

        let cancel = CancelFlag::new();
        let remote = cancel.clone();
        let mut paths = Vec::new();
        let mut sink = |p: &Progress| {
            paths.push(p.path);
            if p.transferred >= MIB as u64 {
                remote.cancel();
            }
        };
        let config = TransferConfig::new().max_direct_chunk(256 * 1024);
        let mut engine = TransferEngine::with_fast_path(config, Sendfile);
        let outcome = engine
            .transfer(&mut src, &mut dst, data.len() as u64, &mut sink, &cancel)
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Cancelled(MIB as u64));
        assert!(paths.iter().all(|p| *p == TransferPath::Direct));
        let written = fs::read(&dst_path).unwrap();
        assert_eq!(written.len(), MIB);
        assert_eq!(&written[..], &data[..MIB]);
        assert_eq!(src.stream_position().unwrap(), MIB as u64);

        fs::remove_file(&src_path).ok();
        fs::remove_file(&dst_path).ok();
    }

    #[test]
    fn test_short_source_is_incomplete() {
        let data = pattern(1000);
        let (src_path, mut src) = source_file("short-src", &data);
        let dst_path = temp_path("short-dst");
        let mut dst = File::create(&dst_path).unwrap();

        let mut engine = TransferEngine::new(TransferConfig::new());
        let err = engine
            .transfer(&mut src, &mut dst, 5000, &mut NoProgress, &CancelFlag::new())
            .unwrap_err();
        match err {
            TransferError::Incomplete {
                transferred,
                expected,
            } => {
                assert_eq!(transferred, 1000);
                assert_eq!(expected, 5000);
            }
            other => panic!("unexpected {:?}", other),
        }
        fs::remove_file(&src_path).ok();
        fs::remove_file(&dst_path).ok();
    }

    #[test]
    fn test_zero_total_single_report() {
        let (src_path, mut src) = source_file("zero-src", b"");
        let dst_path = temp_path("zero-dst");
        let mut dst = File::create(&dst_path).unwrap();

        let mut percents = Vec::new();
        let mut sink = |p: &Progress| percents.push(p.percent);
        let mut engine = TransferEngine::new(TransferConfig::new());
        let outcome = engine
            .transfer(&mut src, &mut dst, 0, &mut sink, &CancelFlag::new())
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Completed(0));
        assert_eq!(percents, vec![100.0]);
        fs::remove_file(&src_path).ok();
        fs::remove_file(&dst_path).ok();
    }

    #[test]
    fn test_file_to_socket() {
        let data = pattern(2 * MIB + 123);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let receiver = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut got = Vec::new();
            sock.read_to_end(&mut got).unwrap();
            got
        });

        let (src_path, mut src) = source_file("sock-src", &data);
        let mut sock = TcpStream::connect(addr).unwrap();
        let mut engine = TransferEngine::new(TransferConfig::new());
        let outcome = engine
            .transfer(&mut src, &mut sock, data.len() as u64, &mut NoProgress, &CancelFlag::new())
            .unwrap();
        assert_eq!(outcome, TransferOutcome::Completed(data.len() as u64));
        drop(sock);

        assert_eq!(receiver.join().unwrap(), data);
        fs::remove_file(&src_path).ok();
    }

    #[test]
    fn test_buffered_to_socket() {
        let data = pattern(MIB + 7);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let receiver = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut got = Vec::new();
            sock.read_to_end(&mut got).unwrap();
            got
        });

        let (src_path, mut src) = source_file("bsock-src", &data);
        let mut sock = TcpStream::connect(addr).unwrap();
        let mut engine = TransferEngine::with_fast_path(TransferConfig::new(), Disabled);
        engine
            .transfer(&mut src, &mut sock, data.len() as u64, &mut NoProgress, &CancelFlag::new())
            .unwrap();
        drop(sock);

        assert_eq!(receiver.join().unwrap(), data);
        fs::remove_file(&src_path).ok();
    }
}
