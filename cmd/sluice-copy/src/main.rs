//! sluice-copy: file copy with live progress
//!
//! Usage:
//!     ./target/release/sluice-copy <src> <dst> [--no-fast-path] [--quiet]
//!     ./target/release/sluice-copy <src> <dst> --compare
//!
//! Ctrl-C cancels the copy at the next chunk boundary; the partial
//! destination is left in place and the exit status is 130.
//!
//! `--compare` copies the same source three ways and prints the time and
//! throughput of each: file to file through `sendfile`, file to file through
//! the buffered fallback, and file to a loopback socket through `sendfile`.

use sluice_core::{kerror, kprint, kprintln, CancelFlag};
use sluice_transfer::{
    Disabled, FastPath, NoProgress, Progress, Sendfile, TransferConfig, TransferEngine,
    TransferError, TransferOutcome,
};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

static CANCEL: OnceLock<CancelFlag> = OnceLock::new();

extern "C" fn handle_sigint(_sig: nix::libc::c_int) {
    if let Some(flag) = CANCEL.get() {
        flag.cancel();
    }
}

fn install_signals() -> nix::Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handle_sigint),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        signal::sigaction(Signal::SIGINT, &action)?;
        signal::sigaction(Signal::SIGTERM, &action)?;
        signal::signal(Signal::SIGPIPE, SigHandler::SigIgn)?;
    }
    Ok(())
}

#[derive(Debug, Default)]
struct Args {
    src: PathBuf,
    dst: PathBuf,
    fast_path: bool,
    compare: bool,
    quiet: bool,
}

const USAGE: &str = "usage: sluice-copy <src> <dst> [--no-fast-path] [--quiet] [--compare]";

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        fast_path: true,
        ..Args::default()
    };
    let mut positional = Vec::new();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--no-fast-path" => args.fast_path = false,
            "--compare" => args.compare = true,
            "--quiet" | "-q" => args.quiet = true,
            "--help" | "-h" => return Err(USAGE.into()),
            s if s.starts_with("--") => return Err(format!("unknown flag: {}\n{}", s, USAGE)),
            _ => positional.push(PathBuf::from(arg)),
        }
    }
    match <[PathBuf; 2]>::try_from(positional) {
        Ok([src, dst]) => {
            args.src = src;
            args.dst = dst;
            Ok(args)
        }
        Err(_) => Err(USAGE.into()),
    }
}

/// Rewrites one stderr line per report.
fn progress_line(p: &Progress) {
    let mut err = io::stderr().lock();
    let _ = write!(err, "\r  {} [{}]   ", p, p.path);
    let _ = err.flush();
}

fn run_copy(args: &Args, cancel: &CancelFlag) -> ExitCode {
    let config = TransferConfig::from_env().fast_path(args.fast_path);
    let mut engine = TransferEngine::new(config);
    let start = Instant::now();

    let result = if args.quiet {
        engine.copy_file(&args.src, &args.dst, &mut NoProgress, cancel)
    } else {
        engine.copy_file(&args.src, &args.dst, &mut progress_line, cancel)
    };
    if !args.quiet {
        kprintln!();
    }

    match result {
        Ok(TransferOutcome::Completed(n)) => {
            kprintln!(
                "copied {} bytes in {:.1} ms ({})",
                n,
                ms(start.elapsed()),
                rate(n, start.elapsed())
            );
            ExitCode::SUCCESS
        }
        Ok(TransferOutcome::Cancelled(n)) => {
            kprintln!("cancelled after {} bytes; {} is incomplete", n, args.dst.display());
            ExitCode::from(130)
        }
        Err(e @ TransferError::Incomplete { .. }) => {
            kerror!("{} (source changed during copy?)", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            kerror!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn rate(bytes: u64, d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs <= 0.0 {
        return "-- MiB/s".into();
    }
    format!("{:.1} MiB/s", bytes as f64 / (1024.0 * 1024.0) / secs)
}

struct Sample {
    label: &'static str,
    bytes: u64,
    elapsed: Duration,
}

impl Sample {
    fn print(&self) {
        kprintln!(
            "  {:<22} {:>10.1} ms  {:>12}",
            self.label,
            ms(self.elapsed),
            rate(self.bytes, self.elapsed)
        );
    }
}

fn time_file_copy<F: FastPath>(
    label: &'static str,
    fast_path: F,
    src: &Path,
    dst: &Path,
    cancel: &CancelFlag,
) -> Result<Sample, TransferError> {
    let mut engine = TransferEngine::with_fast_path(TransferConfig::from_env(), fast_path);
    let start = Instant::now();
    let outcome = engine.copy_file(src, dst, &mut NoProgress, cancel)?;
    Ok(Sample {
        label,
        bytes: outcome.transferred(),
        elapsed: start.elapsed(),
    })
}

/// Send `src` to a loopback listener drained by a helper thread.
fn time_socket_send(src: &Path, cancel: &CancelFlag) -> Result<Sample, TransferError> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    let drain = thread::Builder::new()
        .name("sluice-drain".into())
        .spawn(move || -> io::Result<u64> {
            let (mut peer, _) = listener.accept()?;
            let mut buf = vec![0u8; 256 * 1024];
            let mut total = 0u64;
            loop {
                match peer.read(&mut buf)? {
                    0 => return Ok(total),
                    n => total += n as u64,
                }
            }
        })?;

    let mut source = File::open(src)?;
    let total = source.metadata()?.len();
    let mut sock = TcpStream::connect(addr)?;
    let mut engine = TransferEngine::with_fast_path(TransferConfig::from_env(), Sendfile);

    let start = Instant::now();
    let outcome = engine.transfer(&mut source, &mut sock, total, &mut NoProgress, cancel)?;
    sock.shutdown(std::net::Shutdown::Write)?;
    let received = drain
        .join()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "drain thread panicked"))??;
    let elapsed = start.elapsed();

    if received != outcome.transferred() {
        return Err(TransferError::Incomplete {
            transferred: received,
            expected: outcome.transferred(),
        });
    }
    Ok(Sample {
        label: "file -> socket (direct)",
        bytes: received,
        elapsed,
    })
}

fn run_compare(args: &Args, cancel: &CancelFlag) -> ExitCode {
    let size = match fs::metadata(&args.src) {
        Ok(m) if m.is_dir() => {
            kerror!("{}", TransferError::SourceIsDirectory(args.src.clone()));
            return ExitCode::FAILURE;
        }
        Ok(m) => m.len(),
        Err(_) => {
            kerror!("{}", TransferError::SourceNotFound(args.src.clone()));
            return ExitCode::FAILURE;
        }
    };
    kprintln!("comparing on {} ({} bytes)", args.src.display(), size);

    let mut samples = Vec::with_capacity(3);
    for run in 0..3 {
        if cancel.is_cancelled() {
            kprintln!("cancelled");
            return ExitCode::from(130);
        }
        let result = match run {
            0 => time_file_copy("file -> file (direct)", Sendfile, &args.src, &args.dst, cancel),
            1 => time_file_copy("file -> file (buffered)", Disabled, &args.src, &args.dst, cancel),
            _ => time_socket_send(&args.src, cancel),
        };
        match result {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                kerror!("comparison run {} failed: {}", run + 1, e);
                return ExitCode::FAILURE;
            }
        }
    }

    for sample in &samples {
        sample.print();
    }
    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    kprint::init();

    let args = match parse_args() {
        Ok(a) => a,
        Err(msg) => {
            kprintln!("{}", msg);
            return ExitCode::from(2);
        }
    };

    let cancel = CANCEL.get_or_init(CancelFlag::new);
    if let Err(e) = install_signals() {
        kerror!("installing signal handlers: {}", e);
        return ExitCode::FAILURE;
    }

    if args.compare {
        run_compare(&args, cancel)
    } else {
        run_copy(&args, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_formatting() {
        assert_eq!(rate(1024 * 1024, Duration::from_secs(1)), "1.0 MiB/s");
        assert_eq!(rate(10, Duration::ZERO), "-- MiB/s");
    }

    #[test]
    fn test_compare_runs_match_size() {
        let dir = std::env::temp_dir().join(format!("sluice-copy-cmd-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let src = dir.join("src.bin");
        let dst = dir.join("dst.bin");
        let data: Vec<u8> = (0..(2 * 1024 * 1024 + 5)).map(|i| (i % 253) as u8).collect();
        fs::write(&src, &data).unwrap();

        let cancel = CancelFlag::new();
        let direct = time_file_copy("d", Sendfile, &src, &dst, &cancel).unwrap();
        assert_eq!(direct.bytes, data.len() as u64);
        let buffered = time_file_copy("b", Disabled, &src, &dst, &cancel).unwrap();
        assert_eq!(buffered.bytes, data.len() as u64);
        assert_eq!(fs::read(&dst).unwrap(), data);
        let socket = time_socket_send(&src, &cancel).unwrap();
        assert_eq!(socket.bytes, data.len() as u64);

        fs::remove_dir_all(&dir).ok();
    }
}
