//! sluice HTTP/1.1 demo server
//!
//! One request per connection on the single-threaded epoll loop: the request
//! is framed on the blank line after the headers, answered, and the
//! connection closed. Idle clients are evicted by the reaper.
//!
//! Usage:
//!     ./target/release/sluice-httpd [--listen 127.0.0.1:9090] [--port 9090]
//!                                   [--idle-ms 3000] [--max-conns 1024]
//!
//! Benchmark:
//!     wrk -t4 -c100 -d10s http://127.0.0.1:9090/
//!
//! Everything not given on the command line comes from `SLUICE_*`
//! environment variables (see `ServerConfig::from_env`).

use sluice_core::{kerror, kinfo, kprint, kprintln};
use sluice_reactor::{EventLoop, Registry, RequestHandler, ServerConfig, ShutdownHandle};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const HEADER_END: &[u8] = b"\r\n\r\n";

static SHUTDOWN: OnceLock<ShutdownHandle> = OnceLock::new();

/// Frames on the end of the header block and answers every request with a
/// small HTML page.
struct HttpHandler;

impl RequestHandler for HttpHandler {
    fn is_request_complete(&self, buf: &[u8]) -> bool {
        buf.windows(HEADER_END.len()).any(|w| w == HEADER_END)
    }

    fn build_response(&self, request: &[u8]) -> Vec<u8> {
        match parse_request_line(request) {
            Some(("GET", path)) | Some(("HEAD", path)) => {
                let body = format!(
                    "<html><head><title>sluice</title></head>\
                     <body><h1>Hello from sluice</h1><p>{}</p></body></html>\n",
                    escape_html(path)
                );
                let head_only = request.starts_with(b"HEAD ");
                response("200 OK", "text/html", &body, head_only)
            }
            Some(_) => response("405 Method Not Allowed", "text/plain", "405 Method Not Allowed\n", false),
            None => response("400 Bad Request", "text/plain", "400 Bad Request\n", false),
        }
    }
}

/// `METHOD SP target SP HTTP/x.y` from the first line.
fn parse_request_line(request: &[u8]) -> Option<(&str, &str)> {
    let end = request.windows(2).position(|w| w == b"\r\n")?;
    let line = std::str::from_utf8(&request[..end]).ok()?;
    let mut parts = line.split(' ');
    let method = parts.next()?;
    let target = parts.next()?;
    let version = parts.next()?;
    if parts.next().is_some() || !version.starts_with("HTTP/") || method.is_empty() {
        return None;
    }
    Some((method, target))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn response(status: &str, content_type: &str, body: &str, head_only: bool) -> Vec<u8> {
    let mut resp = format!(
        "HTTP/1.1 {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Server: sluice-httpd\r\n\
         \r\n",
        status,
        content_type,
        body.len()
    )
    .into_bytes();
    if !head_only {
        resp.extend_from_slice(body.as_bytes());
    }
    resp
}

extern "C" fn handle_stop(_sig: nix::libc::c_int) {
    if let Some(handle) = SHUTDOWN.get() {
        handle.shutdown_from_signal();
    }
}

fn install_signals() -> nix::Result<()> {
    let stop = SigAction::new(
        SigHandler::Handler(handle_stop),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    unsafe {
        signal::sigaction(Signal::SIGINT, &stop)?;
        signal::sigaction(Signal::SIGTERM, &stop)?;
        signal::signal(Signal::SIGPIPE, SigHandler::SigIgn)?;
    }
    Ok(())
}

fn parse_args(mut config: ServerConfig) -> Result<ServerConfig, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = || {
            args.get(i + 1)
                .map(String::as_str)
                .ok_or_else(|| format!("{} needs a value", flag))
        };
        match flag {
            "--listen" | "-l" => {
                let addr: SocketAddr = value()?
                    .parse()
                    .map_err(|e| format!("--listen: {}", e))?;
                config = config.listen_addr(addr);
            }
            "--port" | "-p" => {
                let port: u16 = value()?.parse().map_err(|e| format!("--port: {}", e))?;
                let mut addr = config.listen_addr;
                addr.set_port(port);
                config = config.listen_addr(addr);
            }
            "--idle-ms" => {
                let ms: u64 = value()?.parse().map_err(|e| format!("--idle-ms: {}", e))?;
                config = config.idle_timeout(Duration::from_millis(ms));
            }
            "--max-conns" => {
                let n: usize = value()?.parse().map_err(|e| format!("--max-conns: {}", e))?;
                config = config.max_connections(n);
            }
            "--help" | "-h" => {
                return Err(
                    "usage: sluice-httpd [--listen ADDR] [--port N] [--idle-ms MS] [--max-conns N]"
                        .into(),
                )
            }
            other => return Err(format!("unknown argument: {}", other)),
        }
        i += 2;
    }
    Ok(config)
}

fn main() -> ExitCode {
    kprint::init();

    let config = match parse_args(ServerConfig::from_env()) {
        Ok(c) => c,
        Err(msg) => {
            kprintln!("{}", msg);
            return ExitCode::from(2);
        }
    };

    let registry = Arc::new(Registry::new());
    let mut ev = match EventLoop::bind(config, registry, HttpHandler) {
        Ok(ev) => ev,
        Err(e) => {
            kerror!("sluice-httpd: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let _ = SHUTDOWN.set(ev.shutdown_handle());
    if let Err(e) = install_signals() {
        kerror!("sluice-httpd: installing signal handlers: {}", e);
        return ExitCode::FAILURE;
    }

    let cfg = ev.config();
    kinfo!(
        "sluice-httpd: listening on {} read_timeout={:?} write_timeout={:?} max_conns={}",
        ev.local_addr(),
        cfg.read_timeout,
        cfg.write_timeout,
        cfg.max_connections
    );

    match ev.run() {
        Ok(stats) => {
            kprintln!("\nsluice-httpd: shutdown complete ({})", stats);
            ExitCode::SUCCESS
        }
        Err(e) => {
            kerror!("sluice-httpd: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framing_waits_for_blank_line() {
        let h = HttpHandler;
        assert!(!h.is_request_complete(b"GET / HTTP/1.1\r\nHost: x\r\n"));
        assert!(h.is_request_complete(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"));
    }

    #[test]
    fn test_get_returns_html_and_closes() {
        let resp = HttpHandler.build_response(b"GET /a<b> HTTP/1.1\r\n\r\n");
        let text = String::from_utf8(resp).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("/a&lt;b&gt;"));

        let (head, body) = text.split_once("\r\n\r\n").unwrap();
        let len: usize = head
            .lines()
            .find_map(|l| l.strip_prefix("Content-Length: "))
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(len, body.len());
    }

    #[test]
    fn test_head_has_no_body() {
        let resp = HttpHandler.build_response(b"HEAD / HTTP/1.1\r\n\r\n");
        assert!(resp.ends_with(b"\r\n\r\n"));
    }

    #[test]
    fn test_sigterm_stops_loop() {
        let config = ServerConfig::new()
            .listen_addr("127.0.0.1:0".parse().unwrap())
            .poll_timeout(Duration::from_secs(30));
        let mut ev = EventLoop::bind(config, Arc::new(Registry::new()), HttpHandler).unwrap();
        let handle = ev.shutdown_handle();
        SHUTDOWN.set(ev.shutdown_handle()).unwrap();
        install_signals().unwrap();

        let join = std::thread::spawn(move || ev.run());
        std::thread::sleep(Duration::from_millis(50));

        let start = std::time::Instant::now();
        signal::raise(Signal::SIGTERM).unwrap();
        join.join().unwrap().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
        assert!(!handle.is_running());
    }

    #[test]
    fn test_bad_requests() {
        let resp = HttpHandler.build_response(b"garbage\r\n\r\n");
        assert!(resp.starts_with(b"HTTP/1.1 400 "));
        let resp = HttpHandler.build_response(b"POST / HTTP/1.1\r\n\r\n");
        assert!(resp.starts_with(b"HTTP/1.1 405 "));
    }
}
