//! The event loop: accept, poll, dispatch.
//!
//! One thread drives everything through [`EventLoop::turn`]:
//!
//! 1. `epoll_wait` with a bounded timeout (the only blocking point)
//! 2. listener events accept until `WouldBlock`
//! 3. connection events are dispatched under the registry lock, read
//!    handling before write handling
//! 4. the resulting [`Action`] is applied to the poller and registry
//!
//! The reaper runs beside the loop on the same [`Registry`]. Shutdown flips
//! the shared running flag and wakes the poller through the eventfd.

use crate::config::ServerConfig;
use crate::connection::{Action, CloseReason, ConnEvent, Connection};
use crate::error::{ReactorError, ReactorResult};
use crate::handler::RequestHandler;
use crate::poller::{Event, Interest, Poller, Token, LISTENER_TOKEN};
use crate::reaper::{spawn_reaper, IdlePolicy, ReaperConfig};
use crate::registry::Registry;
use crate::waker::{wake_fd, Waker};

use sluice_core::{kdebug, kerror, kinfo, ktrace, kwarn, BufferPool};

use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters kept by the loop thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    /// Connections accepted and registered.
    pub accepts: u64,
    /// Connections refused by the connection cap.
    pub rejected: u64,
    /// Requests framed by the handler.
    pub requests: u64,
    /// Responses fully written.
    pub responses: u64,
    /// Connections closed by the loop (not counting reaper evictions).
    pub closes: u64,
    /// Accept, registration and connection I/O failures.
    pub errors: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl fmt::Display for LoopStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "accepts={} rejected={} requests={} responses={} closes={} errors={} in={}B out={}B",
            self.accepts,
            self.rejected,
            self.requests,
            self.responses,
            self.closes,
            self.errors,
            self.bytes_in,
            self.bytes_out
        )
    }
}

/// Stops a running loop from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    /// Clear the running flag and interrupt the poll.
    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            kwarn!("shutdown wake failed: {}", e);
        }
    }

    /// [`shutdown`](Self::shutdown) for signal handlers: one atomic store
    /// and one `write(2)`, no locking, allocation or logging.
    pub fn shutdown_from_signal(&self) {
        self.running.store(false, Ordering::Release);
        let _ = wake_fd(self.waker.fd());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Raw eventfd, for waking from a signal handler with
    /// [`crate::waker::wake_fd`].
    pub fn waker_fd(&self) -> RawFd {
        self.waker.fd()
    }
}

impl fmt::Debug for ShutdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShutdownHandle")
            .field("running", &self.is_running())
            .finish()
    }
}

pub struct EventLoop<H> {
    config: ServerConfig,
    poller: Poller,
    listener: TcpListener,
    local_addr: SocketAddr,
    registry: Arc<Registry<TcpStream>>,
    handler: H,
    pool: Arc<BufferPool>,
    running: Arc<AtomicBool>,
    events: Vec<Event>,
    stats: LoopStats,
    last_stats: Instant,
}

impl<H: RequestHandler> EventLoop<H> {
    /// Bind `config.listen_addr` and build a loop over `registry`.
    pub fn bind(
        config: ServerConfig,
        registry: Arc<Registry<TcpStream>>,
        handler: H,
    ) -> ReactorResult<Self> {
        let addr = config.listen_addr;
        let listener = TcpListener::bind(addr).map_err(|e| ReactorError::Bind(addr, e))?;
        Self::with_listener(listener, config, registry, handler)
    }

    /// Build a loop around an already bound listener.
    pub fn with_listener(
        listener: TcpListener,
        config: ServerConfig,
        registry: Arc<Registry<TcpStream>>,
        handler: H,
    ) -> ReactorResult<Self> {
        let config = config.validate();

        listener.set_nonblocking(true).map_err(ReactorError::Listener)?;
        let local_addr = listener.local_addr().map_err(ReactorError::Listener)?;

        let waker = Arc::new(Waker::new().map_err(ReactorError::Waker)?);
        let poller =
            Poller::with_waker(config.event_capacity, waker).map_err(ReactorError::Poller)?;
        poller
            .register(listener.as_raw_fd(), LISTENER_TOKEN, Interest::READABLE)
            .map_err(ReactorError::Register)?;

        let pool = Arc::new(BufferPool::new(
            config.request_buffer_size,
            config.max_connections,
        ));

        Ok(Self {
            events: Vec::with_capacity(config.event_capacity),
            config,
            poller,
            listener,
            local_addr,
            registry,
            handler,
            pool,
            running: Arc::new(AtomicBool::new(true)),
            stats: LoopStats::default(),
            last_stats: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn registry(&self) -> &Arc<Registry<TcpStream>> {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: self.running.clone(),
            waker: self.poller.waker(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run until shut down, with the reaper alongside.
    ///
    /// Every connection still registered on exit is closed. Returns the
    /// final counters, or the poll error that stopped the loop.
    pub fn run(&mut self) -> ReactorResult<LoopStats> {
        let reaper = spawn_reaper(
            self.registry.clone(),
            ReaperConfig {
                interval: self.config.reaper_interval,
                policy: IdlePolicy::new(self.config.read_timeout, self.config.write_timeout),
                thread_name: "sluice-reaper".into(),
            },
        )
        .map_err(ReactorError::ReaperSpawn)?;

        kinfo!("listening on {}", self.local_addr);

        let mut result = Ok(());
        while self.is_running() {
            if let Err(e) = self.turn(self.config.poll_timeout) {
                kerror!("event loop stopping: {}", e);
                result = Err(e);
                break;
            }
        }

        let reaper_stats = reaper.shutdown();
        let remaining = self.close_all();
        kinfo!(
            "event loop stopped: {} (closed {} on exit, reaper evicted {} in {} ticks)",
            self.stats,
            remaining,
            reaper_stats.evicted,
            reaper_stats.ticks
        );

        result.map(|()| self.stats.clone())
    }

    /// One iteration: poll, then dispatch the whole batch.
    ///
    /// Returns the number of events processed.
    pub fn turn(&mut self, timeout: Duration) -> ReactorResult<usize> {
        let n = self
            .poller
            .poll(&mut self.events, Some(timeout))
            .map_err(ReactorError::Poll)?;

        let events = std::mem::take(&mut self.events);
        for event in &events {
            if event.token == LISTENER_TOKEN {
                self.accept_all();
            } else {
                self.dispatch(*event);
            }
        }
        // Hand the allocation back; the batch is never reprocessed.
        self.events = events;
        self.events.clear();

        self.maybe_log_stats();
        Ok(n)
    }

    fn accept_all(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.admit(stream, peer),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // EMFILE and friends: the listener stays readable, retry next turn.
                    kwarn!("accept failed: {}", e);
                    self.stats.errors += 1;
                    break;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.registry.len() >= self.config.max_connections {
            kdebug!("rejecting {}: {} connections open", peer, self.config.max_connections);
            self.stats.rejected += 1;
            return;
        }

        if let Err(e) = stream.set_nonblocking(true) {
            kwarn!("set_nonblocking for {}: {}", peer, e);
            self.stats.errors += 1;
            return;
        }
        let _ = stream.set_nodelay(true);

        let token = self.registry.next_token();
        let fd = stream.as_raw_fd();
        let conn = Connection::new(
            token,
            stream,
            self.pool.clone(),
            self.config.max_request_size,
            Instant::now(),
        );

        if let Err(e) = self.poller.register(fd, token, Interest::READABLE) {
            kwarn!("register {}: {}", peer, e);
            self.stats.errors += 1;
            return;
        }
        self.registry.insert(conn);
        self.stats.accepts += 1;
        ktrace!("accepted {} as conn {}", peer, token);
    }

    fn dispatch(&mut self, event: Event) {
        let handler = &self.handler;
        let outcome = self.registry.with(event.token, |conn| {
            let (read_before, written_before) = (conn.bytes_read(), conn.bytes_written());
            let action = drive(conn, event, handler);
            Dispatched {
                action,
                fd: conn.channel().as_raw_fd(),
                bytes_in: conn.bytes_read() - read_before,
                bytes_out: conn.bytes_written() - written_before,
            }
        });

        let outcome = match outcome {
            Some(o) => o,
            None => {
                // Evicted by the reaper after this batch was polled.
                ktrace!("event for unknown conn {} ignored", event.token);
                return;
            }
        };

        self.stats.bytes_in += outcome.bytes_in;
        self.stats.bytes_out += outcome.bytes_out;

        match outcome.action {
            Action::Continue => {}
            Action::Rearm(interest) => {
                if interest.is_writable() {
                    self.stats.requests += 1;
                }
                if let Err(e) = self.poller.reregister(outcome.fd, event.token, interest) {
                    kwarn!("rearm conn {}: {}", event.token, e);
                    self.close(event.token, outcome.fd, CloseReason::Io(e.kind()));
                }
            }
            Action::Close(reason) => self.finish(event.token, outcome.fd, reason),
        }
    }

    /// Close a live connection from the loop side.
    fn close(&mut self, token: Token, fd: RawFd, reason: CloseReason) {
        self.registry.with(token, |conn| conn.close(reason));
        self.finish(token, fd, reason);
    }

    /// Deregister and drop an already closed connection.
    fn finish(&mut self, token: Token, fd: RawFd, reason: CloseReason) {
        // ENOENT/EBADF if the descriptor is already gone.
        let _ = self.poller.deregister(fd);
        let conn = self.registry.remove(token);

        self.stats.closes += 1;
        if reason == CloseReason::ResponseSent {
            self.stats.responses += 1;
        }
        if reason.is_error() {
            self.stats.errors += 1;
        }
        kdebug!("conn {} closed: {}", token, reason);
        drop(conn);
    }

    /// Close and drop every registered connection.
    fn close_all(&mut self) -> usize {
        let drained = self.registry.drain_all(CloseReason::Shutdown);
        for conn in &drained {
            let _ = self.poller.deregister(conn.channel().as_raw_fd());
        }
        self.stats.closes += drained.len() as u64;
        drained.len()
    }

    fn maybe_log_stats(&mut self) {
        let interval = self.config.stats_interval;
        if interval.is_zero() || self.last_stats.elapsed() < interval {
            return;
        }
        self.last_stats = Instant::now();
        kinfo!(
            "[stats] active={} {} pool(alloc={} reused={} idle={})",
            self.registry.len(),
            self.stats,
            self.pool.allocated(),
            self.pool.reused(),
            self.pool.idle()
        );
    }
}

struct Dispatched {
    action: Action,
    fd: RawFd,
    bytes_in: u64,
    bytes_out: u64,
}

/// Map one epoll event onto connection events: error first, then read,
/// then write. A bare hang-up closes; a readable hang-up is left to the
/// read path, which drains pending bytes before seeing end-of-stream.
fn drive<H: RequestHandler + ?Sized>(
    conn: &mut Connection<TcpStream>,
    event: Event,
    handler: &H,
) -> Action {
    if event.error {
        return conn.handle(ConnEvent::Failed, handler);
    }

    let mut action = Action::Continue;
    let steps = [
        (event.readable, ConnEvent::Readable),
        (event.writable, ConnEvent::Writable),
        (event.hangup && !event.readable, ConnEvent::PeerClosed),
    ];
    for (fired, conn_event) in steps {
        if !fired {
            continue;
        }
        match conn.handle(conn_event, handler) {
            Action::Continue => {}
            close @ Action::Close(_) => return close,
            rearm => action = rearm,
        }
    }
    action
}
