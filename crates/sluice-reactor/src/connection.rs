//! Per-connection state machine.
//!
//! ```text
//!   AwaitingRequest ──(predicate: complete)──▶ RequestComplete ──▶ SendingResponse
//!         │                                                             │
//!         └──────────── EOS / error / timeout ──────▶ Closed ◀── drained / error
//! ```
//!
//! A connection is driven only through [`Connection::handle`], which maps
//! every `(state, event)` pair to an [`Action`] for the event loop: keep
//! the current interest, switch interest, or close. Connections are
//! one-shot: after the response is drained the connection closes.
//!
//! The connection never touches the poller. The loop applies `Rearm` and
//! `Close` to the multiplexer and registry.

use crate::handler::RequestHandler;
use crate::poller::{Interest, Token};

use sluice_core::{BufferPool, ByteBuffer, Fill};

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Byte stream a connection runs over.
pub trait Channel: Read + Write {
    /// Shut both directions so any pending or later I/O fails.
    fn shutdown_both(&mut self) -> io::Result<()>;
}

impl Channel for TcpStream {
    fn shutdown_both(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    AwaitingRequest,
    RequestComplete,
    SendingResponse,
    Closed,
}

impl ConnState {
    pub const ALL: [ConnState; 4] = [
        ConnState::AwaitingRequest,
        ConnState::RequestComplete,
        ConnState::SendingResponse,
        ConnState::Closed,
    ];
}

/// Readiness, as seen by one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    Readable,
    Writable,
    /// Error readiness (`EPOLLERR`).
    Failed,
    /// Hang-up readiness (`EPOLLHUP`).
    PeerClosed,
}

impl ConnEvent {
    pub const ALL: [ConnEvent; 4] = [
        ConnEvent::Readable,
        ConnEvent::Writable,
        ConnEvent::Failed,
        ConnEvent::PeerClosed,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent end-of-stream or hung up.
    PeerClosed,
    /// Response fully written.
    ResponseSent,
    /// Read or write failed.
    Io(io::ErrorKind),
    /// Request exceeded the inbound growth limit.
    RequestTooLarge,
    /// Evicted by the reaper.
    IdleTimeout,
    /// Loop shutting down.
    Shutdown,
    /// Error readiness reported by the multiplexer.
    Failed,
}

impl CloseReason {
    /// Whether this close counts as a connection error.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            CloseReason::Io(_) | CloseReason::RequestTooLarge | CloseReason::Failed
        )
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => write!(f, "peer closed"),
            CloseReason::ResponseSent => write!(f, "response sent"),
            CloseReason::Io(kind) => write!(f, "i/o error: {:?}", kind),
            CloseReason::RequestTooLarge => write!(f, "request too large"),
            CloseReason::IdleTimeout => write!(f, "idle timeout"),
            CloseReason::Shutdown => write!(f, "shutdown"),
            CloseReason::Failed => write!(f, "socket error"),
        }
    }
}

/// What the loop should do after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Keep the current interest and wait for the next event.
    Continue,
    /// Replace the interest set.
    Rearm(Interest),
    /// Deregister and drop the connection.
    Close(CloseReason),
}

pub struct Connection<C> {
    token: Token,
    channel: C,
    state: ConnState,
    interest: Interest,
    /// `None` once returned to the pool on close.
    inbound: Option<ByteBuffer>,
    /// Staged response, present from `SendingResponse` on.
    outbound: Option<ByteBuffer>,
    last_activity: Instant,
    request_complete: bool,
    close_reason: Option<CloseReason>,
    max_request_size: usize,
    bytes_read: u64,
    bytes_written: u64,
    pool: Arc<BufferPool>,
}

impl<C: Channel> Connection<C> {
    /// A freshly accepted connection, read-interested.
    pub fn new(
        token: Token,
        channel: C,
        pool: Arc<BufferPool>,
        max_request_size: usize,
        now: Instant,
    ) -> Self {
        Self {
            token,
            channel,
            state: ConnState::AwaitingRequest,
            interest: Interest::READABLE,
            inbound: Some(pool.acquire()),
            outbound: None,
            last_activity: now,
            request_complete: false,
            close_reason: None,
            max_request_size,
            bytes_read: 0,
            bytes_written: 0,
            pool,
        }
    }

    #[inline]
    pub fn token(&self) -> Token {
        self.token
    }

    #[inline]
    pub fn state(&self) -> ConnState {
        self.state
    }

    /// The interest set currently armed for this connection.
    #[inline]
    pub fn interest(&self) -> Interest {
        self.interest
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    #[inline]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Time since the last transition or byte moved. Zero if `now` is earlier.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Whether the framing predicate has accepted a request.
    pub fn request_complete(&self) -> bool {
        self.request_complete
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Capacity of the inbound buffer (0 once closed).
    pub fn inbound_capacity(&self) -> usize {
        self.inbound.as_ref().map_or(0, ByteBuffer::capacity)
    }

    /// Drive the state machine with one readiness event.
    pub fn handle<H: RequestHandler + ?Sized>(&mut self, event: ConnEvent, handler: &H) -> Action {
        match (self.state, event) {
            (ConnState::Closed, _) => Action::Close(self.close_reason.unwrap_or(CloseReason::Failed)),
            (_, ConnEvent::Failed) => self.close_with(CloseReason::Failed),
            (_, ConnEvent::PeerClosed) => self.close_with(CloseReason::PeerClosed),
            (ConnState::AwaitingRequest, ConnEvent::Readable) => self.on_readable(handler),
            // Spurious: not write-interested yet.
            (ConnState::AwaitingRequest, ConnEvent::Writable) => Action::Continue,
            // Transient; the response is staged within the same dispatch.
            (ConnState::RequestComplete, _) => Action::Continue,
            // Request already framed; extra inbound bytes are ignored.
            (ConnState::SendingResponse, ConnEvent::Readable) => Action::Continue,
            (ConnState::SendingResponse, ConnEvent::Writable) => self.on_writable(),
        }
    }

    fn on_readable<H: RequestHandler + ?Sized>(&mut self, handler: &H) -> Action {
        let inbound = match self.inbound.as_mut() {
            Some(buf) => buf,
            None => return self.close_with(CloseReason::Failed),
        };

        match inbound.fill(&mut self.channel) {
            Ok(Fill::Data(n)) => {
                self.bytes_read += n as u64;
                self.last_activity = Instant::now();
            }
            Ok(Fill::NotReady) => return Action::Continue,
            Ok(Fill::EndOfStream) => return self.close_with(CloseReason::PeerClosed),
            Err(e) => return self.close_with(CloseReason::Io(e.kind())),
        }

        inbound.begin_consume();
        if !handler.is_request_complete(inbound.unread()) {
            inbound.compact();
            if inbound.writable() == 0 {
                let capacity = inbound.capacity();
                if capacity >= self.max_request_size {
                    return self.close_with(CloseReason::RequestTooLarge);
                }
                inbound.grow((capacity * 2).min(self.max_request_size));
            }
            return Action::Continue;
        }

        self.request_complete = true;
        self.state = ConnState::RequestComplete;
        self.last_activity = Instant::now();

        let response = handler.build_response(inbound.unread());
        inbound.reset_for_fill();
        self.outbound = Some(ByteBuffer::from_vec(response));

        self.transition(ConnState::SendingResponse);
        self.interest = Interest::WRITABLE;
        Action::Rearm(Interest::WRITABLE)
    }

    fn on_writable(&mut self) -> Action {
        let outbound = match self.outbound.as_mut() {
            Some(buf) => buf,
            None => return self.close_with(CloseReason::Failed),
        };

        if outbound.has_remaining() {
            match outbound.consume(&mut self.channel) {
                Ok(0) => return Action::Continue,
                Ok(n) => {
                    self.bytes_written += n as u64;
                    self.last_activity = Instant::now();
                }
                Err(e) => return self.close_with(CloseReason::Io(e.kind())),
            }
        }

        if outbound.has_remaining() {
            Action::Continue
        } else {
            self.close_with(CloseReason::ResponseSent)
        }
    }

    fn transition(&mut self, next: ConnState) {
        self.state = next;
        self.last_activity = Instant::now();
    }

    fn close_with(&mut self, reason: CloseReason) -> Action {
        self.close(reason);
        Action::Close(reason)
    }

    /// Close the channel and release buffers.
    ///
    /// Idempotent: returns `false` and changes nothing if already closed.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.state == ConnState::Closed {
            return false;
        }
        self.transition(ConnState::Closed);
        self.close_reason = Some(reason);
        // ENOTCONN when the peer already reset is fine.
        let _ = self.channel.shutdown_both();
        if let Some(buf) = self.inbound.take() {
            self.pool.release(buf);
        }
        self.outbound = None;
        true
    }
}

impl<C> fmt::Debug for Connection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("token", &self.token)
            .field("state", &self.state)
            .field("interest", &self.interest)
            .field("bytes_read", &self.bytes_read)
            .field("bytes_written", &self.bytes_written)
            .field("close_reason", &self.close_reason)
            .finish()
    }
}
