//! # sluice-reactor
//!
//! Readiness-driven connection engine on Linux `epoll`.
//!
//! One thread runs the [`EventLoop`]: it polls, accepts, and dispatches each
//! readiness event to the connection's state machine. A second thread, the
//! reaper, evicts idle connections from the shared [`Registry`].
//!
//! ## Modules
//!
//! - `poller` - epoll wrapper, tokens and interest sets
//! - `waker` - eventfd used to interrupt a blocked poll
//! - `handler` - `RequestHandler`, the framing predicate and response builder
//! - `connection` - per-connection state machine
//! - `registry` - token-keyed connection map shared with the reaper
//! - `reaper` - idle eviction thread
//! - `event_loop` - the loop itself, `ShutdownHandle`, `LoopStats`
//! - `config` - `ServerConfig`
//! - `error` - `ReactorError`
//!
//! ## Example
//!
//! ```ignore
//! use sluice_reactor::{EventLoop, FnHandler, Registry, ServerConfig};
//! use std::sync::Arc;
//!
//! let handler = FnHandler::new(
//!     |buf: &[u8]| buf.windows(4).any(|w| w == b"\r\n\r\n"),
//!     |_req: &[u8]| b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n".to_vec(),
//! );
//! let registry = Arc::new(Registry::new());
//! let mut ev = EventLoop::bind(ServerConfig::from_env(), registry, handler)?;
//! let stop = ev.shutdown_handle();
//! ev.run()?;
//! ```

#[cfg(not(target_os = "linux"))]
compile_error!("sluice-reactor requires Linux (epoll + eventfd)");

pub mod config;
pub mod connection;
pub mod error;
pub mod event_loop;
pub mod handler;
pub mod poller;
pub mod reaper;
pub mod registry;
pub mod waker;

pub use config::ServerConfig;
pub use connection::{Action, Channel, CloseReason, ConnEvent, ConnState, Connection};
pub use error::{ReactorError, ReactorResult};
pub use event_loop::{EventLoop, LoopStats, ShutdownHandle};
pub use handler::{DelimitedEcho, FnHandler, RequestHandler};
pub use poller::{Event, Interest, Poller, Token};
pub use reaper::{reap_once, spawn_reaper, IdlePolicy, ReaperConfig, ReaperHandle, ReaperStats};
pub use registry::Registry;
pub use waker::Waker;
