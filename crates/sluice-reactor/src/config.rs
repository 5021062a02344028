//! Server configuration.
//!
//! Library defaults with environment overrides, read once at startup.
//!
//! ```rust,ignore
//! use sluice_reactor::config::ServerConfig;
//!
//! let config = ServerConfig::from_env()
//!     .listen_addr("0.0.0.0:8080".parse()?)
//!     .read_timeout(Duration::from_secs(5));
//! ```

use sluice_core::constants::{KIB, REQUEST_BUFFER_SIZE};
use sluice_core::env::{env_get, env_get_bytes, env_get_ms};

use std::net::SocketAddr;
use std::time::Duration;

/// Library defaults.
pub mod defaults {
    pub const LISTEN_ADDR: &str = "127.0.0.1:9090";
    pub const READ_TIMEOUT_MS: u64 = 3_000;
    pub const WRITE_TIMEOUT_MS: u64 = 3_000;
    pub const REAPER_INTERVAL_MS: u64 = 1_000;
    pub const POLL_TIMEOUT_MS: u64 = 500;
    pub const MAX_REQUEST_SIZE: usize = 64 * super::KIB;
    pub const MAX_CONNECTIONS: usize = 1024;
    pub const EVENT_CAPACITY: usize = 256;
    pub const STATS_INTERVAL_MS: u64 = 5_000;
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to.
    pub listen_addr: SocketAddr,
    /// Idle limit while waiting for a complete request.
    pub read_timeout: Duration,
    /// Idle limit while the response is being drained.
    pub write_timeout: Duration,
    /// How often the reaper scans the registry.
    pub reaper_interval: Duration,
    /// Upper bound on a single `epoll_wait`.
    pub poll_timeout: Duration,
    /// Initial inbound buffer per connection.
    pub request_buffer_size: usize,
    /// Inbound buffer growth limit; larger requests are dropped.
    pub max_request_size: usize,
    /// Accepted connections beyond this are closed immediately.
    pub max_connections: usize,
    /// Events fetched per `epoll_wait`.
    pub event_capacity: usize,
    /// Period of the stats log line. Zero disables it.
    pub stats_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ServerConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SLUICE_LISTEN` - listen address (`host:port`)
    /// - `SLUICE_READ_TIMEOUT_MS` - request idle timeout
    /// - `SLUICE_WRITE_TIMEOUT_MS` - response idle timeout
    /// - `SLUICE_REAPER_INTERVAL_MS` - reaper scan period
    /// - `SLUICE_POLL_TIMEOUT_MS` - bounded epoll wait
    /// - `SLUICE_REQUEST_BUFFER` - inbound buffer size (`1K`, `4096`, ...)
    /// - `SLUICE_MAX_REQUEST` - inbound growth limit
    /// - `SLUICE_MAX_CONNECTIONS` - connection cap
    /// - `SLUICE_EVENT_CAPACITY` - events per poll
    /// - `SLUICE_STATS_INTERVAL_MS` - stats log period (0 = off)
    pub fn from_env() -> Self {
        let base = Self::new();
        Self {
            listen_addr: env_get("SLUICE_LISTEN", base.listen_addr),
            read_timeout: env_get_ms("SLUICE_READ_TIMEOUT_MS", defaults::READ_TIMEOUT_MS),
            write_timeout: env_get_ms("SLUICE_WRITE_TIMEOUT_MS", defaults::WRITE_TIMEOUT_MS),
            reaper_interval: env_get_ms("SLUICE_REAPER_INTERVAL_MS", defaults::REAPER_INTERVAL_MS),
            poll_timeout: env_get_ms("SLUICE_POLL_TIMEOUT_MS", defaults::POLL_TIMEOUT_MS),
            request_buffer_size: env_get_bytes("SLUICE_REQUEST_BUFFER", REQUEST_BUFFER_SIZE),
            max_request_size: env_get_bytes("SLUICE_MAX_REQUEST", defaults::MAX_REQUEST_SIZE),
            max_connections: env_get("SLUICE_MAX_CONNECTIONS", defaults::MAX_CONNECTIONS),
            event_capacity: env_get("SLUICE_EVENT_CAPACITY", defaults::EVENT_CAPACITY),
            stats_interval: env_get_ms("SLUICE_STATS_INTERVAL_MS", defaults::STATS_INTERVAL_MS),
        }
    }

    /// Library defaults only, no environment lookup.
    pub fn new() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            read_timeout: Duration::from_millis(defaults::READ_TIMEOUT_MS),
            write_timeout: Duration::from_millis(defaults::WRITE_TIMEOUT_MS),
            reaper_interval: Duration::from_millis(defaults::REAPER_INTERVAL_MS),
            poll_timeout: Duration::from_millis(defaults::POLL_TIMEOUT_MS),
            request_buffer_size: REQUEST_BUFFER_SIZE,
            max_request_size: defaults::MAX_REQUEST_SIZE,
            max_connections: defaults::MAX_CONNECTIONS,
            event_capacity: defaults::EVENT_CAPACITY,
            stats_interval: Duration::from_millis(defaults::STATS_INTERVAL_MS),
        }
    }

    // Builder methods

    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Set both idle thresholds at once.
    pub fn idle_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = d;
        self.write_timeout = d;
        self
    }

    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.read_timeout = d;
        self
    }

    pub fn write_timeout(mut self, d: Duration) -> Self {
        self.write_timeout = d;
        self
    }

    pub fn reaper_interval(mut self, d: Duration) -> Self {
        self.reaper_interval = d;
        self
    }

    pub fn poll_timeout(mut self, d: Duration) -> Self {
        self.poll_timeout = d;
        self
    }

    pub fn request_buffer_size(mut self, size: usize) -> Self {
        self.request_buffer_size = size;
        self
    }

    pub fn max_request_size(mut self, size: usize) -> Self {
        self.max_request_size = size;
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    pub fn event_capacity(mut self, n: usize) -> Self {
        self.event_capacity = n;
        self
    }

    pub fn stats_interval(mut self, d: Duration) -> Self {
        self.stats_interval = d;
        self
    }

    /// Clamp values that would make the loop misbehave.
    pub fn validate(mut self) -> Self {
        self.request_buffer_size = self.request_buffer_size.max(64);
        self.max_request_size = self.max_request_size.max(self.request_buffer_size);
        self.event_capacity = self.event_capacity.max(1);
        self.max_connections = self.max_connections.max(1);
        if self.poll_timeout.is_zero() {
            self.poll_timeout = Duration::from_millis(defaults::POLL_TIMEOUT_MS);
        }
        if self.reaper_interval.is_zero() {
            self.reaper_interval = Duration::from_millis(defaults::REAPER_INTERVAL_MS);
        }
        self
    }
}
