//! # sluice-core
//!
//! Platform-agnostic building blocks shared by the reactor and the transfer
//! engine. Nothing in here touches a file descriptor.
//!
//! ## Modules
//!
//! - `buffer` - `ByteBuffer`, the fill / flip / consume / compact region
//! - `pool` - `BufferPool`, lock-free recycling of same-sized buffers
//! - `cancel` - `CancelFlag` for cooperative cancellation
//! - `env` - environment variable parsing for startup configuration
//! - `kprint` - leveled stderr logging macros

pub mod buffer;
pub mod pool;
pub mod cancel;
pub mod env;
pub mod kprint;

pub use buffer::{ByteBuffer, Fill};
pub use pool::BufferPool;
pub use cancel::{CancelFlag, Cancelled};
pub use env::{env_get, env_get_bool, env_get_bytes, env_get_ms, env_get_opt};
pub use kprint::LogLevel;

/// Size constants used as defaults across the workspace.
pub mod constants {
    pub const KIB: usize = 1024;
    pub const MIB: usize = 1024 * 1024;

    /// Default inbound request buffer per connection.
    pub const REQUEST_BUFFER_SIZE: usize = KIB;

    /// Default fallback copy buffer for the transfer engine.
    pub const TRANSFER_BUFFER_SIZE: usize = 256 * KIB;

    /// Default progress reporting interval.
    pub const PROGRESS_INTERVAL: u64 = MIB as u64;
}
