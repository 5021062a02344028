//! Transfer engine configuration.

use sluice_core::constants::{PROGRESS_INTERVAL, TRANSFER_BUFFER_SIZE};
use sluice_core::env::{env_get, env_get_bool, env_get_bytes};

/// Largest single `sendfile(2)` request Linux will honour.
pub const MAX_DIRECT_CHUNK: usize = 0x7fff_f000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Fallback copy buffer.
    pub buffer_size: usize,
    /// Report progress each time the count crosses a multiple of this.
    pub progress_interval: u64,
    /// Try the direct (kernel) path first.
    pub fast_path: bool,
    /// Upper bound per direct transfer call.
    pub max_direct_chunk: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl TransferConfig {
    /// Defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SLUICE_TRANSFER_BUFFER` - fallback buffer size (`256K`)
    /// - `SLUICE_PROGRESS_INTERVAL` - progress step in bytes (`1M`)
    /// - `SLUICE_FAST_PATH` - `0`/`false` to force the buffered path
    pub fn from_env() -> Self {
        Self {
            buffer_size: env_get_bytes("SLUICE_TRANSFER_BUFFER", TRANSFER_BUFFER_SIZE),
            progress_interval: env_get_bytes("SLUICE_PROGRESS_INTERVAL", PROGRESS_INTERVAL as usize)
                as u64,
            fast_path: env_get_bool("SLUICE_FAST_PATH", true),
            max_direct_chunk: env_get("SLUICE_MAX_DIRECT_CHUNK", MAX_DIRECT_CHUNK),
        }
        .validate()
    }

    /// Library defaults only.
    pub fn new() -> Self {
        Self {
            buffer_size: TRANSFER_BUFFER_SIZE,
            progress_interval: PROGRESS_INTERVAL,
            fast_path: true,
            max_direct_chunk: MAX_DIRECT_CHUNK,
        }
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    pub fn progress_interval(mut self, bytes: u64) -> Self {
        self.progress_interval = bytes;
        self
    }

    pub fn fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    pub fn max_direct_chunk(mut self, bytes: usize) -> Self {
        self.max_direct_chunk = bytes;
        self
    }

    /// Clamp zero sizes to something that makes progress.
    pub fn validate(mut self) -> Self {
        self.buffer_size = self.buffer_size.max(1);
        self.progress_interval = self.progress_interval.max(1);
        self.max_direct_chunk = self.max_direct_chunk.clamp(1, MAX_DIRECT_CHUNK);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = TransferConfig::new();
        assert_eq!(c.buffer_size, 256 * 1024);
        assert_eq!(c.progress_interval, 1024 * 1024);
        assert!(c.fast_path);
    }

    #[test]
    fn test_validate() {
        let c = TransferConfig::new()
            .buffer_size(0)
            .progress_interval(0)
            .max_direct_chunk(usize::MAX)
            .validate();
        assert_eq!(c.buffer_size, 1);
        assert_eq!(c.progress_interval, 1);
        assert_eq!(c.max_direct_chunk, MAX_DIRECT_CHUNK);
    }

    #[test]
    fn test_env_disables_fast_path() {
        std::env::set_var("SLUICE_FAST_PATH", "off");
        let c = TransferConfig::from_env();
        std::env::remove_var("SLUICE_FAST_PATH");
        assert!(!c.fast_path);
    }
}
