//! Environment variable helpers for startup configuration.
//!
//! Every tunable in sluice is a plain scalar read once at startup.
//! These helpers parse with a default and never fail.
//!
//! ```ignore
//! use sluice_core::env::{env_get, env_get_bytes, env_get_ms};
//!
//! let max_conns: usize = env_get("SLUICE_MAX_CONNECTIONS", 1024);
//! let read_timeout = env_get_ms("SLUICE_READ_TIMEOUT_MS", 3_000);
//! let chunk = env_get_bytes("SLUICE_TRANSFER_BUFFER", 256 * 1024); // "256K" works
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, falling back to `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parse `key` as `T` if it is set and valid.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag: "1", "true", "yes", "on" are true; "0", "false", "no",
/// "off" are false (case-insensitive). Anything else yields `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Milliseconds as a `Duration`.
#[inline]
pub fn env_get_ms(key: &str, default_ms: u64) -> Duration {
    Duration::from_millis(env_get(key, default_ms))
}

/// Byte size with an optional binary suffix: `4096`, `64K`, `1M`, `2G`
/// (`KiB`/`MiB`/`GiB` and lowercase forms accepted).
#[inline]
pub fn env_get_bytes(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| parse_bytes(&v))
        .unwrap_or(default)
}

/// Parse a byte size such as `"256K"` or `"1MiB"`.
pub fn parse_bytes(s: &str) -> Option<usize> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, suffix) = s.split_at(split);
    let base: usize = digits.parse().ok()?;
    let shift = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        _ => return None,
    };
    base.checked_mul(1usize << shift)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__SLUICE_TEST_UNSET__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_opt_none() {
        let val: Option<u16> = env_get_opt("__SLUICE_TEST_UNSET__");
        assert!(val.is_none());
    }

    #[test]
    fn test_env_get_with_set_var() {
        std::env::set_var("__SLUICE_TEST_NUM__", " 123 ");
        let val: usize = env_get("__SLUICE_TEST_NUM__", 0);
        assert_eq!(val, 123);
        std::env::remove_var("__SLUICE_TEST_NUM__");
    }

    #[test]
    fn test_env_get_invalid_parse() {
        std::env::set_var("__SLUICE_TEST_BAD__", "not_a_number");
        let val: usize = env_get("__SLUICE_TEST_BAD__", 99);
        assert_eq!(val, 99);
        std::env::remove_var("__SLUICE_TEST_BAD__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        let key = "__SLUICE_TEST_BOOL__";
        for v in ["1", "true", "TRUE", "yes", "on"] {
            std::env::set_var(key, v);
            assert!(env_get_bool(key, false), "{}", v);
        }
        for v in ["0", "false", "no", "off"] {
            std::env::set_var(key, v);
            assert!(!env_get_bool(key, true), "{}", v);
        }
        std::env::set_var(key, "garbage");
        assert!(env_get_bool(key, true));
        std::env::remove_var(key);
    }

    #[test]
    fn test_env_get_ms() {
        std::env::set_var("__SLUICE_TEST_MS__", "250");
        assert_eq!(env_get_ms("__SLUICE_TEST_MS__", 1), Duration::from_millis(250));
        std::env::remove_var("__SLUICE_TEST_MS__");
        assert_eq!(env_get_ms("__SLUICE_TEST_MS__", 7), Duration::from_millis(7));
    }

    #[test]
    fn test_parse_bytes() {
        assert_eq!(parse_bytes("4096"), Some(4096));
        assert_eq!(parse_bytes("64K"), Some(64 * 1024));
        assert_eq!(parse_bytes("256kib"), Some(256 * 1024));
        assert_eq!(parse_bytes("1M"), Some(1024 * 1024));
        assert_eq!(parse_bytes("2 GiB"), Some(2 << 30));
        assert_eq!(parse_bytes("12X"), None);
        assert_eq!(parse_bytes("K"), None);
    }

    #[test]
    fn test_env_get_bytes() {
        std::env::set_var("__SLUICE_TEST_BYTES__", "8K");
        assert_eq!(env_get_bytes("__SLUICE_TEST_BYTES__", 1), 8192);
        std::env::remove_var("__SLUICE_TEST_BYTES__");
    }
}
