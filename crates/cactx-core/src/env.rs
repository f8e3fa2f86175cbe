//! Environment variable utilities
//!
//! Typed lookups with defaults, used by `ContextConfig::from_env` and the
//! logging setup.
//!
//! ```ignore
//! use cactx_core::env::{env_get, env_get_bool};
//!
//! let ticks: u64 = env_get("CA_MAX_WAIT_TICKS", u32::MAX as u64);
//! let flush = env_get_bool("CA_FLUSH_EPRINT", false);
//! ```

use std::str::FromStr;

/// Parse `key` as `T`, or `None` when unset or unparsable
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Parse `key` as `T`, falling back to `default`
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Boolean lookup: "1", "true", "yes", "on" are true (case-insensitive),
/// any other value is false; unset yields `default`
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// String lookup with default
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var_os(key).is_some()
}
