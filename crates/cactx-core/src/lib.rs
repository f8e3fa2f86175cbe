//! # cactx-core
//!
//! Core types for the client context layer.
//!
//! This crate is platform-agnostic and contains no OS-specific code.
//! Threads, tick counters and host collaborators live in `cactx-runtime`.
//!
//! ## Modules
//!
//! - `id` - Execution-unit, context, channel, subscription and put identifiers
//! - `time` - `TimeVal` (seconds, microseconds) pairs
//! - `status` - Put completion status and the host status mapping
//! - `error` - Error types
//! - `kprint` - Kernel-style debug printing macros
//! - `env` - Environment variable utilities

pub mod id;
pub mod time;
pub mod status;
pub mod error;
pub mod kprint;
pub mod env;

// Re-exports for convenience
pub use id::{UnitId, ContextId, ChannelId, SubscriptionId, PutId, EventHandle};
pub use time::{TimeVal, USEC_PER_SEC};
pub use status::{PutStatus, S_DB_BLOCKED};
pub use error::{CaError, CaResult, HostOp};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};
