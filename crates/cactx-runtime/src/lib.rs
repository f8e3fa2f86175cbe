//! # cactx-runtime
//!
//! Runtime for per-thread client contexts.
//!
//! This crate provides:
//! - The unit → context registry and thread-exit termination hooks
//! - A wraparound-safe monotonic clock over the host tick counter
//! - Flush-then-wait I/O coordination
//! - Put-notify completion dispatch
//! - Ordered context teardown
//! - The per-context receive worker

pub mod config;
pub mod clock;
pub mod semaphore;
pub mod host;
pub mod hooks;
pub mod completion;
pub mod context;
pub mod registry;
pub mod dispatcher;
pub mod io_wait;
pub mod teardown;
pub mod receive;
pub mod watchdog;

// Re-exports
pub use config::{ConfigError, ContextConfig};
pub use clock::{clock, platform_ticks, InstantTicks, MonotonicClock, TickSource};
pub use semaphore::{BinarySemaphore, WaitOutcome};
pub use host::{local_user_name, EventFacility, ExitHook, IoPoller, PollMode, ReceiveWorker, TerminationHooks};
pub use hooks::ThreadExitHooks;
pub use completion::{CompletionQueue, PendingPut, PutCallback, PutNotifyArgs};
pub use context::{Context, ContextServices, DerivedAttachment, Subscription};
pub use registry::{ContextRegistry, Role};
pub use dispatcher::{CompletionDispatcher, DispatchStats};
pub use io_wait::{IoWait, IoWaitResult, SyncGroup};
pub use teardown::{teardown, TeardownReport, WorkerDisposition};
pub use receive::{ReceiveStats, ReceiveThread};
pub use watchdog::{watchdog, Watchdog};
