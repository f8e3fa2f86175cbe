//! Host collaborator interfaces
//!
//! The protocol engine, the database event facility and the thread
//! environment are outside this crate. Each capability the context layer
//! consumes is one trait here.

use std::sync::Arc;
use std::time::Duration;

use cactx_core::error::CaResult;
use cactx_core::id::{EventHandle, UnitId};

use crate::completion::PendingPut;

/// Which half of the socket traffic a poll services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    /// Flush queued outbound requests
    Sends,
    /// Read and queue inbound messages
    Recvs,
}

/// Socket multiplexing primitive of the protocol engine
pub trait IoPoller: Send + Sync {
    /// Service pending I/O for at most `timeout`
    ///
    /// Returns the number of sockets that made progress; 0 means nothing
    /// more can be done right now.
    fn poll_for_events(&self, timeout: Duration, mode: PollMode) -> usize;
}

/// Local database event facility
///
/// Errors carry the host status code.
pub trait EventFacility: Send + Sync {
    /// Cancel one event subscription
    fn cancel_event(&self, handle: EventHandle) -> Result<(), i32>;

    /// Cancel a put notification the database still holds
    fn cancel_put_notify(&self, put: &PendingPut) -> Result<(), i32>;

    /// Shut the facility down; all local events must be canceled first
    fn close(&self) -> Result<(), i32>;
}

/// Control surface of a context's network-receive worker
pub trait ReceiveWorker: Send + Sync {
    /// Execution unit the worker runs on
    fn unit(&self) -> UnitId;

    /// Whether the worker still exists
    fn is_alive(&self) -> bool;

    /// Remove the worker from health monitoring
    fn unwatch(&self);

    /// Stop the worker from processing further input
    fn suspend(&self) -> CaResult<()>;

    /// Terminate the worker and reclaim it
    fn terminate(&self) -> CaResult<()>;
}

/// Hook invoked with the identity of a terminating unit
pub type ExitHook = Arc<dyn Fn(UnitId) + Send + Sync>;

/// Per-unit termination notification
///
/// Hooks must run before the host reclaims anything the unit owns, and
/// later-installed hooks run first.
pub trait TerminationHooks: Send + Sync {
    /// Register a hook for every unit this facility is armed for
    fn install(&self, hook: ExitHook) -> CaResult<()>;

    /// Make the installed hooks fire when `unit` terminates
    fn arm(&self, unit: UnitId);
}

/// Login name of the process owner, `None` if it cannot be determined
pub fn local_user_name() -> Option<String> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            use nix::unistd::{getuid, User};
            match User::from_uid(getuid()) {
                Ok(Some(user)) => Some(user.name),
                _ => std::env::var("USER").ok(),
            }
        } else {
            std::env::var("USERNAME").ok()
        }
    }
}
