//! Error types for the client context layer

use core::fmt;

/// Result type for context operations
pub type CaResult<T> = Result<T, CaError>;

/// Errors returned by attach/detach/lookup and by host primitives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaError {
    /// The unit already owns a context
    AlreadyAttached,

    /// The unit named as owner has no context to import
    NoOwningContext,

    /// The unit has no context association
    NotAttached,

    /// The channel is not registered on this context
    UnknownChannel,

    /// The channel's previous put-notify has not been delivered yet
    PutCallbackInProgress,

    /// Context or attachment record allocation failed
    AllocationFailure,

    /// Host environment is misconfigured (e.g. tick rate of zero)
    ConfigurationError(&'static str),

    /// A host synchronization or teardown primitive reported failure
    HostPrimitiveFailure(HostOp),
}

impl fmt::Display for CaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaError::AlreadyAttached => write!(f, "context already attached to this unit"),
            CaError::NoOwningContext => write!(f, "no context to import from owner"),
            CaError::NotAttached => write!(f, "unit not attached to a context"),
            CaError::UnknownChannel => write!(f, "channel not registered on context"),
            CaError::PutCallbackInProgress => write!(f, "put callback already in progress"),
            CaError::AllocationFailure => write!(f, "allocation failed"),
            CaError::ConfigurationError(msg) => write!(f, "configuration error: {}", msg),
            CaError::HostPrimitiveFailure(op) => write!(f, "host primitive failed: {}", op),
        }
    }
}

impl std::error::Error for CaError {}

/// The host step that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOp {
    /// Giving a semaphore
    SemaphoreGive,
    /// Closing (deleting) a semaphore
    SemaphoreClose,
    /// Suspending the receive worker
    WorkerSuspend,
    /// Terminating the receive worker
    WorkerTerminate,
    /// Spawning a worker thread
    ThreadSpawn,
    /// Canceling an event subscription (host status attached)
    EventCancel(i32),
    /// Canceling an in-flight put notification (host status attached)
    PutNotifyCancel(i32),
    /// Closing the local event facility (host status attached)
    EventClose(i32),
    /// Removing a unit's registry binding
    BindingRemove,
}

impl fmt::Display for HostOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostOp::SemaphoreGive => write!(f, "semaphore give"),
            HostOp::SemaphoreClose => write!(f, "semaphore close"),
            HostOp::WorkerSuspend => write!(f, "worker suspend"),
            HostOp::WorkerTerminate => write!(f, "worker terminate"),
            HostOp::ThreadSpawn => write!(f, "thread spawn"),
            HostOp::EventCancel(s) => write!(f, "event cancel (status {})", s),
            HostOp::PutNotifyCancel(s) => write!(f, "put-notify cancel (status {})", s),
            HostOp::EventClose(s) => write!(f, "event facility close (status {})", s),
            HostOp::BindingRemove => write!(f, "registry binding removal"),
        }
    }
}

impl From<HostOp> for CaError {
    fn from(op: HostOp) -> Self {
        CaError::HostPrimitiveFailure(op)
    }
}
