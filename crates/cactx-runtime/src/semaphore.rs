//! Binary semaphore over `Mutex` + `Condvar`
//!
//! Starts empty. `give()` makes one pending signal available (further
//! gives coalesce), `take()` consumes it or waits. Closing models deleting
//! the host semaphore: waiters are released with `WaitOutcome::Closed`
//! and later gives or closes report a host primitive failure.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use cactx_core::error::{CaResult, HostOp};

/// Result of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A signal was consumed
    Signaled,
    /// The timeout elapsed first
    TimedOut,
    /// The semaphore was closed
    Closed,
}

#[derive(Debug, Default)]
struct SemState {
    /// A give is pending
    full: bool,
    closed: bool,
}

/// Binary semaphore
#[derive(Debug, Default)]
pub struct BinarySemaphore {
    state: Mutex<SemState>,
    condvar: Condvar,
}

impl BinarySemaphore {
    /// Create an empty semaphore
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SemState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Post a signal, waking one waiter
    pub fn give(&self) -> CaResult<()> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(HostOp::SemaphoreGive.into());
            }
            state.full = true;
        }
        self.condvar.notify_one();
        Ok(())
    }

    /// Wait for a signal
    ///
    /// `None` waits forever; `Some(Duration::ZERO)` only polls.
    pub fn take(&self, timeout: Option<Duration>) -> WaitOutcome {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.lock();
        loop {
            if state.full {
                state.full = false;
                return WaitOutcome::Signaled;
            }
            if state.closed {
                return WaitOutcome::Closed;
            }
            match (timeout, deadline) {
                (None, _) | (Some(_), None) => {
                    // no timeout, or one too large to represent
                    state = self.condvar.wait(state).unwrap_or_else(|e| e.into_inner());
                }
                (Some(_), Some(deadline)) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    let (guard, _) = self
                        .condvar
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|e| e.into_inner());
                    state = guard;
                }
            }
        }
    }

    /// Consume a pending signal without waiting
    #[inline]
    pub fn try_take(&self) -> bool {
        self.take(Some(Duration::ZERO)) == WaitOutcome::Signaled
    }

    /// Delete the semaphore, releasing all waiters
    pub fn close(&self) -> CaResult<()> {
        {
            let mut state = self.lock();
            if state.closed {
                return Err(HostOp::SemaphoreClose.into());
            }
            state.closed = true;
        }
        self.condvar.notify_all();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
