//! Thread-exit termination hooks
//!
//! Arming a unit stores a guard in the calling thread's thread-local
//! storage. When the thread exits the guard is dropped and every hook
//! installed on each armed facility runs with the unit's id, last
//! installed first. The thread's OS resources are not reclaimed until
//! the hooks return.
//!
//! Only the calling thread can be armed; there is no way to attach a
//! destructor to another thread's TLS.

use std::cell::RefCell;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use cactx_core::error::{CaError, CaResult};
use cactx_core::id::UnitId;
use cactx_core::{kdebug, kwarn};

use crate::host::{ExitHook, TerminationHooks};

/// Termination hooks driven by thread-local destructors
pub struct ThreadExitHooks {
    hooks: Mutex<Vec<ExitHook>>,
    this: Weak<ThreadExitHooks>,
}

impl ThreadExitHooks {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            hooks: Mutex::new(Vec::new()),
            this: this.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ExitHook>> {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn hook_count(&self) -> usize {
        self.lock().len()
    }

    /// Run every hook for `unit`, newest first
    pub fn run(&self, unit: UnitId) {
        // hooks may install or arm; don't hold the lock while they run
        let hooks: Vec<ExitHook> = self.lock().clone();
        for hook in hooks.iter().rev() {
            hook(unit);
        }
    }
}

impl TerminationHooks for ThreadExitHooks {
    fn install(&self, hook: ExitHook) -> CaResult<()> {
        let mut hooks = self.lock();
        hooks.try_reserve(1).map_err(|_| CaError::AllocationFailure)?;
        hooks.push(hook);
        Ok(())
    }

    fn arm(&self, unit: UnitId) {
        if unit != UnitId::current() {
            kdebug!("{} is not the calling thread; exit hooks not armed", unit);
            return;
        }
        let source = self.this.clone();
        let armed = EXIT_GUARD.try_with(|slot| {
            slot.borrow_mut()
                .get_or_insert_with(|| ExitGuard {
                    unit,
                    sources: Vec::new(),
                })
                .add(source)
        });
        if armed.is_err() {
            kwarn!("{} is exiting; exit hooks not armed", unit);
        }
    }
}

struct ExitGuard {
    unit: UnitId,
    sources: Vec<Weak<ThreadExitHooks>>,
}

impl ExitGuard {
    fn add(&mut self, source: Weak<ThreadExitHooks>) {
        if !self.sources.iter().any(|s| s.ptr_eq(&source)) {
            self.sources.push(source);
        }
    }
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        for source in self.sources.iter().rev() {
            if let Some(hooks) = source.upgrade() {
                hooks.run(self.unit);
            }
        }
    }
}

thread_local! {
    static EXIT_GUARD: RefCell<Option<ExitGuard>> = const { RefCell::new(None) };
}
