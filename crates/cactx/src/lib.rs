//! # cactx - Per-thread client contexts
//!
//! Every thread that talks to the control-system client library owns or
//! shares one `Context`. The context is created by `attach`, shared with
//! helper threads through `import`, and torn down automatically when the
//! owning thread exits.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cactx::{attach, import, ContextServices};
//!
//! let ctx = attach(ContextServices::new(events))?;
//! let owner = ctx.owner();
//!
//! std::thread::spawn(move || {
//!     let shared = import(owner)?;
//!     // ... issue requests on `shared`
//! });
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   owner thread ──attach──► ContextRegistry ──► Context
//!   helper thread ─import──►        │              │
//!                                   │       ┌──────┴───────┐
//!                                   │       ▼              ▼
//!                          thread-exit  dispatcher     receive
//!                             hooks      thread         thread
//!                                   │
//!                                   ▼
//!                             teardown (owner exit)
//! ```

use std::sync::Arc;

// Re-export core types
pub use cactx_core::{
    CaError,
    CaResult,
    ChannelId,
    ContextId,
    EventHandle,
    HostOp,
    PutId,
    PutStatus,
    SubscriptionId,
    TimeVal,
    UnitId,
    S_DB_BLOCKED,
};

// Re-export kprint macros for debug logging
pub use cactx_core::{kprint, kprintln, kerror, kwarn, kinfo, kdebug, ktrace};
pub use cactx_core::kprint::{LogLevel, init as init_logging, set_log_level, set_flush_enabled};

// Re-export env utilities
pub use cactx_core::{env_get, env_get_bool, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use cactx_runtime::{
    clock,
    local_user_name,
    teardown,
    CompletionDispatcher,
    Context,
    ContextConfig,
    ContextRegistry,
    ContextServices,
    EventFacility,
    IoPoller,
    IoWait,
    IoWaitResult,
    MonotonicClock,
    PendingPut,
    PollMode,
    PutNotifyArgs,
    ReceiveThread,
    ReceiveWorker,
    Role,
    SyncGroup,
    TeardownReport,
    TerminationHooks,
    ThreadExitHooks,
    WaitOutcome,
    WorkerDisposition,
};

/// Create a context owned by the calling thread
///
/// The context is torn down when the thread exits.
pub fn attach(services: ContextServices) -> CaResult<Arc<Context>> {
    ContextRegistry::global().attach_owning(UnitId::current(), services)
}

/// Share `owner`'s context with the calling thread
pub fn import(owner: UnitId) -> CaResult<Arc<Context>> {
    ContextRegistry::global().attach_derived(UnitId::current(), owner)
}

/// Drop `unit`'s imported context
pub fn import_cancel(unit: UnitId) -> CaResult<()> {
    ContextRegistry::global().detach_derived(unit)
}

/// Context bound to the calling thread
pub fn current_context() -> CaResult<Arc<Context>> {
    ContextRegistry::global().lookup(UnitId::current())
}

/// Start the receive worker for `ctx`
///
/// `labor` runs after every receive poll with that poll's progress count.
pub fn spawn_receiver<F>(ctx: &Arc<Context>, poller: Arc<dyn IoPoller>, labor: F) -> CaResult<Arc<ReceiveThread>>
where
    F: FnMut(usize) + Send + 'static,
{
    ReceiveThread::spawn(ContextRegistry::global(), ctx, poller, labor)
}

/// I/O waiter for `poller` on the process clock
pub fn io_wait(poller: Arc<dyn IoPoller>, config: &ContextConfig) -> IoWait {
    IoWait::new(poller, clock(), config)
}

/// Current monotonic time
pub fn now() -> TimeVal {
    clock().now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    struct NullEvents;

    impl EventFacility for NullEvents {
        fn cancel_event(&self, _: EventHandle) -> Result<(), i32> {
            Ok(())
        }
        fn cancel_put_notify(&self, _: &PendingPut) -> Result<(), i32> {
            Ok(())
        }
        fn close(&self) -> Result<(), i32> {
            Ok(())
        }
    }

    struct IdlePoller;

    impl IoPoller for IdlePoller {
        fn poll_for_events(&self, timeout: Duration, _mode: PollMode) -> usize {
            thread::sleep(timeout.min(Duration::from_millis(5)));
            0
        }
    }

    fn services() -> ContextServices {
        ContextServices::new(Arc::new(NullEvents))
            .config(ContextConfig::new().recv_poll_interval(Duration::from_millis(5)))
    }

    #[test]
    fn test_attach_import_and_exit() {
        let (tx, rx) = mpsc::channel();
        let owner = thread::spawn(move || {
            let ctx = attach(services()).unwrap();
            assert_eq!(attach(services()).err(), Some(CaError::AlreadyAttached));
            assert_eq!(current_context().unwrap().id(), ctx.id());

            let owner = UnitId::current();
            let helper = thread::spawn(move || {
                let shared = import(owner).unwrap();
                let again = import(owner).unwrap();
                assert_eq!(shared.id(), again.id());
                import_cancel(UnitId::current()).unwrap();
                assert_eq!(current_context().err(), Some(CaError::NotAttached));
                shared.id()
            });
            assert_eq!(helper.join().unwrap(), ctx.id());
            tx.send(Arc::clone(&ctx)).unwrap();
        });
        owner.join().unwrap();

        let ctx = rx.recv().unwrap();
        assert!(ctx.is_torn_down());
        assert!(ContextRegistry::global().lookup(ctx.owner()).is_err());
    }

    #[test]
    fn test_receiver_stopped_on_owner_exit() {
        let owner = thread::spawn(|| {
            let ctx = attach(services()).unwrap();
            let rx = spawn_receiver(&ctx, Arc::new(IdlePoller), |_| {}).unwrap();
            (ctx, rx)
        });
        let (ctx, rx) = owner.join().unwrap();

        assert!(ctx.is_torn_down());
        assert!(!rx.is_alive());
        assert!(ContextRegistry::global().lookup(rx.unit()).is_err());
    }

    #[test]
    fn test_put_notify_end_to_end() {
        thread::spawn(|| {
            let ctx = attach(services()).unwrap();
            let ch = ctx.add_channel("demo:ao").unwrap();
            let (tx, rx) = mpsc::channel();
            let put = ctx
                .request_put(ch, 6, 1, 42, move |args| {
                    tx.send((args.user_arg, args.status)).unwrap();
                })
                .unwrap();

            assert!(ctx.enqueue_completion(&put, 0));
            assert_eq!(
                rx.recv_timeout(Duration::from_secs(5)).unwrap(),
                (42, PutStatus::Normal)
            );
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_wait_for_io_times_out() {
        thread::spawn(|| {
            let ctx = attach(services()).unwrap();
            let waiter = io_wait(Arc::new(IdlePoller), ctx.config());
            assert_eq!(
                waiter.wait_for_io(&ctx, Some(Duration::from_millis(20))),
                IoWaitResult::TimedOut
            );
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_now_advances() {
        let a = now();
        thread::sleep(Duration::from_millis(30));
        assert!(now() >= a);
    }
}
