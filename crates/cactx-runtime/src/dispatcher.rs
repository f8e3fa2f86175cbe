//! Put-notify completion dispatcher
//!
//! One thread per context waits on the context's labor semaphore and
//! drains the completion queue. Callbacks run under the event lock, in
//! queue order, and never concurrently with each other.
//!
//! After each drain leaves the queue empty the drained semaphore is given
//! once, releasing any `block_until_puts_drained` caller.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use cactx_core::error::{CaError, CaResult, HostOp};
use cactx_core::id::UnitId;
use cactx_core::{kdebug, kerror, ktrace};

use crate::context::Context;
use crate::semaphore::WaitOutcome;

/// Counters returned when the dispatcher thread exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Wakeups that ran a drain
    pub cycles: u64,
    /// Callbacks delivered
    pub dispatched: u64,
}

/// Handle to a context's dispatch thread
#[derive(Debug)]
pub struct CompletionDispatcher {
    unit: UnitId,
    handle: Option<JoinHandle<DispatchStats>>,
}

impl CompletionDispatcher {
    /// Spawn the dispatch thread for `ctx` and record it on the context
    pub fn start(ctx: &Arc<Context>) -> CaResult<()> {
        let name = format!("{}-{}", ctx.config().dispatcher_thread_prefix, ctx.id());
        let (tx, rx) = mpsc::sync_channel(1);
        let worker_ctx = Arc::clone(ctx);

        let handle = ctx
            .config()
            .thread_builder(name)
            .spawn(move || {
                let _ = tx.send(UnitId::current());
                dispatch_loop(worker_ctx)
            })
            .map_err(|e| {
                kerror!("failed to spawn dispatcher for {}: {}", ctx.id(), e);
                CaError::from(HostOp::ThreadSpawn)
            })?;

        let unit = rx.recv().map_err(|_| CaError::from(HostOp::ThreadSpawn))?;
        kdebug!("dispatcher for {} running on {}", ctx.id(), unit);
        ctx.set_dispatcher(CompletionDispatcher {
            unit,
            handle: Some(handle),
        });
        Ok(())
    }

    #[inline]
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// Close the labor semaphore and wait for the thread to exit
    ///
    /// Returns `None` when called from the dispatch thread itself, which
    /// cannot join itself, or when the thread panicked.
    pub(crate) fn stop(mut self, ctx: &Context) -> Option<DispatchStats> {
        if let Err(e) = ctx.labor().close() {
            kerror!("{}: closing dispatcher semaphore: {}", ctx.id(), e);
        }
        if self.unit == UnitId::current() {
            return None;
        }
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(stats) => Some(stats),
            Err(_) => {
                kerror!("{}: dispatcher thread panicked", ctx.id());
                None
            }
        }
    }

    /// Deliver every queued completion, then signal drained
    ///
    /// Returns the number of callbacks run.
    pub fn drain(ctx: &Context) -> usize {
        let _gate = ctx.dispatch_gate();
        let mut count = 0;

        while let Some((put, args)) = ctx.put_queue().pop() {
            {
                let _events = ctx.lock_events();
                let callback = put.callback();
                if panic::catch_unwind(AssertUnwindSafe(|| callback(&args))).is_err() {
                    kerror!("{}: callback for {:?} panicked", ctx.id(), put.id());
                }
            }
            if !ctx.put_queue().settle(&put) {
                ktrace!("{:?} queued again during its callback", put.id());
            }
            ktrace!("{:?} delivered ({})", put.id(), args.status);
            count += 1;
        }

        if let Err(e) = ctx.drained().give() {
            kerror!("{}: drained signal: {}", ctx.id(), e);
        }
        count
    }
}

fn dispatch_loop(ctx: Arc<Context>) -> DispatchStats {
    let mut stats = DispatchStats::default();
    loop {
        match ctx.labor().take(None) {
            WaitOutcome::Signaled => {
                stats.cycles += 1;
                stats.dispatched += CompletionDispatcher::drain(&ctx) as u64;
            }
            WaitOutcome::TimedOut => continue,
            WaitOutcome::Closed => break,
        }
    }
    kdebug!(
        "dispatcher for {} exiting: {} cycles, {} callbacks",
        ctx.id(),
        stats.cycles,
        stats.dispatched
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::services;
    use crate::completion::PendingPut;
    use cactx_core::status::{PutStatus, S_DB_BLOCKED};
    use std::sync::{Barrier, Mutex, OnceLock};
    use std::thread;
    use std::time::Duration;

    fn started() -> Arc<Context> {
        let ctx = Context::new(UnitId::current(), services());
        CompletionDispatcher::start(&ctx).unwrap();
        ctx
    }

    fn stop(ctx: &Context) -> DispatchStats {
        ctx.take_dispatcher().unwrap().stop(ctx).unwrap()
    }

    #[test]
    fn test_callbacks_in_queue_order() {
        let ctx = Context::new(UnitId::current(), services());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let puts: Vec<_> = ["A", "B", "C"]
            .iter()
            .enumerate()
            .map(|(i, rec)| {
                let ch = ctx.add_channel(*rec).unwrap();
                let seen = Arc::clone(&seen);
                ctx.request_put(ch, 6, 1, i as u64, move |args| {
                    seen.lock().unwrap().push(args.user_arg);
                })
                .unwrap()
            })
            .collect();

        for put in &puts {
            ctx.enqueue_completion(put, 0);
        }

        assert_eq!(CompletionDispatcher::drain(&ctx), 3);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert!(puts.iter().all(|p| !p.is_busy()));
    }

    #[test]
    fn test_status_delivered_to_callback() {
        let ctx = Context::new(UnitId::current(), services());
        let seen = Arc::new(Mutex::new(Vec::new()));

        for code in [0, S_DB_BLOCKED, -1] {
            let ch = ctx.add_channel("rec").unwrap();
            let seen = Arc::clone(&seen);
            let put = ctx
                .request_put(ch, 6, 1, 0, move |args| {
                    seen.lock().unwrap().push(args.status);
                })
                .unwrap();
            ctx.enqueue_completion(&put, code);
        }

        CompletionDispatcher::drain(&ctx);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![PutStatus::Normal, PutStatus::PutInProgress, PutStatus::PutFailed]
        );
    }

    #[test]
    fn test_drained_signal_once_per_cycle() {
        let ctx = Context::new(UnitId::current(), services());
        assert_eq!(CompletionDispatcher::drain(&ctx), 0);
        assert_eq!(ctx.block_until_puts_drained(Some(Duration::ZERO)), WaitOutcome::Signaled);
        assert_eq!(ctx.block_until_puts_drained(Some(Duration::ZERO)), WaitOutcome::TimedOut);
    }

    #[test]
    fn test_panicking_callback_does_not_stop_drain() {
        let ctx = Context::new(UnitId::current(), services());
        let ch = ctx.add_channel("a").unwrap();
        let bad = ctx.request_put(ch, 6, 1, 0, |_| panic!("boom")).unwrap();
        let ch = ctx.add_channel("b").unwrap();
        let good = ctx.request_put(ch, 6, 1, 0, |_| {}).unwrap();

        ctx.enqueue_completion(&bad, 0);
        ctx.enqueue_completion(&good, 0);
        assert_eq!(CompletionDispatcher::drain(&ctx), 2);
        assert!(!bad.is_busy());
        assert!(!good.is_busy());
    }

    #[test]
    fn test_requeue_during_callback_stays_busy() {
        let ctx = Context::new(UnitId::current(), services());
        let ch = ctx.add_channel("rec:ao").unwrap();
        let entered = Arc::new(Barrier::new(2));
        let resume = Arc::new(Barrier::new(2));
        let this: Arc<OnceLock<Arc<PendingPut>>> = Arc::new(OnceLock::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let put = {
            let (entered, resume) = (Arc::clone(&entered), Arc::clone(&resume));
            let (this, seen) = (Arc::clone(&this), Arc::clone(&seen));
            ctx.request_put(ch, 6, 1, 0, move |args| {
                if args.status == PutStatus::PutInProgress {
                    entered.wait();
                    resume.wait();
                }
                let busy = this.get().is_some_and(|p| p.is_busy());
                seen.lock().unwrap().push((args.status, busy));
            })
            .unwrap()
        };
        let _ = this.set(Arc::clone(&put));

        assert!(ctx.enqueue_completion(&put, S_DB_BLOCKED));
        let drainer = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || CompletionDispatcher::drain(&ctx))
        };

        // the database reports the final status while the first callback runs
        entered.wait();
        assert!(ctx.enqueue_completion(&put, 0));
        assert!(matches!(
            ctx.request_put(ch, 6, 1, 1, |_| {}),
            Err(CaError::PutCallbackInProgress)
        ));
        resume.wait();

        assert_eq!(drainer.join().unwrap(), 2);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(PutStatus::PutInProgress, true), (PutStatus::Normal, true)]
        );
        assert!(!put.is_busy());
        assert!(ctx.request_put(ch, 6, 1, 1, |_| {}).is_ok());
    }

    #[test]
    fn test_thread_delivers_racing_producers() {
        let ctx = started();
        let delivered = Arc::new(Mutex::new(Vec::new()));

        let producers: Vec<_> = (0..4u64)
            .map(|t| {
                let ctx = Arc::clone(&ctx);
                let delivered = Arc::clone(&delivered);
                thread::spawn(move || {
                    for i in 0..25u64 {
                        let ch = ctx.add_channel(format!("rec{}:{}", t, i)).unwrap();
                        let delivered = Arc::clone(&delivered);
                        let put = ctx
                            .request_put(ch, 6, 1, t * 100 + i, move |args| {
                                delivered.lock().unwrap().push(args.user_arg);
                            })
                            .unwrap();
                        assert!(ctx.enqueue_completion(&put, 0));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        // wait for the final drain
        while ctx.pending_completions() > 0 {
            ctx.block_until_puts_drained(Some(Duration::from_millis(100)));
        }
        let stats = stop(&ctx);

        let delivered = delivered.lock().unwrap();
        assert_eq!(delivered.len(), 100);
        assert_eq!(stats.dispatched, 100);
        // per-producer order preserved
        for t in 0..4u64 {
            let mine: Vec<_> = delivered.iter().filter(|v| **v / 100 == t).copied().collect();
            let expected: Vec<_> = (0..25).map(|i| t * 100 + i).collect();
            assert_eq!(mine, expected);
        }
    }

    #[test]
    fn test_stop_joins_thread() {
        let ctx = started();
        let unit = ctx.dispatcher_unit().unwrap();
        assert_ne!(unit, UnitId::current());
        assert_eq!(stop(&ctx), DispatchStats::default());
        assert!(ctx.labor().is_closed());
    }
}
