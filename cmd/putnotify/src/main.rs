//! Put-notify walkthrough
//!
//! Attaches a context on a worker thread, shares it with a helper, issues
//! a few puts whose completions arrive from a simulated database thread,
//! then lets the owner exit so the context is torn down.
//!
//! # Environment Variables
//!
//! - `CA_FLUSH_EPRINT=1` - Flush debug output immediately
//! - `CA_LOG_LEVEL=debug` - Set log level (off, error, warn, info, debug, trace)

use cactx::{attach, import, io_wait, local_user_name, now, spawn_receiver};
use cactx::{kinfo, kwarn, ContextConfig, ContextServices, EventFacility, IoPoller, PollMode};
use cactx::{EventHandle, PendingPut, PutStatus, WaitOutcome, S_DB_BLOCKED};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Event facility that only counts what it is asked to do
#[derive(Default)]
struct LoopbackEvents {
    canceled: AtomicUsize,
}

impl EventFacility for LoopbackEvents {
    fn cancel_event(&self, handle: EventHandle) -> Result<(), i32> {
        kinfo!("cancel event {}", handle.0);
        self.canceled.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cancel_put_notify(&self, put: &PendingPut) -> Result<(), i32> {
        kinfo!("cancel put on {}", put.record());
        Ok(())
    }

    fn close(&self) -> Result<(), i32> {
        kinfo!("event facility closed");
        Ok(())
    }
}

/// Reports two rounds of outbound progress, then idles
#[derive(Default)]
struct LoopbackPoller {
    pending_sends: AtomicUsize,
}

impl IoPoller for LoopbackPoller {
    fn poll_for_events(&self, timeout: Duration, mode: PollMode) -> usize {
        match mode {
            PollMode::Sends => {
                let left = self.pending_sends.load(Ordering::SeqCst);
                if left > 0 {
                    self.pending_sends.fetch_sub(1, Ordering::SeqCst);
                }
                left
            }
            PollMode::Recvs => {
                thread::sleep(timeout.min(Duration::from_millis(10)));
                0
            }
        }
    }
}

fn main() {
    println!("=== Put-Notify Example ===\n");
    println!("user: {}", local_user_name().unwrap_or_else(|| "<unknown>".into()));
    println!("start: {}", now());

    let events = Arc::new(LoopbackEvents::default());
    let services = ContextServices::new(events.clone()).config(
        ContextConfig::from_env().recv_poll_interval(Duration::from_millis(50)),
    );
    let delivered = Arc::new(AtomicUsize::new(0));
    let d = Arc::clone(&delivered);

    let owner = thread::Builder::new()
        .name("owner".into())
        .spawn(move || {
            let ctx = match attach(services) {
                Ok(ctx) => ctx,
                Err(e) => {
                    kwarn!("attach failed: {}", e);
                    return;
                }
            };
            let poller = Arc::new(LoopbackPoller {
                pending_sends: AtomicUsize::new(2),
            });
            let _rx = spawn_receiver(&ctx, poller.clone(), |_| {});

            let waiter = io_wait(poller, ctx.config());
            println!("wait_for_io: {:?}", waiter.wait_for_io(&ctx, Some(Duration::from_millis(100))));

            // a helper thread shares the context and issues the puts
            let owner_unit = ctx.owner();
            let helper = thread::spawn(move || {
                let Ok(ctx) = import(owner_unit) else { return Vec::new() };
                ["demo:ao1", "demo:ao2", "demo:ao3"]
                    .into_iter()
                    .enumerate()
                    .filter_map(|(i, record)| {
                        let ch = ctx.add_channel(record).ok()?;
                        ctx.add_subscription(ch, EventHandle(i as u64)).ok()?;
                        let d = Arc::clone(&d);
                        ctx.request_put(ch, 6, 1, i as u64, move |args| {
                            println!("  put {} finished: {}", args.user_arg, args.status);
                            if args.status != PutStatus::PutInProgress {
                                d.fetch_add(1, Ordering::SeqCst);
                            }
                        })
                        .ok()
                    })
                    .collect::<Vec<_>>()
            });
            let puts = helper.join().unwrap_or_default();

            // the database finishes them out of band
            let db_ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                for (put, code) in puts.iter().zip([0, S_DB_BLOCKED, -1]) {
                    db_ctx.enqueue_completion(put, code);
                }
            })
            .join()
            .ok();

            while ctx.pending_completions() > 0 {
                if ctx.block_until_puts_drained(Some(Duration::from_secs(1))) == WaitOutcome::TimedOut {
                    kwarn!("still waiting for put callbacks");
                }
            }
            println!("owner exiting; context {} will be torn down", ctx.id());
        });

    match owner {
        Ok(handle) => {
            let _ = handle.join();
        }
        Err(e) => eprintln!("failed to start owner thread: {}", e),
    }

    println!("\ncallbacks delivered: {}", delivered.load(Ordering::SeqCst));
    println!("subscriptions canceled: {}", events.canceled.load(Ordering::SeqCst));
    println!("end: {}", now());
}
