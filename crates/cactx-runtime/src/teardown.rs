//! Ordered context teardown
//!
//! Runs from the owning unit's termination hook, possibly on the exiting
//! thread itself. Steps, in order:
//!
//! 1. Stop monitoring the receive worker and suspend it
//! 2. Cancel local event subscriptions and busy put notifications
//! 3. Unbind every derived unit
//! 4. Terminate the receive worker
//! 5. Stop the dispatcher and close the event facility
//! 6. Free channel storage
//!
//! Steps 1 and 4 are skipped when the terminating unit is the receive
//! worker. Host failures are logged and counted; teardown always runs to
//! the end. The semaphores are released afterwards by the caller.

use cactx_core::error::{CaError, CaResult, HostOp};
use cactx_core::id::UnitId;
use cactx_core::{kdebug, kerror, kinfo, kwarn};

use crate::context::Context;
use crate::registry::ContextRegistry;

/// What happened to the receive worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WorkerDisposition {
    /// No live worker was installed
    #[default]
    Absent,
    /// Suspended and terminated
    Stopped,
    /// The worker is the terminating unit and was left alone
    SelfTerminating,
}

/// Summary of one teardown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub receive_worker: WorkerDisposition,
    pub subscriptions_canceled: usize,
    pub puts_released: usize,
    pub units_detached: usize,
    pub channels_freed: usize,
    /// Host primitive failures, logged and otherwise ignored
    pub failures: usize,
}

impl TeardownReport {
    fn note(&mut self, step: &str, result: CaResult<()>) {
        if let Err(e) = result {
            kerror!("teardown {}: {}", step, e);
            self.failures += 1;
        }
    }
}

/// Tear `ctx` down on behalf of `terminating`
///
/// Returns `None` if the context was already torn down.
pub fn teardown(ctx: &Context, terminating: UnitId, registry: &ContextRegistry) -> Option<TeardownReport> {
    if !ctx.mark_torn_down() {
        kwarn!("{} already torn down", ctx.id());
        return None;
    }
    kinfo!("tearing down {} (owner {}, exiting {})", ctx.id(), ctx.owner(), terminating);

    let mut report = TeardownReport::default();
    let events = ctx.event_facility();

    // 1. receive worker: unwatch and suspend
    let worker = ctx.receive_worker().filter(|w| w.is_alive());
    if let Some(w) = &worker {
        if w.unit() == terminating {
            report.receive_worker = WorkerDisposition::SelfTerminating;
        } else {
            w.unwatch();
            report.note("suspend receive worker", w.suspend());
            report.receive_worker = WorkerDisposition::Stopped;
        }
    }

    // 2. local events
    for local in ctx.take_local_events() {
        for sub in local.subscriptions {
            match events.cancel_event(sub.handle) {
                Ok(()) => report.subscriptions_canceled += 1,
                Err(status) => report.note(
                    "cancel subscription",
                    Err(CaError::from(HostOp::EventCancel(status))),
                ),
            }
        }
        if let Some(put) = local.put_notify {
            ctx.put_queue().remove(put.id());
            if put.is_busy() {
                if let Err(status) = events.cancel_put_notify(&put) {
                    report.note("cancel put notify", Err(CaError::from(HostOp::PutNotifyCancel(status))));
                }
                put.clear_busy();
            }
            report.puts_released += 1;
        }
    }

    // 3. derived units
    for attachment in ctx.take_attachments() {
        if registry.unbind_derived(attachment.unit(), ctx.id()) {
            report.units_detached += 1;
        } else {
            kdebug!("{} already detached", attachment.unit());
        }
    }

    // 4. receive worker: terminate
    if let Some(w) = &worker {
        if w.unit() != terminating {
            report.note("terminate receive worker", w.terminate());
        }
    }

    // 5. event delivery
    if let Some(dispatcher) = ctx.take_dispatcher() {
        if let Some(stats) = dispatcher.stop(ctx) {
            kdebug!("{} dispatcher delivered {} callbacks", ctx.id(), stats.dispatched);
        }
    }
    if let Err(status) = events.close() {
        report.note("close event facility", Err(CaError::from(HostOp::EventClose(status))));
    }

    // 6. storage
    report.channels_freed = ctx.release_storage();

    kdebug!("{} teardown: {:?}", ctx.id(), report);
    Some(report)
}
