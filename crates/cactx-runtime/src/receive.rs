//! Network receive worker
//!
//! One thread per context. It imports the owner's context, registers with
//! the watchdog, then polls for inbound traffic and hands each poll's
//! progress count to the caller's labor closure.
//!
//! Suspend and terminate are cooperative: the thread checks its flags
//! between polls. `suspend` waits until the thread reports it has parked,
//! so no labor call is in progress once it returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cactx_core::error::{CaError, CaResult, HostOp};
use cactx_core::id::UnitId;
use cactx_core::{kdebug, kerror, kwarn};

use crate::context::Context;
use crate::host::{IoPoller, PollMode, ReceiveWorker};
use crate::registry::ContextRegistry;
use crate::semaphore::{BinarySemaphore, WaitOutcome};
use crate::watchdog::watchdog;

/// Counters returned when the receive thread exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    pub polls: u64,
    /// Sum of progress counts handed to the labor closure
    pub progress: u64,
}

#[derive(Debug, Default)]
struct Control {
    suspended: AtomicBool,
    terminate: AtomicBool,
    alive: AtomicBool,
    resume: BinarySemaphore,
    /// Given by the thread when it parks, and once more when it exits
    parked: BinarySemaphore,
    is_parked: AtomicBool,
}

/// Handle to a running receive thread
pub struct ReceiveThread {
    unit: UnitId,
    control: Arc<Control>,
    suspend_timeout: Duration,
    handle: Mutex<Option<JoinHandle<ReceiveStats>>>,
}

impl ReceiveThread {
    /// Start the receive worker for `ctx` and install it on the context
    pub fn spawn<F>(
        registry: &Arc<ContextRegistry>,
        ctx: &Arc<Context>,
        poller: Arc<dyn IoPoller>,
        labor: F,
    ) -> CaResult<Arc<ReceiveThread>>
    where
        F: FnMut(usize) + Send + 'static,
    {
        let config = ctx.config();
        let name = format!("{}-{}", config.recv_thread_prefix, ctx.id());
        let interval = config.recv_poll_interval;
        let owner = ctx.owner();
        let control = Arc::new(Control::default());
        control.alive.store(true, Ordering::Release);

        let (tx, rx) = mpsc::sync_channel(1);
        let thread_registry = Arc::clone(registry);
        let thread_control = Arc::clone(&control);

        let handle = config
            .thread_builder(name)
            .spawn(move || {
                let unit = UnitId::current();
                let attached = thread_registry.attach_derived(unit, owner).map(|_| ());
                let ok = attached.is_ok();
                let _ = tx.send((unit, attached));
                if !ok {
                    thread_control.alive.store(false, Ordering::Release);
                    return ReceiveStats::default();
                }
                watchdog().insert(unit);
                let stats = recv_loop(&thread_control, poller.as_ref(), interval, labor);
                watchdog().remove(unit);
                thread_control.alive.store(false, Ordering::Release);
                let _ = thread_control.parked.give();
                stats
            })
            .map_err(|e| {
                kerror!("failed to spawn receive thread for {}: {}", ctx.id(), e);
                CaError::from(HostOp::ThreadSpawn)
            })?;

        let (unit, attached) = rx.recv().map_err(|_| CaError::from(HostOp::ThreadSpawn))?;
        if let Err(e) = attached {
            let _ = handle.join();
            return Err(e);
        }

        let worker = Arc::new(ReceiveThread {
            unit,
            control,
            suspend_timeout: config.suspend_timeout,
            handle: Mutex::new(Some(handle)),
        });
        ctx.install_receive_worker(worker.clone());
        kdebug!("receive thread for {} running on {}", ctx.id(), unit);
        Ok(worker)
    }

    /// Let a suspended worker continue
    pub fn resume(&self) -> CaResult<()> {
        self.control.suspended.store(false, Ordering::Release);
        self.control.resume.give()
    }

    pub fn is_suspended(&self) -> bool {
        self.control.suspended.load(Ordering::Acquire)
    }
}

impl ReceiveWorker for ReceiveThread {
    fn unit(&self) -> UnitId {
        self.unit
    }

    fn is_alive(&self) -> bool {
        self.control.alive.load(Ordering::Acquire)
    }

    fn unwatch(&self) {
        watchdog().remove(self.unit);
    }

    fn suspend(&self) -> CaResult<()> {
        if !self.is_alive() {
            return Err(HostOp::WorkerSuspend.into());
        }
        // drop a stale acknowledgement from an earlier suspend
        self.control.parked.try_take();
        self.control.suspended.store(true, Ordering::Release);
        if self.unit == UnitId::current() || self.control.is_parked.load(Ordering::Acquire) {
            return Ok(());
        }
        match self.control.parked.take(Some(self.suspend_timeout)) {
            WaitOutcome::Signaled => Ok(()),
            WaitOutcome::TimedOut | WaitOutcome::Closed => {
                kwarn!("{} did not park within {:?}", self.unit, self.suspend_timeout);
                Err(HostOp::WorkerSuspend.into())
            }
        }
    }

    fn terminate(&self) -> CaResult<()> {
        self.control.terminate.store(true, Ordering::Release);
        // wake it if suspended; a closed semaphore means it already left
        let _ = self.control.resume.give();

        if self.unit == UnitId::current() {
            return Ok(());
        }
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match handle {
            Some(h) => match h.join() {
                Ok(stats) => {
                    kdebug!("{} receive thread done: {} polls", self.unit, stats.polls);
                    Ok(())
                }
                Err(_) => Err(HostOp::WorkerTerminate.into()),
            },
            None => Ok(()),
        }
    }
}

fn recv_loop<F>(control: &Control, poller: &dyn IoPoller, interval: Duration, mut labor: F) -> ReceiveStats
where
    F: FnMut(usize),
{
    let mut stats = ReceiveStats::default();
    loop {
        if control.terminate.load(Ordering::Acquire) {
            break;
        }
        if control.suspended.load(Ordering::Acquire) {
            control.is_parked.store(true, Ordering::Release);
            if let Err(e) = control.parked.give() {
                kwarn!("receive thread park signal: {}", e);
            }
            let outcome = control.resume.take(None);
            control.is_parked.store(false, Ordering::Release);
            if outcome == WaitOutcome::Closed {
                kwarn!("receive thread resume semaphore closed");
                break;
            }
            continue;
        }

        let progress = poller.poll_for_events(interval, PollMode::Recvs);
        stats.polls += 1;
        if control.terminate.load(Ordering::Acquire) || control.suspended.load(Ordering::Acquire) {
            continue;
        }
        stats.progress += progress as u64;
        labor(progress);
    }
    stats
}
