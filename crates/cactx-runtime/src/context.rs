//! Client context
//!
//! One `Context` per owning unit. It holds the locks, semaphores and
//! local-event bookkeeping the rest of the crate coordinates through.
//!
//! # Locks
//!
//! - `client`: channels, subscriptions, put records and derived attachments
//! - `event_lock`: serializes user callbacks from the local event facility
//! - put-notify lock: inside `put_queue`
//!
//! When both are needed the registry lock is taken before `client`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use cactx_core::error::{CaError, CaResult};
use cactx_core::id::{ChannelId, ContextId, EventHandle, SubscriptionId, UnitId};
use cactx_core::{kdebug, kerror, kwarn};

use crate::completion::{CompletionQueue, PendingPut, PutNotifyArgs};
use crate::config::ContextConfig;
use crate::dispatcher::CompletionDispatcher;
use crate::host::{EventFacility, ReceiveWorker};
use crate::semaphore::{BinarySemaphore, WaitOutcome};

/// A local event subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub handle: EventHandle,
}

/// Local events owned by one channel
#[derive(Debug, Default)]
pub(crate) struct LocalEvents {
    pub(crate) subscriptions: Vec<Subscription>,
    pub(crate) put_notify: Option<Arc<PendingPut>>,
}

#[derive(Debug)]
struct LocalChannel {
    record: String,
    events: LocalEvents,
}

/// Non-owning unit sharing this context
#[derive(Debug, Clone)]
pub struct DerivedAttachment {
    unit: UnitId,
    context: Weak<Context>,
}

impl DerivedAttachment {
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    pub fn context(&self) -> Option<Arc<Context>> {
        self.context.upgrade()
    }
}

#[derive(Debug, Default)]
struct ClientState {
    channels: BTreeMap<ChannelId, LocalChannel>,
    attachments: Vec<DerivedAttachment>,
}

/// Host facilities a context is created with
#[derive(Clone)]
pub struct ContextServices {
    pub events: Arc<dyn EventFacility>,
    pub config: ContextConfig,
}

impl ContextServices {
    pub fn new(events: Arc<dyn EventFacility>) -> Self {
        Self {
            events,
            config: ContextConfig::from_env(),
        }
    }

    pub fn config(mut self, config: ContextConfig) -> Self {
        self.config = config;
        self
    }
}

/// Per-unit client context
pub struct Context {
    id: ContextId,
    owner: UnitId,
    config: ContextConfig,
    events: Arc<dyn EventFacility>,
    client: Mutex<ClientState>,
    event_lock: Mutex<()>,
    /// Held for a whole drain so dispatch never runs concurrently with itself
    dispatch_gate: Mutex<()>,
    put_queue: CompletionQueue,
    io_done: BinarySemaphore,
    drained: BinarySemaphore,
    labor: BinarySemaphore,
    receiver: Mutex<Option<Arc<dyn ReceiveWorker>>>,
    dispatcher: Mutex<Option<CompletionDispatcher>>,
    torn_down: AtomicBool,
    released: AtomicBool,
}

fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl Context {
    /// Create a context owned by `owner`
    ///
    /// The dispatcher is not started here; see `CompletionDispatcher::start`.
    pub fn new(owner: UnitId, services: ContextServices) -> Arc<Self> {
        Arc::new(Self {
            id: ContextId::next(),
            owner,
            config: services.config,
            events: services.events,
            client: Mutex::new(ClientState::default()),
            event_lock: Mutex::new(()),
            dispatch_gate: Mutex::new(()),
            put_queue: CompletionQueue::new(),
            io_done: BinarySemaphore::new(),
            drained: BinarySemaphore::new(),
            labor: BinarySemaphore::new(),
            receiver: Mutex::new(None),
            dispatcher: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            released: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn id(&self) -> ContextId {
        self.id
    }

    #[inline]
    pub fn owner(&self) -> UnitId {
        self.owner
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn event_facility(&self) -> &Arc<dyn EventFacility> {
        &self.events
    }

    fn client(&self) -> MutexGuard<'_, ClientState> {
        relock(&self.client)
    }

    fn check_live(&self) -> CaResult<()> {
        if self.is_torn_down() {
            return Err(CaError::NotAttached);
        }
        Ok(())
    }

    // ── local channels ──

    /// Register a channel to a local record
    pub fn add_channel(&self, record: impl Into<String>) -> CaResult<ChannelId> {
        self.check_live()?;
        let id = ChannelId::next();
        let channel = LocalChannel {
            record: record.into(),
            events: LocalEvents::default(),
        };
        self.client().channels.insert(id, channel);
        Ok(id)
    }

    /// Record a local event subscription on `channel`
    pub fn add_subscription(&self, channel: ChannelId, handle: EventHandle) -> CaResult<SubscriptionId> {
        self.check_live()?;
        let mut client = self.client();
        let local = client.channels.get_mut(&channel).ok_or(CaError::UnknownChannel)?;
        local
            .events
            .subscriptions
            .try_reserve(1)
            .map_err(|_| CaError::AllocationFailure)?;
        let id = SubscriptionId::next();
        local.events.subscriptions.push(Subscription { id, handle });
        Ok(id)
    }

    /// Start a put with completion notification on `channel`
    ///
    /// Each channel carries at most one put record; it is reused once its
    /// previous callback has been delivered.
    pub fn request_put(
        &self,
        channel: ChannelId,
        dbr_type: u16,
        count: u32,
        user_arg: u64,
        callback: impl Fn(&PutNotifyArgs) + Send + Sync + 'static,
    ) -> CaResult<Arc<PendingPut>> {
        self.check_live()?;
        let mut client = self.client();
        let local = client.channels.get_mut(&channel).ok_or(CaError::UnknownChannel)?;
        if local.events.put_notify.as_ref().is_some_and(|p| p.is_busy()) {
            return Err(CaError::PutCallbackInProgress);
        }
        let put = Arc::new(PendingPut::new(
            channel,
            local.record.clone(),
            dbr_type,
            count,
            user_arg,
            callback,
        ));
        put.mark_busy();
        local.events.put_notify = Some(Arc::clone(&put));
        Ok(put)
    }

    pub fn channel_count(&self) -> usize {
        self.client().channels.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.client()
            .channels
            .values()
            .map(|c| c.events.subscriptions.len())
            .sum()
    }

    // ── completion path ──

    /// Called by the database when a put finishes
    ///
    /// Appends the put to the completion queue under the put-notify lock,
    /// then wakes the dispatcher. Returns false if the put was not queued.
    pub fn enqueue_completion(&self, put: &Arc<PendingPut>, host_status: i32) -> bool {
        if self.is_torn_down() {
            kwarn!("completion for {:?} after teardown of {}", put.id(), self.id);
            return false;
        }
        if !self.put_queue.push(Arc::clone(put), host_status) {
            kdebug!("{:?} already queued", put.id());
            return false;
        }
        if let Err(e) = self.labor.give() {
            kerror!("dispatcher wakeup failed on {}: {}", self.id, e);
        }
        true
    }

    /// Wait until the dispatcher next empties the completion queue
    ///
    /// Returns `Signaled` once per drain cycle.
    pub fn block_until_puts_drained(&self, timeout: Option<Duration>) -> WaitOutcome {
        self.drained.take(timeout)
    }

    /// Mark outstanding I/O complete for `wait_for_io`
    pub fn signal_io_done(&self) -> CaResult<()> {
        self.io_done.give()
    }

    /// Hold the event lock, excluding user callbacks
    pub fn lock_events(&self) -> MutexGuard<'_, ()> {
        relock(&self.event_lock)
    }

    pub fn pending_completions(&self) -> usize {
        self.put_queue.len()
    }

    pub(crate) fn put_queue(&self) -> &CompletionQueue {
        &self.put_queue
    }

    pub(crate) fn dispatch_gate(&self) -> MutexGuard<'_, ()> {
        relock(&self.dispatch_gate)
    }

    pub(crate) fn io_done(&self) -> &BinarySemaphore {
        &self.io_done
    }

    pub(crate) fn drained(&self) -> &BinarySemaphore {
        &self.drained
    }

    pub(crate) fn labor(&self) -> &BinarySemaphore {
        &self.labor
    }

    // ── workers ──

    pub fn install_receive_worker(&self, worker: Arc<dyn ReceiveWorker>) {
        *relock(&self.receiver) = Some(worker);
    }

    pub fn receive_worker(&self) -> Option<Arc<dyn ReceiveWorker>> {
        relock(&self.receiver).clone()
    }

    pub(crate) fn set_dispatcher(&self, dispatcher: CompletionDispatcher) {
        *relock(&self.dispatcher) = Some(dispatcher);
    }

    pub(crate) fn take_dispatcher(&self) -> Option<CompletionDispatcher> {
        relock(&self.dispatcher).take()
    }

    /// Unit the dispatcher runs on, if started
    pub fn dispatcher_unit(&self) -> Option<UnitId> {
        relock(&self.dispatcher).as_ref().map(|d| d.unit())
    }

    // ── derived attachments ──

    pub(crate) fn push_attachment(&self, unit: UnitId, context: Weak<Context>) -> CaResult<()> {
        let mut client = self.client();
        client
            .attachments
            .try_reserve(1)
            .map_err(|_| CaError::AllocationFailure)?;
        client.attachments.push(DerivedAttachment { unit, context });
        Ok(())
    }

    pub(crate) fn remove_attachment(&self, unit: UnitId) -> bool {
        let mut client = self.client();
        let before = client.attachments.len();
        client.attachments.retain(|a| a.unit != unit);
        client.attachments.len() != before
    }

    pub(crate) fn take_attachments(&self) -> Vec<DerivedAttachment> {
        std::mem::take(&mut self.client().attachments)
    }

    /// Units currently sharing this context
    pub fn derived_units(&self) -> Vec<UnitId> {
        self.client().attachments.iter().map(|a| a.unit).collect()
    }

    // ── teardown support ──

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    /// Returns true for the first caller only
    pub(crate) fn mark_torn_down(&self) -> bool {
        !self.torn_down.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn take_local_events(&self) -> Vec<LocalEvents> {
        self.client()
            .channels
            .values_mut()
            .map(|c| std::mem::take(&mut c.events))
            .collect()
    }

    pub(crate) fn release_storage(&self) -> usize {
        let mut client = self.client();
        let freed = client.channels.len();
        client.channels.clear();
        client.attachments.clear();
        freed
    }

    /// Delete the context's semaphores
    ///
    /// Runs once; failures are logged and counted.
    pub fn release_primitives(&self) -> usize {
        if self.released.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let mut failures = 0;
        for (name, sem) in [
            ("io_done", &self.io_done),
            ("drained", &self.drained),
            ("labor", &self.labor),
        ] {
            // labor is already closed when the dispatcher was stopped
            if sem.is_closed() {
                continue;
            }
            if let Err(e) = sem.close() {
                kerror!("{}: {} semaphore: {}", self.id, name, e);
                failures += 1;
            }
        }
        *relock(&self.receiver) = None;
        failures
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("torn_down", &self.is_torn_down())
            .finish()
    }
}
