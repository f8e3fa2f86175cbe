//! Put-notify records and the completion queue
//!
//! A `PendingPut` is created when a put with completion callback is
//! requested against a local record. The database reports completion from
//! its own thread; the record is then appended to the context's
//! `CompletionQueue` and the dispatcher delivers the callback.
//!
//! ```text
//!   request_put ──► busy=1
//!   db completion ──► queue.push (put-notify lock) ──► labor.give
//!   dispatcher ──► queue.pop ──► callback (event lock) ──► queue.settle
//! ```
//!
//! A put may be queued again while its previous callback is still
//! running (a blocked put reporting its final status). `settle` leaves it
//! busy in that case; busy only drops once no delivery is outstanding.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cactx_core::id::{ChannelId, PutId};
use cactx_core::status::PutStatus;

/// Arguments delivered to a put completion callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutNotifyArgs {
    pub user_arg: u64,
    pub channel: ChannelId,
    pub dbr_type: u16,
    pub count: u32,
    pub status: PutStatus,
}

/// User completion callback
pub type PutCallback = Arc<dyn Fn(&PutNotifyArgs) + Send + Sync>;

/// An in-flight put with completion notification
pub struct PendingPut {
    id: PutId,
    channel: ChannelId,
    record: String,
    dbr_type: u16,
    count: u32,
    user_arg: u64,
    callback: PutCallback,
    /// Raw status reported by the database
    host_status: AtomicI32,
    /// Set from request until the callback has run
    busy: AtomicBool,
    /// Currently linked into a completion queue
    queued: AtomicBool,
}

impl PendingPut {
    pub fn new(
        channel: ChannelId,
        record: impl Into<String>,
        dbr_type: u16,
        count: u32,
        user_arg: u64,
        callback: impl Fn(&PutNotifyArgs) + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: PutId::next(),
            channel,
            record: record.into(),
            dbr_type,
            count,
            user_arg,
            callback: Arc::new(callback),
            host_status: AtomicI32::new(0),
            busy: AtomicBool::new(false),
            queued: AtomicBool::new(false),
        }
    }

    #[inline]
    pub fn id(&self) -> PutId {
        self.id
    }

    #[inline]
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// Name of the local record the put targets
    pub fn record(&self) -> &str {
        &self.record
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub(crate) fn mark_busy(&self) {
        self.busy.store(true, Ordering::Release);
    }

    pub(crate) fn clear_busy(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn host_status(&self) -> i32 {
        self.host_status.load(Ordering::Acquire)
    }

    pub(crate) fn set_host_status(&self, code: i32) {
        self.host_status.store(code, Ordering::Release);
    }

    /// Completion status as reported to the user
    pub fn status(&self) -> PutStatus {
        PutStatus::from_host(self.host_status())
    }

    pub(crate) fn notify_args(&self) -> PutNotifyArgs {
        PutNotifyArgs {
            user_arg: self.user_arg,
            channel: self.channel,
            dbr_type: self.dbr_type,
            count: self.count,
            status: self.status(),
        }
    }

    pub(crate) fn callback(&self) -> &PutCallback {
        &self.callback
    }
}

impl fmt::Debug for PendingPut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingPut")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("record", &self.record)
            .field("host_status", &self.host_status())
            .field("busy", &self.is_busy())
            .finish()
    }
}

/// FIFO of finished puts, guarded by the put-notify lock
#[derive(Debug, Default)]
pub struct CompletionQueue {
    entries: Mutex<VecDeque<Arc<PendingPut>>>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<PendingPut>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a finished put carrying `host_status`
    ///
    /// Returns false, leaving the queued entry untouched, if the put is
    /// already waiting in the queue.
    pub fn push(&self, put: Arc<PendingPut>, host_status: i32) -> bool {
        let mut entries = self.lock();
        if put.queued.swap(true, Ordering::AcqRel) {
            return false;
        }
        put.set_host_status(host_status);
        put.mark_busy();
        entries.push_back(put);
        true
    }

    /// Finish a delivery: clear busy unless the put was queued again
    ///
    /// Returns true if the put is now idle.
    pub fn settle(&self, put: &PendingPut) -> bool {
        let _entries = self.lock();
        if put.queued.load(Ordering::Acquire) {
            return false;
        }
        put.clear_busy();
        true
    }

    /// Remove the oldest entry along with the arguments to deliver
    pub fn pop(&self) -> Option<(Arc<PendingPut>, PutNotifyArgs)> {
        let mut entries = self.lock();
        let put = entries.pop_front()?;
        let args = put.notify_args();
        put.queued.store(false, Ordering::Release);
        Some((put, args))
    }

    /// Unlink a put wherever it sits in the queue
    pub fn remove(&self, id: PutId) -> bool {
        let mut entries = self.lock();
        match entries.iter().position(|p| p.id == id) {
            Some(pos) => {
                if let Some(put) = entries.remove(pos) {
                    put.queued.store(false, Ordering::Release);
                }
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cactx_core::status::S_DB_BLOCKED;
    use std::thread;

    fn put(user_arg: u64) -> Arc<PendingPut> {
        Arc::new(PendingPut::new(ChannelId::next(), "rec:ai", 6, 1, user_arg, |_| {}))
    }

    #[test]
    fn test_fifo_order() {
        let q = CompletionQueue::new();
        let (a, b, c) = (put(1), put(2), put(3));
        assert!(q.push(a.clone(), 0));
        assert!(q.push(b.clone(), 0));
        assert!(q.push(c.clone(), 0));

        assert_eq!(q.pop().unwrap().0.id(), a.id());
        assert_eq!(q.pop().unwrap().0.id(), b.id());
        assert_eq!(q.pop().unwrap().0.id(), c.id());
        assert!(q.pop().is_none());
    }

    #[test]
    fn test_push_once_while_queued() {
        let q = CompletionQueue::new();
        let p = put(1);
        assert!(q.push(p.clone(), S_DB_BLOCKED));
        assert!(!q.push(p.clone(), 0));
        assert_eq!(q.len(), 1);
        // rejected push leaves the queued status alone
        assert_eq!(p.host_status(), S_DB_BLOCKED);

        // re-enqueue allowed once dispatched
        q.pop();
        assert!(q.push(p, 0));
    }

    #[test]
    fn test_settle_keeps_requeued_put_busy() {
        let q = CompletionQueue::new();
        let p = put(1);
        q.push(p.clone(), S_DB_BLOCKED);
        let (popped, args) = q.pop().unwrap();

        // final status arrives while the first callback runs
        assert!(q.push(p.clone(), 0));
        assert_eq!(args.status, PutStatus::PutInProgress);
        assert!(!q.settle(&popped));
        assert!(p.is_busy());

        q.pop();
        assert!(q.settle(&p));
        assert!(!p.is_busy());
    }

    #[test]
    fn test_remove() {
        let q = CompletionQueue::new();
        let (a, b) = (put(1), put(2));
        q.push(a.clone(), 0);
        q.push(b.clone(), 0);

        assert!(q.remove(a.id()));
        assert!(!q.remove(a.id()));
        assert_eq!(q.len(), 1);
        assert!(q.push(a, 0));
    }

    #[test]
    fn test_status_mapping() {
        let p = put(9);
        p.set_host_status(0);
        assert_eq!(p.notify_args().status, PutStatus::Normal);
        p.set_host_status(S_DB_BLOCKED);
        assert_eq!(p.status(), PutStatus::PutInProgress);
        p.set_host_status(-17);
        assert_eq!(p.status(), PutStatus::PutFailed);
        assert_eq!(p.notify_args().user_arg, 9);
    }

    #[test]
    fn test_concurrent_producers() {
        let q = Arc::new(CompletionQueue::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..50 {
                        q.push(put(t * 100 + i), 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(q.len(), 200);
    }
}
