//! Bounded waits for outstanding I/O
//!
//! Both waits first flush queued sends with zero-timeout polls until a
//! poll reports no progress, then block on a semaphore for at most the
//! caller's timeout. The timeout is converted to clock ticks and clamped
//! to the largest wait the host supports.
//!
//! A timeout is a normal outcome, not an error.

use std::sync::Arc;
use std::time::Duration;

use cactx_core::error::CaResult;
use cactx_core::{kdebug, ktrace};

use crate::clock::{duration_at_rate, ticks_at_rate, MonotonicClock};
use crate::config::ContextConfig;
use crate::context::Context;
use crate::host::{IoPoller, PollMode};
use crate::semaphore::{BinarySemaphore, WaitOutcome};

/// Result of a bounded wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoWaitResult {
    Completed,
    TimedOut,
}

/// A set of requests whose joint completion can be awaited
#[derive(Debug, Default)]
pub struct SyncGroup {
    done: BinarySemaphore,
}

impl SyncGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every request in the group complete
    pub fn io_complete(&self) -> CaResult<()> {
        self.done.give()
    }

    /// Release the group; waiters return `Completed`
    pub fn delete(&self) -> CaResult<()> {
        self.done.close()
    }

    pub fn is_deleted(&self) -> bool {
        self.done.is_closed()
    }
}

/// Flush-then-wait coordinator
pub struct IoWait {
    poller: Arc<dyn IoPoller>,
    rate: u64,
    max_wait_ticks: u64,
}

impl IoWait {
    pub fn new(poller: Arc<dyn IoPoller>, clock: &MonotonicClock, config: &ContextConfig) -> Self {
        Self {
            poller,
            rate: clock.rate(),
            max_wait_ticks: config.max_wait_ticks,
        }
    }

    /// Poll sends with zero timeout until nothing more goes out
    ///
    /// Returns the number of polls made, at least one.
    pub fn flush_sends(&self) -> usize {
        let mut polls = 0;
        loop {
            polls += 1;
            if self.poller.poll_for_events(Duration::ZERO, PollMode::Sends) == 0 {
                break;
            }
        }
        ktrace!("send flush took {} polls", polls);
        polls
    }

    /// Clamp a timeout to the host's largest wait
    ///
    /// `None` (wait forever) passes through unchanged.
    pub fn bounded_timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        timeout.map(|t| {
            let ticks = ticks_at_rate(t, self.rate).min(self.max_wait_ticks);
            duration_at_rate(ticks, self.rate)
        })
    }

    /// Flush sends, then wait for the context's I/O-done signal
    pub fn wait_for_io(&self, ctx: &Context, timeout: Option<Duration>) -> IoWaitResult {
        self.flush_sends();
        self.wait_on(ctx.io_done(), timeout)
    }

    /// Flush sends, then wait for `group` to complete
    pub fn wait_for_group_completion(&self, group: &SyncGroup, timeout: Option<Duration>) -> IoWaitResult {
        self.flush_sends();
        self.wait_on(&group.done, timeout)
    }

    fn wait_on(&self, sem: &BinarySemaphore, timeout: Option<Duration>) -> IoWaitResult {
        match sem.take(self.bounded_timeout(timeout)) {
            WaitOutcome::Signaled => IoWaitResult::Completed,
            WaitOutcome::TimedOut => IoWaitResult::TimedOut,
            WaitOutcome::Closed => {
                kdebug!("wait released by semaphore deletion");
                IoWaitResult::Completed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::tests::ScriptedTicks;
    use crate::context::tests::services;
    use cactx_core::id::UnitId;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Instant;

    /// Replays progress counts for send polls, then reports 0
    struct ScriptedPoller {
        sends: Mutex<VecDeque<usize>>,
        calls: Mutex<Vec<(Duration, PollMode)>>,
    }

    impl ScriptedPoller {
        fn new(sends: &[usize]) -> Arc<Self> {
            Arc::new(Self {
                sends: Mutex::new(sends.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    impl IoPoller for ScriptedPoller {
        fn poll_for_events(&self, timeout: Duration, mode: PollMode) -> usize {
            self.calls.lock().unwrap().push((timeout, mode));
            self.sends.lock().unwrap().pop_front().unwrap_or(0)
        }
    }

    fn io_wait(poller: Arc<ScriptedPoller>, rate: u64, max_wait_ticks: u64) -> IoWait {
        let clock = MonotonicClock::new(Arc::new(ScriptedTicks::new(rate, u32::MAX as u64, &[]))).unwrap();
        IoWait::new(poller, &clock, &ContextConfig::new().max_wait_ticks(max_wait_ticks))
    }

    #[test]
    fn test_flush_polls_until_no_progress() {
        let poller = ScriptedPoller::new(&[2, 1, 0]);
        let wait = io_wait(poller.clone(), 60, u32::MAX as u64);

        assert_eq!(wait.flush_sends(), 3);
        let calls = poller.calls.lock().unwrap();
        assert!(calls.iter().all(|(t, m)| t.is_zero() && *m == PollMode::Sends));
    }

    #[test]
    fn test_zero_timeout_flushes_once_and_returns() {
        let poller = ScriptedPoller::new(&[]);
        let wait = io_wait(poller.clone(), 60, u32::MAX as u64);
        let ctx = Context::new(UnitId::current(), services());

        let start = Instant::now();
        assert_eq!(wait.wait_for_io(&ctx, Some(Duration::ZERO)), IoWaitResult::TimedOut);
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(poller.calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_zero_timeout_group_wait_flushes_once() {
        let poller = ScriptedPoller::new(&[]);
        let wait = io_wait(poller.clone(), 60, u32::MAX as u64);
        let group = SyncGroup::new();

        let start = Instant::now();
        assert_eq!(
            wait.wait_for_group_completion(&group, Some(Duration::ZERO)),
            IoWaitResult::TimedOut
        );
        assert!(start.elapsed() < Duration::from_millis(100));
        let calls = poller.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (Duration::ZERO, PollMode::Sends));
    }

    #[test]
    fn test_timeout_clamped_to_max_ticks() {
        let wait = io_wait(ScriptedPoller::new(&[]), 60, 30);
        assert_eq!(wait.bounded_timeout(Some(Duration::from_secs(3600))), Some(Duration::from_millis(500)));
        assert_eq!(wait.bounded_timeout(Some(Duration::from_millis(250))), Some(Duration::from_micros(250_000)));
        assert_eq!(wait.bounded_timeout(None), None);
    }

    #[test]
    fn test_timeout_is_not_an_error() {
        let wait = io_wait(ScriptedPoller::new(&[]), 1000, u32::MAX as u64);
        let group = SyncGroup::new();
        let start = Instant::now();
        assert_eq!(
            wait.wait_for_group_completion(&group, Some(Duration::from_millis(30))),
            IoWaitResult::TimedOut
        );
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn test_io_done_completes_wait() {
        let wait = io_wait(ScriptedPoller::new(&[1, 0]), 1000, u32::MAX as u64);
        let ctx = Context::new(UnitId::current(), services());

        let signaler = {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                ctx.signal_io_done().unwrap();
            })
        };
        assert_eq!(wait.wait_for_io(&ctx, Some(Duration::from_secs(10))), IoWaitResult::Completed);
        signaler.join().unwrap();
    }

    #[test]
    fn test_group_delete_releases_waiter() {
        let wait = io_wait(ScriptedPoller::new(&[]), 1000, u32::MAX as u64);
        let group = Arc::new(SyncGroup::new());

        let deleter = {
            let group = Arc::clone(&group);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                group.delete().unwrap();
            })
        };
        assert_eq!(wait.wait_for_group_completion(&group, None), IoWaitResult::Completed);
        deleter.join().unwrap();
        assert!(group.is_deleted());
        assert!(group.io_complete().is_err());
    }
}
