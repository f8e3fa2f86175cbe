//! Monotonic clock over a free-running tick counter
//!
//! The raw counter may wrap. Every reading is compared with the previous
//! one under a dedicated lock; a smaller reading means the counter
//! wrapped, and one wrap period (`wrap_period / rate` seconds) is added to a
//! running offset.
//!
//! ```text
//!   raw:    900   950  | 10    60        (wrap at 1000, rate 1000)
//!   offset:   0     0  |  1     1
//!   now():  0.90  0.95 | 1.01  1.06
//! ```

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use cactx_core::error::{CaError, CaResult};
use cactx_core::time::{TimeVal, USEC_PER_SEC};

/// A free-running tick counter provided by the host
pub trait TickSource: Send + Sync {
    /// Ticks per second; 0 means the host is misconfigured
    fn rate(&self) -> u64;

    /// Current raw counter value
    fn ticks(&self) -> u64;

    /// Wrap period in ticks: readings stay below it and restart at zero
    fn wrap_period(&self) -> u64;

    fn name(&self) -> &'static str {
        "unknown"
    }
}

mod ticks_fallback;
pub use ticks_fallback::InstantTicks;

// Platform-specific tick sources
cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod ticks_unix;
        pub use ticks_unix::ProcessTicks as PlatformTicks;

        /// Tick source for this platform
        pub fn platform_ticks(_fallback_rate: u64) -> Arc<dyn TickSource> {
            Arc::new(PlatformTicks::new())
        }
    } else {
        pub use ticks_fallback::InstantTicks as PlatformTicks;

        /// Tick source for this platform
        pub fn platform_ticks(fallback_rate: u64) -> Arc<dyn TickSource> {
            Arc::new(PlatformTicks::new(fallback_rate))
        }
    }
}

/// Wrap-detection state, only touched under the clock lock
#[derive(Debug, Default)]
struct ClockState {
    /// Last raw counter value observed
    last: u64,
    /// Whole seconds accumulated across wraps
    offset: u64,
}

/// Wraparound-tolerant clock
pub struct MonotonicClock {
    source: Arc<dyn TickSource>,
    rate: u64,
    state: Mutex<ClockState>,
}

impl MonotonicClock {
    /// Build a clock, fixing the tick rate
    ///
    /// Fails with `ConfigurationError` if the source reports rate 0.
    pub fn new(source: Arc<dyn TickSource>) -> CaResult<Self> {
        let rate = source.rate();
        if rate == 0 {
            return Err(CaError::ConfigurationError("tick rate is zero"));
        }
        Ok(Self {
            source,
            rate,
            state: Mutex::new(ClockState::default()),
        })
    }

    /// Ticks per second
    #[inline]
    pub fn rate(&self) -> u64 {
        self.rate
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    /// Seconds and microseconds since the counter's origin, never decreasing
    /// in seconds across counter wraps
    pub fn now(&self) -> TimeVal {
        let (current, offset) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let current = self.source.ticks();
            if current < state.last {
                state.offset = state.offset.saturating_add(self.source.wrap_period() / self.rate);
            }
            state.last = current;
            (current, state.offset)
        };

        let sec = current / self.rate;
        let rem = (current - sec * self.rate) as u128;
        TimeVal {
            sec: sec.saturating_add(offset),
            usec: (rem * USEC_PER_SEC as u128 / self.rate as u128) as u64,
        }
    }

    /// Convert a duration to ticks at this clock's rate
    pub fn ticks_for(&self, d: Duration) -> u64 {
        ticks_at_rate(d, self.rate)
    }

    /// Convert ticks back to wall duration
    pub fn duration_for(&self, ticks: u64) -> Duration {
        duration_at_rate(ticks, self.rate)
    }
}

/// `sec * rate + usec * rate / 1e6`, saturating
pub fn ticks_at_rate(d: Duration, rate: u64) -> u64 {
    let tv = TimeVal::from(d);
    let whole = tv.sec.saturating_mul(rate);
    let frac = (tv.usec as u128 * rate as u128 / USEC_PER_SEC as u128) as u64;
    whole.saturating_add(frac)
}

pub fn duration_at_rate(ticks: u64, rate: u64) -> Duration {
    if rate == 0 {
        return Duration::MAX;
    }
    let micros = ticks as u128 * USEC_PER_SEC as u128 / rate as u128;
    Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
}

static GLOBAL_CLOCK: OnceLock<MonotonicClock> = OnceLock::new();

/// Process-wide clock over the platform tick source
///
/// # Panics
///
/// Panics on first use if the host reports a tick rate of zero. That is a
/// host configuration error, not a runtime condition.
pub fn clock() -> &'static MonotonicClock {
    GLOBAL_CLOCK.get_or_init(|| {
        let rate = cactx_core::env::env_get(
            "CA_TICK_RATE_HZ",
            crate::config::defaults::FALLBACK_TICK_RATE,
        );
        match MonotonicClock::new(platform_ticks(rate)) {
            Ok(clock) => clock,
            Err(e) => panic!("monotonic clock unavailable: {}", e),
        }
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::thread;

    /// Replays a fixed sequence of raw readings, then repeats the last one
    pub(crate) struct ScriptedTicks {
        rate: u64,
        wrap_period: u64,
        readings: Mutex<VecDeque<u64>>,
        last: Mutex<u64>,
    }

    impl ScriptedTicks {
        pub(crate) fn new(rate: u64, wrap_period: u64, readings: &[u64]) -> Self {
            Self {
                rate,
                wrap_period,
                readings: Mutex::new(readings.iter().copied().collect()),
                last: Mutex::new(0),
            }
        }
    }

    impl TickSource for ScriptedTicks {
        fn rate(&self) -> u64 {
            self.rate
        }

        fn ticks(&self) -> u64 {
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.readings.lock().unwrap().pop_front() {
                *last = next;
            }
            *last
        }

        fn wrap_period(&self) -> u64 {
            self.wrap_period
        }
    }

    fn scripted(rate: u64, wrap_period: u64, readings: &[u64]) -> MonotonicClock {
        MonotonicClock::new(Arc::new(ScriptedTicks::new(rate, wrap_period, readings))).unwrap()
    }

    #[test]
    fn test_zero_rate_rejected() {
        let err = MonotonicClock::new(Arc::new(ScriptedTicks::new(0, 100, &[]))).err();
        assert!(matches!(err, Some(CaError::ConfigurationError(_))));
    }

    #[test]
    fn test_wrap_adds_exactly_one_period() {
        let clock = scripted(1000, 1000, &[900, 950, 10, 60]);

        let readings: Vec<TimeVal> = (0..4).map(|_| clock.now()).collect();
        assert_eq!(readings[0], TimeVal::new(0, 900_000));
        assert_eq!(readings[1], TimeVal::new(0, 950_000));
        assert_eq!(readings[2], TimeVal::new(1, 10_000));
        assert_eq!(readings[3], TimeVal::new(1, 60_000));
    }

    #[test]
    fn test_seconds_never_decrease_across_many_wraps() {
        let raw = [10, 500, 999, 3, 400, 2, 1, 700, 0, 999];
        let clock = scripted(100, 1000, &raw);

        let mut prev = 0;
        for _ in 0..raw.len() {
            let tv = clock.now();
            assert!(tv.sec >= prev, "{} went backwards from {}", tv, prev);
            assert!(tv.usec < USEC_PER_SEC);
            prev = tv.sec;
        }
        // four wraps of 1000/100 = 10 seconds each
        assert_eq!(clock.now().sec, 4 * 10 + 999 / 100);
    }

    #[test]
    fn test_concurrent_readers_see_single_wrap() {
        // every reader observes the same drop from 999 to 5 at most once
        let clock = Arc::new(scripted(1000, 1000, &[999, 5]));
        let first = clock.now();
        assert_eq!(first.sec, 0);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                thread::spawn(move || clock.now())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), TimeVal::new(1, 5_000));
        }
    }

    #[test]
    fn test_tick_conversion() {
        let clock = scripted(60, u32::MAX as u64, &[]);
        assert_eq!(clock.ticks_for(Duration::from_secs(2)), 120);
        assert_eq!(clock.ticks_for(Duration::from_millis(500)), 30);
        assert_eq!(clock.ticks_for(Duration::ZERO), 0);
        assert_eq!(clock.duration_for(30), Duration::from_millis(500));
        assert_eq!(clock.ticks_for(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_global_clock_monotonic() {
        let c = clock();
        let a = c.now();
        let b = c.now();
        assert!(b >= a);
    }
}
