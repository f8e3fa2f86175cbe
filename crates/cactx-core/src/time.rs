//! Seconds/microseconds time values

use core::fmt;
use std::time::Duration;

/// Microseconds per second
pub const USEC_PER_SEC: u64 = 1_000_000;

/// A (seconds, microseconds) pair
///
/// Used both for the monotonic clock reading and for caller timeouts.
/// `usec` is always below `USEC_PER_SEC` when built through the
/// constructors here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeVal {
    pub sec: u64,
    pub usec: u64,
}

impl TimeVal {
    pub const ZERO: TimeVal = TimeVal { sec: 0, usec: 0 };

    /// Create a TimeVal, carrying excess microseconds into seconds
    pub const fn new(sec: u64, usec: u64) -> Self {
        TimeVal {
            sec: sec + usec / USEC_PER_SEC,
            usec: usec % USEC_PER_SEC,
        }
    }

    pub const fn is_zero(&self) -> bool {
        self.sec == 0 && self.usec == 0
    }

    /// Total microseconds (saturating)
    pub fn as_micros(&self) -> u64 {
        self.sec.saturating_mul(USEC_PER_SEC).saturating_add(self.usec)
    }
}

impl From<Duration> for TimeVal {
    fn from(d: Duration) -> Self {
        TimeVal {
            sec: d.as_secs(),
            usec: d.subsec_micros() as u64,
        }
    }
}

impl From<TimeVal> for Duration {
    fn from(tv: TimeVal) -> Self {
        Duration::from_secs(tv.sec).saturating_add(Duration::from_micros(tv.usec))
    }
}

impl fmt::Display for TimeVal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.sec, self.usec)
    }
}
