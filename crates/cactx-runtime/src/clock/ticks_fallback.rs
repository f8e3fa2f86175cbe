//! Portable tick source
//!
//! Scales `Instant` to a configured tick rate. Used where no OS tick
//! counter is available.

use super::TickSource;
use std::time::Instant;

/// `Instant`-based tick counter
pub struct InstantTicks {
    origin: Instant,
    rate: u64,
}

impl InstantTicks {
    pub fn new(rate: u64) -> Self {
        Self {
            origin: Instant::now(),
            rate,
        }
    }
}

impl TickSource for InstantTicks {
    fn rate(&self) -> u64 {
        self.rate
    }

    fn ticks(&self) -> u64 {
        let nanos = self.origin.elapsed().as_nanos();
        let ticks = nanos.saturating_mul(self.rate as u128) / 1_000_000_000;
        u64::try_from(ticks).unwrap_or(u64::MAX)
    }

    fn wrap_period(&self) -> u64 {
        u64::MAX
    }

    fn name(&self) -> &'static str {
        "instant"
    }
}
