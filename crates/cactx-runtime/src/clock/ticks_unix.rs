//! Unix tick source
//!
//! Reads the process tick counter from `times(2)` and the rate from
//! `sysconf(_SC_CLK_TCK)`. The counter is exposed as a free-running
//! 32-bit value, so long-lived processes see real wraparound.

use super::TickSource;
use nix::unistd::{sysconf, SysconfVar};

/// `times(2)`-based tick counter
pub struct ProcessTicks {
    rate: u64,
}

impl ProcessTicks {
    /// Query the OS tick rate
    ///
    /// A failed or non-positive `CLK_TCK` is recorded as rate 0, which
    /// `MonotonicClock::new` rejects.
    pub fn new() -> Self {
        let rate = match sysconf(SysconfVar::CLK_TCK) {
            Ok(Some(r)) if r > 0 => r as u64,
            _ => 0,
        };
        Self { rate }
    }
}

impl Default for ProcessTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for ProcessTicks {
    fn rate(&self) -> u64 {
        self.rate
    }

    fn ticks(&self) -> u64 {
        // Safety: times() only writes into the tms buffer we own
        let raw = unsafe {
            let mut buf: libc::tms = std::mem::zeroed();
            libc::times(&mut buf)
        };
        (raw as u64) & (u32::MAX as u64)
    }

    fn wrap_period(&self) -> u64 {
        1 << 32
    }

    fn name(&self) -> &'static str {
        "times"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_reported() {
        let ticks = ProcessTicks::new();
        assert!(ticks.rate() > 0);
    }

    #[test]
    fn test_ticks_fit_counter_width() {
        let ticks = ProcessTicks::new();
        assert!(ticks.ticks() < ticks.wrap_period());
    }
}
