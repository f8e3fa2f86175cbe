//! Worker health monitoring registry
//!
//! Receive workers register here while they run. Teardown removes a
//! worker before suspending it so a stopped worker is not reported as
//! hung.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, OnceLock};

use cactx_core::id::UnitId;

#[derive(Debug, Default)]
pub struct Watchdog {
    units: Mutex<HashSet<UnitId>>,
}

static WATCHDOG: OnceLock<Watchdog> = OnceLock::new();

/// Process-wide watchdog
pub fn watchdog() -> &'static Watchdog {
    WATCHDOG.get_or_init(Watchdog::default)
}

impl Watchdog {
    fn lock(&self) -> MutexGuard<'_, HashSet<UnitId>> {
        self.units.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, unit: UnitId) -> bool {
        self.lock().insert(unit)
    }

    pub fn remove(&self, unit: UnitId) -> bool {
        self.lock().remove(&unit)
    }

    pub fn is_watched(&self, unit: UnitId) -> bool {
        self.lock().contains(&unit)
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

    #[test]
    fn test_insert_remove() {
        let wd = Watchdog::default();
        let u = UnitId::new(77);
        assert!(wd.insert(u));
        assert!(!wd.insert(u));
        assert!(wd.is_watched(u));
        assert!(wd.remove(u));
        assert!(!wd.remove(u));
        assert!(wd.is_empty());
    }
}
