//! Identifier types
//!
//! Every collection in a context is keyed by one of these ids instead of
//! holding pointers into another record.

use core::fmt;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of an execution unit (an OS thread that uses the library)
///
/// Zero is reserved as "not yet assigned".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct UnitId(u64);

static NEXT_UNIT: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // const-initialized and Drop-free, so it stays readable while other
    // thread-local destructors run at thread exit
    static CURRENT_UNIT: Cell<u64> = const { Cell::new(0) };
}

impl UnitId {
    /// Sentinel for "no unit"
    pub const NONE: UnitId = UnitId(0);

    /// Create a UnitId from a raw value
    #[inline]
    pub const fn new(id: u64) -> Self {
        UnitId(id)
    }

    /// Identity of the calling thread, assigned on first use
    pub fn current() -> Self {
        CURRENT_UNIT.with(|cell| {
            let mut id = cell.get();
            if id == 0 {
                id = NEXT_UNIT.fetch_add(1, Ordering::Relaxed);
                cell.set(id);
            }
            UnitId(id)
        })
    }

    /// Get the raw u64 value
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Check if this is the NONE sentinel
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "UnitId(NONE)")
        } else {
            write!(f, "UnitId({})", self.0)
        }
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! counter_id {
    ($(#[$meta:meta])* $name:ident, $counter:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(u64);

        static $counter: AtomicU64 = AtomicU64::new(1);

        impl $name {
            /// Allocate the next process-unique id
            #[inline]
            pub fn next() -> Self {
                $name($counter.fetch_add(1, Ordering::Relaxed))
            }

            /// Get the raw u64 value
            #[inline]
            pub const fn as_u64(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

counter_id!(
    /// Identifier of a client context
    ContextId, NEXT_CONTEXT
);
counter_id!(
    /// Identifier of a local channel registered on a context
    ChannelId, NEXT_CHANNEL
);
counter_id!(
    /// Identifier of an event subscription owned by a context
    SubscriptionId, NEXT_SUBSCRIPTION
);
counter_id!(
    /// Identifier of a put-notify request
    PutId, NEXT_PUT
);

/// Opaque handle the event facility hands out for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct EventHandle(pub u64);
