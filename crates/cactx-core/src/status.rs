//! Put completion status

use core::fmt;

/// Host status meaning "put accepted but the record is still processing"
pub const S_DB_BLOCKED: i32 = 0x01F5_0002;

/// Status carried by every put-notify callback
///
/// `PutInProgress` is not terminal: a caller receiving it must keep
/// waiting for a later completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PutStatus {
    /// Put completed
    Normal,
    /// Put failed in the database
    PutFailed,
    /// Put accepted, processing still in progress
    PutInProgress,
}

impl PutStatus {
    /// Collapse a host completion status
    ///
    /// Zero is success, `S_DB_BLOCKED` is in-progress, and every other
    /// non-zero code is a failure.
    #[inline]
    pub fn from_host(code: i32) -> Self {
        match code {
            0 => PutStatus::Normal,
            S_DB_BLOCKED => PutStatus::PutInProgress,
            _ => PutStatus::PutFailed,
        }
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        !matches!(self, PutStatus::PutInProgress)
    }
}

impl fmt::Display for PutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PutStatus::Normal => write!(f, "normal successful completion"),
            PutStatus::PutFailed => write!(f, "put failed"),
            PutStatus::PutInProgress => write!(f, "put callback in progress"),
        }
    }
}
