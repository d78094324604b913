use thiserror::Error;

/// Failure taxonomy shared by every latchless structure.
///
/// CAS retries are never surfaced here; contention is absorbed inside the
/// retry loops. Only policy exhaustion and programmer-error conditions
/// (use after dispose, stale enumeration) reach the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LatchlessError {
    #[error("structure has been disposed")]
    Disposed,

    #[error("collection is empty")]
    Empty,

    #[error("collection was modified during enumeration")]
    ConcurrentModification,

    #[error("pool is exhausted")]
    Exhausted,

    #[error("key not found in cache")]
    KeyNotFound,
}

pub type Result<T> = std::result::Result<T, LatchlessError>;
