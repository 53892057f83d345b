//! Error types for the warden engine.

use crate::platform::PlatformError;
use crate::store::StoreError;

/// Top-level error type surfaced at the command boundary and by the engine.
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// A natural-key duplicate (outstanding grant, active engagement, ladder rung).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Input rejected at the command boundary.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// An engagement was asked to close a second time.
    #[error("engagement {0} is already closed")]
    AlreadyClosed(i64),

    /// Platform gateway/REST failure.
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Persistence failure.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Scheduler error (sweep wiring, shutdown).
    #[error("scheduler error: {0}")]
    Scheduler(String),
}

/// Store conflicts and misses are domain outcomes, not storage faults.
impl From<StoreError> for WardenError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::NotFound(msg) => Self::NotFound(msg),
            other => Self::Store(other),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, WardenError>;
