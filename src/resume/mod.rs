//! Resume capability for harvest runs
//!
//! Provides the checkpoint state machine and the failure ledger, both persisted
//! with atomic writes; the checkpoint also holds an advisory file lock.

pub mod atomic;
pub mod checkpoint;
pub mod failures;
pub mod lock;

pub use checkpoint::{CheckpointState, CheckpointStats, CheckpointStore};
pub use failures::{FailureLedger, FailureRecord, FailureSink, NoopFailureSink};
pub use lock::ResumeLock;

/// Resume-related errors
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// State file too large
    #[error("state file too large: {size} bytes (max: {max} bytes)")]
    StateTooLarge {
        /// Actual file size
        size: u64,
        /// Maximum allowed size
        max: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Lock error
    #[error("lock error: {0}")]
    LockError(String),
}
