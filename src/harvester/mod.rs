//! Fetch-and-commit orchestration
//!
//! [`CatalogPipeline`] drives the paginated catalog scan through a producer, a
//! fixed worker pool and a single committer. [`ListFetcher`] drives the flat
//! id-list time-series scan through a semaphore-bounded fan-out. Both share the
//! [`RateLimiter`], checkpoint, failure ledger and storage they are given.

pub mod config;
pub mod list;
pub mod pipeline;
pub mod rate_limit;
pub mod report;

pub use config::{HarvestConfig, HttpConfig, PipelineConfig};
pub use list::ListFetcher;
pub use pipeline::{CatalogPipeline, CatalogRunOptions};
pub use rate_limit::RateLimiter;
pub use report::HarvestReport;

use crate::fetcher::FetcherError;
use crate::resume::ResumeError;
use crate::storage::StorageError;

/// Errors that end a harvest run
///
/// Per-id fetch failures never surface here; they are recorded in the failure
/// ledger and checkpoint instead.
#[derive(Debug, thiserror::Error)]
pub enum HarvestError {
    /// Fetch error outside per-id processing
    #[error("fetch error: {0}")]
    Fetcher(#[from] FetcherError),

    /// Checkpoint or failure ledger could not be persisted
    #[error("resume state error: {0}")]
    Resume(#[from] ResumeError),

    /// Storage write failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A pipeline task panicked or was aborted
    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl From<tokio::task::JoinError> for HarvestError {
    fn from(err: tokio::task::JoinError) -> Self {
        HarvestError::TaskFailed(err.to_string())
    }
}
