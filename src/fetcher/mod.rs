//! Data fetching from the store
//!
//! [`http::FetchClient`] wraps every GET with rate limiting and retries,
//! [`parser`] turns responses into domain types, and [`store_api::StoreApi`]
//! ties both to the concrete endpoints behind the [`CatalogSource`] trait.

pub mod http;
pub mod parser;
pub mod store_api;

use async_trait::async_trait;

use crate::{CatalogPage, Item, ItemId, TimeSeriesSnapshot};

/// Fetcher errors
#[derive(Debug, thiserror::Error)]
pub enum FetcherError {
    /// HTTP request error (client construction, unreadable body)
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Response parse error
    #[error("parse error: {0}")]
    ParseError(String),

    /// Invalid response
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Network error
    #[error("network error: {0}")]
    NetworkError(String),

    /// Retries exhausted on network errors or non-2xx responses
    #[error("transient failure after {attempts} attempts: {message}")]
    TransientFailure {
        /// Attempts made, including the first
        attempts: u32,
        /// Last failure seen
        message: String,
    },

    /// Upstream kept answering 429
    #[error("rate limit exceeded after {waits} waits")]
    RateLimitExceeded {
        /// Rate-limit waits performed before giving up
        waits: u32,
    },

    /// The store reports the item as unavailable or delisted
    #[error("item {0} unavailable")]
    ItemUnavailable(ItemId),
}

impl FetcherError {
    /// Whether retrying on a later run is pointless without a forced retry
    pub fn is_permanent(&self) -> bool {
        matches!(self, FetcherError::ItemUnavailable(_))
    }

    /// Reason string recorded in the failure ledger
    pub fn reason(&self) -> String {
        match self {
            FetcherError::ItemUnavailable(_) => "unavailable".to_string(),
            FetcherError::TransientFailure { message, .. } => format!("transient: {message}"),
            FetcherError::RateLimitExceeded { .. } => "rate_limited".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// Everything the pipelines need from the upstream store
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Number of catalog pages, if it can be determined
    async fn total_pages(&self) -> FetcherResult<u32>;

    /// Ids listed on 1-based catalog page `page`
    async fn fetch_page(&self, page: u32) -> FetcherResult<CatalogPage>;

    /// Detail payload for one item
    async fn fetch_item(&self, id: ItemId) -> FetcherResult<Item>;

    /// Daily review rollups for one item
    async fn fetch_time_series(&self, id: ItemId) -> FetcherResult<Vec<TimeSeriesSnapshot>>;
}
