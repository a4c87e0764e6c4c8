//! # Catalog Harvester Library
//!
//! Harvests a store catalog (item details) and per-item review time series from a
//! rate-limited, unreliable HTTP service, persisting everything durably and resumably.
//!
//! ## Features
//!
//! - **Adaptive Rate Limiting**: Token bucket that throttles on 429 responses and recovers gradually
//! - **Retrying Fetch Client**: Exponential backoff with jitter and a separate rate-limit path
//! - **Resume Capability**: Crash-safe checkpoint state, partitioned per task type
//! - **Failure Ledger**: Persisted record of why each id failed, for diagnostics and targeted retry
//! - **Bounded Concurrency**: Producer / worker pool / committer pipeline with queue backpressure
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use catalog_harvester::fetcher::{http::FetchClient, store_api::StoreApi};
//! use catalog_harvester::harvester::{CatalogPipeline, CatalogRunOptions, HarvestConfig, RateLimiter};
//! use catalog_harvester::resume::{CheckpointStore, FailureLedger};
//! use catalog_harvester::shutdown::ShutdownCoordinator;
//! use catalog_harvester::storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarvestConfig::default();
//! let limiter = Arc::new(RateLimiter::new(config.rate, config.burst));
//! let client = FetchClient::new(config.http.clone(), limiter)?;
//! let source = Arc::new(StoreApi::new(client, Default::default(), config.rollup_utc_offset_hours));
//!
//! let checkpoint = Arc::new(CheckpointStore::open("./data/.checkpoint.json", config.pipeline.save_interval)?);
//! let failures = Arc::new(FailureLedger::open("./data/failures.json")?);
//! let storage = Arc::new(MemoryStorage::new());
//!
//! let pipeline = CatalogPipeline::new(
//!     source,
//!     checkpoint,
//!     failures,
//!     storage,
//!     config.pipeline.clone(),
//!     ShutdownCoordinator::shared(),
//! );
//! let report = pipeline.run(CatalogRunOptions::default().with_page_limit(10)).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`harvester`] - Rate limiter, configuration, and the two orchestration pipelines
//! - [`fetcher`] - Retrying HTTP client and the store API surface
//! - [`resume`] - Checkpoint state machine, failure ledger, atomic writes, file locking
//! - [`storage`] - Durable item / time-series store collaborators
//! - [`shutdown`] - Cooperative cancellation shared by every role

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// CLI command implementations
pub mod cli;

/// Fetch-and-commit orchestration
pub mod harvester;

/// HTTP fetching and response parsing
pub mod fetcher;

/// Observability metrics
pub mod metrics;

/// Resumable execution state
pub mod resume;

/// Graceful shutdown coordination shared across modules
pub mod shutdown;

/// Storage collaborators
pub mod storage;

/// Catalog item identifier as assigned by the upstream store
pub type ItemId = u64;

/// Independent checkpoint / failure partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskType {
    /// Paginated catalog scan producing item details
    #[serde(rename = "catalog")]
    Catalog,
    /// Flat id-list scan producing review time series
    #[serde(rename = "timeseries")]
    TimeSeries,
}

impl TaskType {
    /// Stable lowercase name used in files and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Catalog => "catalog",
            TaskType::TimeSeries => "timeseries",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "catalog" | "game" | "games" => Ok(TaskType::Catalog),
            "timeseries" | "review" | "reviews" => Ok(TaskType::TimeSeries),
            _ => Err(format!(
                "Invalid task type: {s}. Valid options: catalog, timeseries"
            )),
        }
    }
}

/// Item detail payload fetched from the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    /// Store identifier
    pub id: ItemId,
    /// Display name
    pub name: String,
    /// Release date as reported by the store (free text)
    pub release_date: String,
    /// Formatted final price, "Free" when the store reports none
    pub price: String,
    /// Developer names
    pub developers: Vec<String>,
    /// Publisher names
    pub publishers: Vec<String>,
    /// Genre descriptions
    pub genres: Vec<String>,
    /// Short description
    pub description: String,
}

impl Item {
    /// Create an item with only an id and a name; remaining fields take store defaults
    pub fn new(id: ItemId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            release_date: String::new(),
            price: "Free".to_string(),
            developers: Vec::new(),
            publishers: Vec::new(),
            genres: Vec::new(),
            description: String::new(),
        }
    }

    /// Validate item data integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.id == 0 {
            return Err("Item id must be non-zero".to_string());
        }

        if self.name.trim().is_empty() {
            return Err(format!("Item {} has an empty name", self.id));
        }

        Ok(())
    }
}

/// One day's review counts for one item
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeSeriesSnapshot {
    /// Item the counts belong to
    pub item_id: ItemId,
    /// Calendar day of the rollup
    pub date: NaiveDate,
    /// Positive recommendations
    pub up: u64,
    /// Negative recommendations
    pub down: u64,
}

impl TimeSeriesSnapshot {
    /// Build a snapshot from a rollup record (unix seconds), dated in the given UTC offset
    pub fn from_rollup(
        item_id: ItemId,
        unix_seconds: i64,
        up: u64,
        down: u64,
        offset: FixedOffset,
    ) -> Option<Self> {
        let date = DateTime::from_timestamp(unix_seconds, 0)?
            .with_timezone(&offset)
            .date_naive();
        Some(Self {
            item_id,
            date,
            up,
            down,
        })
    }
}

/// One page of the catalog listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPage {
    /// 1-based page index
    pub index: u32,
    /// Item ids in listing order
    pub ids: Vec<ItemId>,
    /// Total result count embedded in the listing, if readable
    pub total_results: Option<u64>,
}
