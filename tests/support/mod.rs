//! Shared fixtures for integration tests

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use catalog_harvester::fetcher::{CatalogSource, FetcherError, FetcherResult};
use catalog_harvester::harvester::PipelineConfig;
use catalog_harvester::resume::{CheckpointStore, FailureLedger, FailureSink, ResumeError};
use catalog_harvester::shutdown::SharedShutdown;
use catalog_harvester::storage::MemoryStorage;
use catalog_harvester::{CatalogPage, Item, ItemId, TaskType, TimeSeriesSnapshot};
use serde_json::Value;

/// Scripted catalog: pages of ids, a set of unavailable ids, call counters
#[derive(Default)]
pub struct FakeSource {
    pages: Vec<Vec<ItemId>>,
    unavailable: Mutex<HashSet<ItemId>>,
    failing_pages: HashSet<u32>,
    item_delay: Duration,
    page_delay: Duration,
    item_calls: Mutex<HashMap<ItemId, usize>>,
    series_calls: Mutex<HashMap<ItemId, usize>>,
    fetches: AtomicUsize,
    shutdown_after: Option<(usize, SharedShutdown)>,
}

#[allow(dead_code)]
impl FakeSource {
    pub fn with_pages(pages: Vec<Vec<ItemId>>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    pub fn unavailable(self, ids: &[ItemId]) -> Self {
        self.unavailable.lock().unwrap().extend(ids.iter().copied());
        self
    }

    pub fn failing_page(mut self, page: u32) -> Self {
        self.failing_pages.insert(page);
        self
    }

    pub fn item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    /// Delay every listing fetch after the first page
    pub fn page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    /// Request shutdown once `fetches` item or series fetches have started
    pub fn shutdown_after(mut self, fetches: usize, shutdown: SharedShutdown) -> Self {
        self.shutdown_after = Some((fetches, shutdown));
        self
    }

    pub fn make_available(&self, id: ItemId) {
        self.unavailable.lock().unwrap().remove(&id);
    }

    pub fn item_calls(&self, id: ItemId) -> usize {
        self.item_calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn series_calls(&self, id: ItemId) -> usize {
        self.series_calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    async fn before_fetch(&self, calls: &Mutex<HashMap<ItemId, usize>>, id: ItemId) {
        *calls.lock().unwrap().entry(id).or_default() += 1;
        let started = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, shutdown)) = &self.shutdown_after {
            if started >= *limit {
                shutdown.request_shutdown();
            }
        }
        if !self.item_delay.is_zero() {
            tokio::time::sleep(self.item_delay).await;
        }
    }

    fn check_available(&self, id: ItemId) -> FetcherResult<()> {
        if self.unavailable.lock().unwrap().contains(&id) {
            return Err(FetcherError::ItemUnavailable(id));
        }
        Ok(())
    }
}

#[async_trait]
impl CatalogSource for FakeSource {
    async fn total_pages(&self) -> FetcherResult<u32> {
        Ok(self.pages.len() as u32)
    }

    async fn fetch_page(&self, page: u32) -> FetcherResult<CatalogPage> {
        if self.failing_pages.contains(&page) {
            return Err(FetcherError::NetworkError(format!("page {page} timed out")));
        }
        if page > 1 && !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
        let ids = self
            .pages
            .get(page as usize - 1)
            .cloned()
            .unwrap_or_default();
        Ok(CatalogPage {
            index: page,
            ids,
            total_results: None,
        })
    }

    async fn fetch_item(&self, id: ItemId) -> FetcherResult<Item> {
        self.before_fetch(&self.item_calls, id).await;
        self.check_available(id)?;
        Ok(Item::new(id, format!("Item {id}")))
    }

    async fn fetch_time_series(&self, id: ItemId) -> FetcherResult<Vec<TimeSeriesSnapshot>> {
        self.before_fetch(&self.series_calls, id).await;
        self.check_available(id)?;
        let day = |d| NaiveDate::from_ymd_opt(2024, 1, d).unwrap();
        Ok(vec![
            TimeSeriesSnapshot {
                item_id: id,
                date: day(1),
                up: id,
                down: 1,
            },
            TimeSeriesSnapshot {
                item_id: id,
                date: day(2),
                up: id + 1,
                down: 2,
            },
        ])
    }
}

/// Ledger whose failure writes always hit a full disk
#[derive(Debug, Default)]
pub struct BrokenLedger;

impl FailureSink for BrokenLedger {
    fn log_failure(
        &self,
        _task: TaskType,
        _id: ItemId,
        _reason: &str,
        _context: Option<Value>,
    ) -> Result<(), ResumeError> {
        Err(ResumeError::IoError("no space left on device".to_string()))
    }

    fn remove_failure(&self, _task: TaskType, _id: ItemId) -> Result<(), ResumeError> {
        Ok(())
    }
}

/// Checkpoint, ledger and memory storage under `dir`
pub fn stores(dir: &Path) -> (Arc<CheckpointStore>, Arc<FailureLedger>, Arc<MemoryStorage>) {
    let checkpoint =
        Arc::new(CheckpointStore::open(dir.join(".checkpoint.json"), Duration::ZERO).unwrap());
    let ledger = Arc::new(FailureLedger::open(dir.join("failures.json")).unwrap());
    (checkpoint, ledger, Arc::new(MemoryStorage::new()))
}

/// Small pool, short idle poll
pub fn pipeline_config(concurrency: usize, batch_size: usize) -> PipelineConfig {
    PipelineConfig::new(concurrency, batch_size)
        .with_save_interval(Duration::ZERO)
        .with_commit_poll_interval(Duration::from_millis(20))
}

/// Ids 1..=n as a list
pub fn ids(n: u64) -> Vec<ItemId> {
    (1..=n).collect()
}
