//! Flat id-list fan-out for the time-series pass
//!
//! Fetches are bounded by a semaphore of the configured concurrency. Results
//! are collected on the calling task, so storage writes and checkpoint batches
//! never overlap.

use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, info_span, warn, Instrument, Span};

use super::config::PipelineConfig;
use super::report::HarvestReport;
use super::HarvestError;
use crate::fetcher::{CatalogSource, FetcherResult};
use crate::resume::{CheckpointStore, FailureSink};
use crate::shutdown::SharedShutdown;
use crate::storage::Storage;
use crate::{ItemId, TaskType, TimeSeriesSnapshot};

const TASK: TaskType = TaskType::TimeSeries;

type Fetch = (ItemId, FetcherResult<Vec<TimeSeriesSnapshot>>);

/// Semaphore-bounded time-series fetcher for a known set of ids
pub struct ListFetcher {
    source: Arc<dyn CatalogSource>,
    checkpoint: Arc<CheckpointStore>,
    failures: Arc<dyn FailureSink>,
    storage: Arc<dyn Storage>,
    config: PipelineConfig,
    shutdown: SharedShutdown,
}

impl ListFetcher {
    /// Create a fetcher over injected collaborators
    pub fn new(
        source: Arc<dyn CatalogSource>,
        checkpoint: Arc<CheckpointStore>,
        failures: Arc<dyn FailureSink>,
        storage: Arc<dyn Storage>,
        config: PipelineConfig,
        shutdown: SharedShutdown,
    ) -> Self {
        Self {
            source,
            checkpoint,
            failures,
            storage,
            config,
            shutdown,
        }
    }

    /// Fetch and store time series for every id not yet completed
    ///
    /// Repeated ids count as duplicates; ids the checkpoint already completed
    /// are skipped without being reported as duplicates.
    pub async fn run(&self, ids: &[ItemId]) -> Result<HarvestReport, HarvestError> {
        let span = info_span!(
            "timeseries_run",
            ids = ids.len(),
            concurrency = self.config.concurrency,
            batch_size = self.config.batch_size
        );
        self.execute(ids.to_vec()).instrument(span).await
    }

    /// Re-fetch every id the checkpoint has marked failed
    pub async fn retry_failed(&self) -> Result<HarvestReport, HarvestError> {
        let ids: Vec<ItemId> = self.checkpoint.get_failed(TASK).into_iter().collect();
        let span = info_span!("timeseries_retry", failed = ids.len());
        self.execute(ids).instrument(span).await
    }

    async fn execute(&self, ids: Vec<ItemId>) -> Result<HarvestReport, HarvestError> {
        let mut report = HarvestReport::default();
        let mut seen: HashSet<ItemId> = HashSet::with_capacity(ids.len());
        let mut pending = Vec::with_capacity(ids.len());

        for id in ids {
            if !seen.insert(id) {
                report.duplicates += 1;
                debug!(item_id = id, "Duplicate id in input");
                continue;
            }
            if self.checkpoint.is_completed(TASK, id) {
                report.already_completed += 1;
                continue;
            }
            pending.push(id);
        }

        info!(
            pending = pending.len(),
            duplicates = report.duplicates,
            already_completed = report.already_completed,
            "Time-series run started"
        );

        let mut buffer: Vec<(ItemId, Vec<TimeSeriesSnapshot>)> =
            Vec::with_capacity(self.config.batch_size.max(1));

        if let Err(err) = self.fan_out(pending, &mut buffer, &mut report).await {
            // Buffered results are kept unless storage itself failed.
            if !matches!(err, HarvestError::Storage(_)) {
                if let Err(flush_err) = self.flush(&mut buffer, &mut report).await {
                    warn!(error = %flush_err, "Final flush after fatal error failed");
                }
            }
            return Err(err);
        }

        self.flush(&mut buffer, &mut report).await?;
        self.checkpoint.flush()?;

        report.cancelled = self.shutdown.is_shutdown_requested();
        info!(%report, "Time-series run finished");
        Ok(report)
    }

    async fn fan_out(
        &self,
        pending: Vec<ItemId>,
        buffer: &mut Vec<(ItemId, Vec<TimeSeriesSnapshot>)>,
        report: &mut HarvestReport,
    ) -> Result<(), HarvestError> {
        let batch_size = self.config.batch_size.max(1);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks: JoinSet<Fetch> = JoinSet::new();

        for id in pending {
            if self.shutdown.is_shutdown_requested() {
                info!("Stop requested, no new fetches will start");
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| HarvestError::TaskFailed(e.to_string()))?;
            let source = self.source.clone();
            tasks.spawn(
                async move {
                    let _permit = permit;
                    (id, source.fetch_time_series(id).await)
                }
                .instrument(Span::current()),
            );
            report.enqueued += 1;

            while let Some(joined) = tasks.try_join_next() {
                self.collect(joined?, buffer, report)?;
                if buffer.len() >= batch_size {
                    self.flush(buffer, report).await?;
                }
            }
        }

        // In-flight fetches always run to completion.
        while let Some(joined) = tasks.join_next().await {
            self.collect(joined?, buffer, report)?;
            if buffer.len() >= batch_size {
                self.flush(buffer, report).await?;
            }
        }
        Ok(())
    }

    fn collect(
        &self,
        (id, outcome): Fetch,
        buffer: &mut Vec<(ItemId, Vec<TimeSeriesSnapshot>)>,
        report: &mut HarvestReport,
    ) -> Result<(), HarvestError> {
        match outcome {
            Ok(snapshots) => {
                debug!(item_id = id, snapshots = snapshots.len(), "Time series fetched");
                buffer.push((id, snapshots));
            }
            Err(e) => {
                warn!(
                    item_id = id,
                    permanent = e.is_permanent(),
                    error = %e,
                    "Time-series fetch failed"
                );
                self.failures.log_failure(
                    TASK,
                    id,
                    &e.reason(),
                    Some(json!({ "error": e.to_string() })),
                )?;
                self.checkpoint.mark_failed(TASK, id)?;
                report.failed += 1;
                crate::metrics::record_item_failed(TASK);
            }
        }
        Ok(())
    }

    async fn flush(
        &self,
        buffer: &mut Vec<(ItemId, Vec<TimeSeriesSnapshot>)>,
        report: &mut HarvestReport,
    ) -> Result<(), HarvestError> {
        if buffer.is_empty() {
            return Ok(());
        }

        let batch = std::mem::take(buffer);
        let ids: Vec<ItemId> = batch.iter().map(|(id, _)| *id).collect();

        self.storage.save_time_series_bulk(&batch).await?;
        self.checkpoint.mark_completed_batch(TASK, &ids)?;
        self.failures.remove_failures(TASK, &ids)?;

        report.succeeded += ids.len() as u64;
        report.flushes += 1;
        crate::metrics::record_commit(TASK, ids.len());
        info!(count = ids.len(), "Committed time-series batch");
        Ok(())
    }
}
