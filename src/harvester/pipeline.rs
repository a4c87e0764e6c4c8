//! Catalog pipeline: producer, worker pool, committer
//!
//! ```text
//! producer --(id queue)--> workers x N --(result queue)--> committer --> storage
//!                               |                              |
//!                               +-- failures: ledger + checkpoint  +-- checkpoint batch
//! ```
//!
//! Both queues are bounded; a full id queue blocks the producer, which keeps
//! memory flat however large the catalog is. A page is marked complete only
//! after every id it enqueued has been committed, failed, or skipped.

use futures::future::join_all;
use serde_json::json;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::config::PipelineConfig;
use super::report::{HarvestReport, PageTracker, RunStats};
use super::HarvestError;
use crate::fetcher::parser::DEFAULT_TOTAL_PAGES;
use crate::fetcher::{CatalogSource, FetcherError};
use crate::resume::{CheckpointStore, FailureSink};
use crate::shutdown::SharedShutdown;
use crate::storage::Storage;
use crate::{Item, ItemId, TaskType};

const TASK: TaskType = TaskType::Catalog;

/// Per-run switches for [`CatalogPipeline::run`]
#[derive(Debug, Clone, Default)]
pub struct CatalogRunOptions {
    /// Stop after this many pages
    pub page_limit: Option<u32>,
    /// Fetch ids even if the checkpoint has them marked failed, including
    /// failed ids on pages a previous run completed
    pub force_retry: bool,
}

impl CatalogRunOptions {
    /// Scan at most `pages` pages
    pub fn with_page_limit(mut self, pages: u32) -> Self {
        self.page_limit = Some(pages);
        self
    }

    /// Retry ids previously marked failed
    pub fn with_force_retry(mut self, force_retry: bool) -> Self {
        self.force_retry = force_retry;
        self
    }
}

/// Where the producer takes ids from
enum Feed {
    Pages { page_limit: Option<u32> },
    Ids(Vec<ItemId>),
}

#[derive(Debug)]
struct WorkItem {
    page: Option<u32>,
    id: ItemId,
}

#[derive(Debug)]
struct Fetched {
    page: Option<u32>,
    item: Item,
}

/// State shared by the roles of one run
struct RunContext {
    source: Arc<dyn CatalogSource>,
    checkpoint: Arc<CheckpointStore>,
    failures: Arc<dyn FailureSink>,
    storage: Arc<dyn Storage>,
    shutdown: SharedShutdown,
    force_retry: bool,
    halted: AtomicBool,
    /// Ids sitting in the id queue
    queued: AtomicUsize,
    pages: PageTracker,
    stats: RunStats,
}

impl RunContext {
    fn should_stop(&self) -> bool {
        self.halted.load(Ordering::SeqCst) || self.shutdown.is_shutdown_requested()
    }

    /// Stop every role after a fatal error
    fn halt(&self, err: &HarvestError) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            error!(error = %err, "Fatal error, stopping catalog run");
        }
    }

    fn complete_page(&self, page: Option<u32>) -> Result<(), HarvestError> {
        if let Some(page) = page {
            self.checkpoint.mark_page_completed(page)?;
            debug!(page, "Catalog page completed");
        }
        Ok(())
    }

    fn resolve(&self, page: Option<u32>) -> Result<(), HarvestError> {
        match page {
            Some(page) => self.complete_page(self.pages.resolve(page)),
            None => Ok(()),
        }
    }

    fn record_failure(&self, work: &WorkItem, err: &FetcherError) -> Result<(), HarvestError> {
        warn!(
            item_id = work.id,
            page = ?work.page,
            permanent = err.is_permanent(),
            error = %err,
            "Item fetch failed"
        );
        self.failures.log_failure(
            TASK,
            work.id,
            &err.reason(),
            Some(json!({ "page": work.page, "error": err.to_string() })),
        )?;
        self.checkpoint.mark_failed(TASK, work.id)?;
        RunStats::incr(&self.stats.failed);
        crate::metrics::record_item_failed(TASK);
        Ok(())
    }
}

/// Producer / worker pool / committer orchestration for the catalog scan
pub struct CatalogPipeline {
    source: Arc<dyn CatalogSource>,
    checkpoint: Arc<CheckpointStore>,
    failures: Arc<dyn FailureSink>,
    storage: Arc<dyn Storage>,
    config: PipelineConfig,
    shutdown: SharedShutdown,
}

impl CatalogPipeline {
    /// Create a pipeline over injected collaborators
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

    /// Scan catalog pages and commit every new item
    pub async fn run(&self, options: CatalogRunOptions) -> Result<HarvestReport, HarvestError> {
        let span = info_span!(
            "catalog_run",
            page_limit = ?options.page_limit,
            force_retry = options.force_retry,
            concurrency = self.config.concurrency,
            batch_size = self.config.batch_size
        );
        self.execute(
            Feed::Pages {
                page_limit: options.page_limit,
            },
            options.force_retry,
        )
        .instrument(span)
        .await
    }

    /// Re-fetch every id the checkpoint has marked failed
    pub async fn retry_failed(&self) -> Result<HarvestReport, HarvestError> {
        let ids: Vec<ItemId> = self.checkpoint.get_failed(TASK).into_iter().collect();
        let span = info_span!("catalog_retry", failed = ids.len());
        if ids.is_empty() {
            info!(parent: &span, "No failed catalog ids to retry");
            return Ok(HarvestReport::default());
        }
        self.execute(Feed::Ids(ids), true).instrument(span).await
    }

    async fn execute(&self, feed: Feed, force_retry: bool) -> Result<HarvestReport, HarvestError> {
        let ctx = Arc::new(RunContext {
            source: self.source.clone(),
            checkpoint: self.checkpoint.clone(),
            failures: self.failures.clone(),
            storage: self.storage.clone(),
            shutdown: self.shutdown.clone(),
            force_retry,
            halted: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
            pages: PageTracker::default(),
            stats: RunStats::default(),
        });

        let (id_tx, id_rx) = mpsc::channel::<WorkItem>(self.config.id_queue_capacity.max(1));
        let (result_tx, result_rx) =
            mpsc::channel::<Fetched>(self.config.result_queue_capacity.max(1));
        let id_rx = Arc::new(Mutex::new(id_rx));

        info!("Catalog run started");

        let producer = spawn_role(&ctx, produce(ctx.clone(), id_tx, feed));

        let workers: Vec<JoinHandle<Result<(), HarvestError>>> = (0..self.config.concurrency)
            .map(|worker_id| {
                spawn_role(
                    &ctx,
                    work(ctx.clone(), worker_id, id_rx.clone(), result_tx.clone()),
                )
            })
            .collect();
        // Workers own the only remaining handles; the queues close when they exit.
        drop(id_rx);
        drop(result_tx);

        let committer = spawn_role(
            &ctx,
            commit(
                ctx.clone(),
                result_rx,
                self.config.batch_size,
                self.config.commit_poll_interval,
            ),
        );

        let mut first_error: Option<HarvestError> = None;
        let mut keep = |result: Result<Result<(), HarvestError>, tokio::task::JoinError>| {
            let outcome = result.map_err(HarvestError::from).and_then(|r| r);
            if let Err(err) = outcome {
                ctx.halt(&err);
                first_error.get_or_insert(err);
            }
        };

        keep(producer.await);
        for worker in join_all(workers).await {
            keep(worker);
        }
        keep(committer.await);

        if let Err(err) = self.checkpoint.flush() {
            first_error.get_or_insert(err.into());
        }

        if let Some(err) = first_error {
            return Err(err);
        }

        let report = ctx.stats.snapshot(self.shutdown.is_shutdown_requested());
        if ctx.pages.pending() > 0 {
            debug!(
                pending = ctx.pages.pending(),
                "Pages left incomplete; they will be rescanned"
            );
        }
        info!(%report, "Catalog run finished");
        Ok(report)
    }
}

/// Spawn one role in the current span; a fatal error halts the others right away
fn spawn_role<F>(ctx: &Arc<RunContext>, role: F) -> JoinHandle<Result<(), HarvestError>>
where
    F: Future<Output = Result<(), HarvestError>> + Send + 'static,
{
    let ctx = ctx.clone();
    tokio::spawn(
        async move {
            let result = role.await;
            if let Err(err) = &result {
                ctx.halt(err);
            }
            result
        }
        .in_current_span(),
    )
}

async fn produce(
    ctx: Arc<RunContext>,
    id_tx: mpsc::Sender<WorkItem>,
    feed: Feed,
) -> Result<(), HarvestError> {
    match feed {
        Feed::Ids(ids) => {
            for id in ids {
                if ctx.should_stop() {
                    break;
                }
                if !enqueue(&ctx, &id_tx, WorkItem { page: None, id }).await {
                    break;
                }
            }
            Ok(())
        }
        Feed::Pages { page_limit } => {
            let mut seen: HashSet<ItemId> = HashSet::new();
            produce_pages(&ctx, &id_tx, page_limit, &mut seen).await?;
            if ctx.force_retry {
                requeue_failed(&ctx, &id_tx, &seen).await;
            }
            Ok(())
        }
    }
}

/// Forced runs also re-attempt failed ids whose pages are already complete
async fn requeue_failed(
    ctx: &RunContext,
    id_tx: &mpsc::Sender<WorkItem>,
    seen: &HashSet<ItemId>,
) {
    let failed: Vec<ItemId> = ctx
        .checkpoint
        .get_failed(TASK)
        .into_iter()
        .filter(|id| !seen.contains(id))
        .collect();
    if failed.is_empty() {
        return;
    }
    info!(count = failed.len(), "Re-queueing previously failed ids");
    for id in failed {
        if ctx.should_stop() || !enqueue(ctx, id_tx, WorkItem { page: None, id }).await {
            break;
        }
    }
}

/// Blocking send onto the id queue; false once the workers are gone
async fn enqueue(ctx: &RunContext, id_tx: &mpsc::Sender<WorkItem>, work: WorkItem) -> bool {
    ctx.queued.fetch_add(1, Ordering::SeqCst);
    if id_tx.send(work).await.is_err() {
        ctx.queued.fetch_sub(1, Ordering::SeqCst);
        return false;
    }
    RunStats::incr(&ctx.stats.enqueued);
    true
}

async fn produce_pages(
    ctx: &RunContext,
    id_tx: &mpsc::Sender<WorkItem>,
    page_limit: Option<u32>,
    seen: &mut HashSet<ItemId>,
) -> Result<(), HarvestError> {
    let total = match ctx.source.total_pages().await {
        Ok(total) => total,
        Err(e) => {
            warn!(
                error = %e,
                fallback = DEFAULT_TOTAL_PAGES,
                "Could not determine catalog size, using fallback"
            );
            DEFAULT_TOTAL_PAGES
        }
    };
    let last_page = page_limit.map_or(total, |limit| limit.min(total));
    info!(total_pages = total, last_page, "Scanning catalog");

    for page in 1..=last_page {
        if ctx.should_stop() {
            info!(page, "Stop requested, producer exiting");
            break;
        }

        if ctx.checkpoint.is_page_completed(page) {
            RunStats::incr(&ctx.stats.pages_skipped);
            debug!(page, "Page already completed, skipping");
            continue;
        }

        let listing = match ctx.source.fetch_page(page).await {
            Ok(listing) => listing,
            Err(e) => {
                // Left incomplete; the next run rescans it.
                warn!(page, error = %e, "Failed to fetch catalog page");
                continue;
            }
        };
        RunStats::incr(&ctx.stats.pages_scanned);

        if listing.ids.is_empty() {
            info!(page, "Empty catalog page, end of listing");
            break;
        }

        let mut workers_gone = false;
        for id in listing.ids {
            if !seen.insert(id) {
                RunStats::incr(&ctx.stats.duplicates);
                debug!(item_id = id, page, "Duplicate id in this run");
                continue;
            }
            if ctx.checkpoint.is_completed(TASK, id) {
                RunStats::incr(&ctx.stats.already_completed);
                continue;
            }

            ctx.pages.register(page);
            if !enqueue(ctx, id_tx, WorkItem { page: Some(page), id }).await {
                workers_gone = true;
                break;
            }
        }

        if workers_gone {
            debug!(page, "Id queue closed, producer exiting");
            break;
        }

        ctx.complete_page(ctx.pages.seal(page))?;
    }

    Ok(())
}

async fn work(
    ctx: Arc<RunContext>,
    worker_id: usize,
    id_rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    result_tx: mpsc::Sender<Fetched>,
) -> Result<(), HarvestError> {
    loop {
        if ctx.should_stop() {
            debug!(worker_id, "Stop requested, worker exiting");
            break;
        }

        let next = { id_rx.lock().await.recv().await };
        let Some(work) = next else {
            break;
        };
        ctx.queued.fetch_sub(1, Ordering::SeqCst);

        if !ctx.force_retry && ctx.checkpoint.is_failed(TASK, work.id) {
            RunStats::incr(&ctx.stats.skipped_failed);
            debug!(item_id = work.id, "Previously failed, skipping");
            ctx.resolve(work.page)?;
            continue;
        }

        match ctx.source.fetch_item(work.id).await {
            Ok(item) => {
                debug!(worker_id, item_id = work.id, name = %item.name, "Item fetched");
                let fetched = Fetched {
                    page: work.page,
                    item,
                };
                if result_tx.send(fetched).await.is_err() {
                    debug!(worker_id, "Result queue closed, worker exiting");
                    break;
                }
            }
            Err(e) => {
                ctx.record_failure(&work, &e)?;
                ctx.resolve(work.page)?;
            }
        }
    }
    Ok(())
}

async fn commit(
    ctx: Arc<RunContext>,
    mut result_rx: mpsc::Receiver<Fetched>,
    batch_size: usize,
    poll_interval: std::time::Duration,
) -> Result<(), HarvestError> {
    let batch_size = batch_size.max(1);
    let mut buffer: Vec<Fetched> = Vec::with_capacity(batch_size);

    loop {
        match timeout(poll_interval, result_rx.recv()).await {
            Ok(Some(fetched)) => {
                buffer.push(fetched);
                if buffer.len() >= batch_size {
                    flush(&ctx, &mut buffer).await?;
                }
            }
            Ok(None) => break,
            Err(_) => {
                // Both queues idle: write what we have instead of waiting for a full batch.
                let drained = ctx.queued.load(Ordering::SeqCst) == 0 && result_rx.is_empty();
                if drained && !buffer.is_empty() {
                    flush(&ctx, &mut buffer).await?;
                }
            }
        }
    }

    flush(&ctx, &mut buffer).await
}

async fn flush(ctx: &RunContext, buffer: &mut Vec<Fetched>) -> Result<(), HarvestError> {
    if buffer.is_empty() {
        return Ok(());
    }

    let (pages, items): (Vec<Option<u32>>, Vec<Item>) = std::mem::take(buffer)
        .into_iter()
        .map(|fetched| (fetched.page, fetched.item))
        .unzip();
    let ids: Vec<ItemId> = items.iter().map(|item| item.id).collect();

    ctx.storage.save_items_batch(&items).await?;
    ctx.checkpoint.mark_completed_batch(TASK, &ids)?;
    ctx.failures.remove_failures(TASK, &ids)?;

    RunStats::add(&ctx.stats.succeeded, ids.len() as u64);
    RunStats::incr(&ctx.stats.flushes);
    crate::metrics::record_commit(TASK, ids.len());
    info!(count = ids.len(), "Committed item batch");

    for page in pages {
        ctx.resolve(page)?;
    }
    Ok(())
}
