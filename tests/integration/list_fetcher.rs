//! Integration tests for the semaphore-bounded time-series fetcher

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use catalog_harvester::harvester::{HarvestError, ListFetcher};
use catalog_harvester::resume::{CheckpointStore, FailureLedger};
use catalog_harvester::shutdown::ShutdownCoordinator;
use catalog_harvester::storage::MemoryStorage;
use catalog_harvester::TaskType;

use crate::support::{ids, pipeline_config, stores, BrokenLedger, FakeSource};

fn fetcher(
    source: &Arc<FakeSource>,
    checkpoint: &Arc<CheckpointStore>,
    ledger: &Arc<FailureLedger>,
    storage: &Arc<MemoryStorage>,
    batch_size: usize,
) -> ListFetcher {
    ListFetcher::new(
        source.clone(),
        checkpoint.clone(),
        ledger.clone(),
        storage.clone(),
        pipeline_config(4, batch_size),
        ShutdownCoordinator::shared(),
    )
}

#[tokio::test]
async fn test_duplicate_input_processed_once() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::default());
    let (checkpoint, ledger, storage) = stores(dir.path());

    let report = fetcher(&source, &checkpoint, &ledger, &storage, 50)
        .run(&[101, 102, 102, 103])
        .await
        .unwrap();

    assert_eq!(report.duplicates, 1);
    assert_eq!(report.succeeded, 3);
    assert_eq!(source.series_calls(102), 1);
    assert_eq!(storage.time_series(102).len(), 2);
}

#[tokio::test]
async fn test_completed_ids_skipped_silently() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::default());
    let (checkpoint, ledger, storage) = stores(dir.path());
    checkpoint
        .mark_completed_batch(TaskType::TimeSeries, &[1, 2])
        .unwrap();

    let report = fetcher(&source, &checkpoint, &ledger, &storage, 50)
        .run(&[1, 2, 3])
        .await
        .unwrap();

    assert_eq!(report.already_completed, 2);
    assert_eq!(report.duplicates, 0);
    assert_eq!(report.succeeded, 1);
    assert_eq!(source.series_calls(1), 0);
}

#[tokio::test]
async fn test_flushes_every_batch_and_at_end() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::default());
    let (checkpoint, ledger, storage) = stores(dir.path());

    let report = fetcher(&source, &checkpoint, &ledger, &storage, 50)
        .run(&ids(120))
        .await
        .unwrap();

    assert_eq!(report.succeeded, 120);
    assert_eq!(report.flushes, 3);
    assert_eq!(storage.snapshot_batch_sizes(), vec![50, 50, 20]);
    assert_eq!(checkpoint.get_completed(TaskType::TimeSeries).len(), 120);
}

#[tokio::test]
async fn test_failures_recorded_and_isolated() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::default().unavailable(&[3, 7]));
    let (checkpoint, ledger, storage) = stores(dir.path());

    let report = fetcher(&source, &checkpoint, &ledger, &storage, 4)
        .run(&ids(10))
        .await
        .unwrap();

    assert_eq!(report.succeeded, 8);
    assert_eq!(report.failed, 2);

    let failed: Vec<u64> = checkpoint
        .get_failed(TaskType::TimeSeries)
        .into_iter()
        .collect();
    assert_eq!(failed, vec![3, 7]);

    let records = ledger.get_failures(Some(TaskType::TimeSeries));
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.reason == "unavailable"));
    assert!(ledger.get_failures(Some(TaskType::Catalog)).is_empty());

    // Catalog namespace untouched
    assert!(checkpoint.get_completed(TaskType::Catalog).is_empty());
}

#[tokio::test]
async fn test_retry_failed_reprocesses_failed_ids() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(FakeSource::default().unavailable(&[5]));
    let (checkpoint, ledger, storage) = stores(dir.path());

    fetcher(&source, &checkpoint, &ledger, &storage, 10)
        .run(&ids(6))
        .await
        .unwrap();
    assert!(checkpoint.is_failed(TaskType::TimeSeries, 5));

    source.make_available(5);
    let retry = fetcher(&source, &checkpoint, &ledger, &storage, 10)
        .retry_failed()
        .await
        .unwrap();

    assert_eq!(retry.succeeded, 1);
    assert_eq!(source.series_calls(5), 2);
    assert_eq!(source.series_calls(1), 1);
    assert!(checkpoint.is_completed(TaskType::TimeSeries, 5));
    assert!(ledger.is_empty());
}

#[tokio::test]
async fn test_shutdown_stops_new_fetches_and_flushes() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let source = Arc::new(
        FakeSource::default()
            .item_delay(Duration::from_millis(10))
            .shutdown_after(6, shutdown.clone()),
    );
    let (checkpoint, ledger, storage) = stores(dir.path());

    let report = ListFetcher::new(
        source.clone(),
        checkpoint.clone(),
        ledger.clone(),
        storage.clone(),
        pipeline_config(2, 50),
        shutdown,
    )
    .run(&ids(100))
    .await
    .unwrap();

    assert!(report.cancelled);
    assert!(report.succeeded >= 6);
    assert!(report.succeeded < 100);
    // Every started fetch was committed.
    assert_eq!(report.succeeded as usize, source.total_fetches());
    assert_eq!(
        checkpoint.get_completed(TaskType::TimeSeries).len() as u64,
        report.succeeded
    );
}

#[tokio::test]
async fn test_ledger_write_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let source = Arc::new(
        FakeSource::default()
            .unavailable(&[3])
            .item_delay(Duration::from_millis(5)),
    );
    let (checkpoint, _ledger, storage) = stores(dir.path());

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        ListFetcher::new(
            source.clone(),
            checkpoint.clone(),
            Arc::new(BrokenLedger),
            storage.clone(),
            pipeline_config(4, 50),
            ShutdownCoordinator::shared(),
        )
        .run(&ids(40)),
    )
    .await
    .expect("fetcher should stop after a ledger failure");

    assert!(matches!(result, Err(HarvestError::Resume(_))));
    assert!(source.total_fetches() < 40);
    assert!(!checkpoint.is_failed(TaskType::TimeSeries, 3));
    assert!(!checkpoint.is_completed(TaskType::TimeSeries, 3));
}
