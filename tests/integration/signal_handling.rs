use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use catalog_harvester::harvester::{CatalogPipeline, CatalogRunOptions};
use catalog_harvester::resume::CheckpointStore;
use catalog_harvester::shutdown::ShutdownCoordinator;
use catalog_harvester::TaskType;

use crate::support::{ids, pipeline_config, stores, FakeSource};

#[tokio::test]
async fn shutdown_notifies_waiters() {
    let shutdown = ShutdownCoordinator::shared();
    let waiter = {
        let handle = shutdown.clone();
        tokio::spawn(async move {
            handle.wait_for_shutdown().await;
            true
        })
    };

    // Give the task time to start waiting
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown.request_shutdown();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter).await;
    assert!(result.is_ok());
}

/// Stop mid-run: in-flight fetches finish, buffered results are flushed, and
/// the checkpoint on disk matches what storage holds.
#[tokio::test]
async fn shutdown_mid_catalog_run_flushes_buffered_items() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    let source = Arc::new(
        FakeSource::with_pages(vec![ids(40), (41..=80).collect()])
            .item_delay(Duration::from_millis(10))
            .shutdown_after(5, shutdown.clone()),
    );

    let (checkpoint, ledger, storage) = stores(dir.path());
    let report = CatalogPipeline::new(
        source.clone(),
        checkpoint.clone(),
        ledger.clone(),
        storage.clone(),
        // Batch larger than anything fetched: only the final flush writes.
        pipeline_config(2, 500),
        shutdown.clone(),
    )
    .run(CatalogRunOptions::default())
    .await
    .unwrap();

    assert!(report.cancelled);
    assert!(report.succeeded >= 5);
    assert!(report.succeeded < 80);
    assert_eq!(report.succeeded as usize, source.total_fetches());
    assert_eq!(storage.item_count() as u64, report.succeeded);
    assert!(!checkpoint.is_page_completed(2));

    drop(checkpoint);
    let reopened =
        CheckpointStore::open(dir.path().join(".checkpoint.json"), Duration::ZERO).unwrap();
    assert_eq!(
        reopened.get_completed(TaskType::Catalog).len() as u64,
        report.succeeded
    );
}

/// A run that starts after shutdown was requested does no work.
#[tokio::test]
async fn shutdown_before_run_fetches_nothing() {
    let dir = TempDir::new().unwrap();
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();

    let source = Arc::new(FakeSource::with_pages(vec![ids(10)]));
    let (checkpoint, ledger, storage) = stores(dir.path());
    let report = CatalogPipeline::new(
        source.clone(),
        checkpoint,
        ledger,
        storage,
        pipeline_config(2, 10),
        shutdown,
    )
    .run(CatalogRunOptions::default())
    .await
    .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.succeeded, 0);
    assert_eq!(source.total_fetches(), 0);
}
