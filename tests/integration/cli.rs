//! Integration tests for CLI command execution against a temporary data dir

use clap::Parser;
use std::time::Duration;
use tempfile::TempDir;

use catalog_harvester::cli::{execute, Cli};
use catalog_harvester::resume::{CheckpointStore, FailureLedger, FailureSink};
use catalog_harvester::shutdown::ShutdownCoordinator;
use catalog_harvester::TaskType;

fn cli(dir: &TempDir, args: &[&str]) -> Cli {
    let data_dir = dir.path().to_str().unwrap();
    let mut argv = vec!["catalog-harvester", "--data-dir", data_dir];
    argv.extend_from_slice(args);
    Cli::try_parse_from(argv).unwrap()
}

fn seed(dir: &TempDir) {
    let checkpoint =
        CheckpointStore::open(dir.path().join(".checkpoint.json"), Duration::ZERO).unwrap();
    checkpoint
        .mark_completed_batch(TaskType::Catalog, &[1, 2])
        .unwrap();
    checkpoint
        .mark_completed_batch(TaskType::TimeSeries, &[1])
        .unwrap();
    checkpoint.mark_page_completed(1).unwrap();

    let ledger = FailureLedger::open(dir.path().join("failures.json")).unwrap();
    ledger
        .log_failure(TaskType::Catalog, 3, "unavailable", None)
        .unwrap();
}

#[tokio::test]
async fn test_clean_single_namespace_keeps_the_other() {
    let dir = TempDir::new().unwrap();
    seed(&dir);

    execute(
        &cli(&dir, &["clean", "--task", "catalog"]),
        ShutdownCoordinator::shared(),
    )
    .await
    .unwrap();

    let checkpoint =
        CheckpointStore::open(dir.path().join(".checkpoint.json"), Duration::ZERO).unwrap();
    assert!(checkpoint.get_completed(TaskType::Catalog).is_empty());
    assert!(!checkpoint.is_page_completed(1));
    assert!(checkpoint.is_completed(TaskType::TimeSeries, 1));
    assert!(dir.path().join("failures.json").exists());
}

#[tokio::test]
async fn test_clean_everything_with_failures() {
    let dir = TempDir::new().unwrap();
    seed(&dir);

    execute(
        &cli(&dir, &["clean", "--failures"]),
        ShutdownCoordinator::shared(),
    )
    .await
    .unwrap();

    assert!(!dir.path().join(".checkpoint.json").exists());
    assert!(!dir.path().join("failures.json").exists());
}

#[tokio::test]
async fn test_failures_command_reads_ledger() {
    let dir = TempDir::new().unwrap();
    seed(&dir);

    execute(
        &cli(&dir, &["failures", "--task", "catalog"]),
        ShutdownCoordinator::shared(),
    )
    .await
    .unwrap();

    // Listing is read-only.
    let ledger = FailureLedger::open(dir.path().join("failures.json")).unwrap();
    assert_eq!(ledger.len(), 1);
}

#[tokio::test]
async fn test_timeseries_with_empty_input_file_is_a_noop() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("ids.txt");
    std::fs::write(&input, "\n# nothing yet\n").unwrap();

    execute(
        &cli(&dir, &["timeseries", "--input", input.to_str().unwrap()]),
        ShutdownCoordinator::shared(),
    )
    .await
    .unwrap();

    assert!(dir.path().join("harvest.db").exists());
}

#[tokio::test]
async fn test_invalid_delay_range_rejected_before_any_work() {
    let dir = TempDir::new().unwrap();
    let result = execute(
        &cli(&dir, &["--min-delay", "4", "--max-delay", "2", "catalog"]),
        ShutdownCoordinator::shared(),
    )
    .await;

    assert!(result.is_err());
    assert!(!dir.path().join(".checkpoint.json.lock").exists());
}
