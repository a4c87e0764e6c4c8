//! Integration tests for the failure ledger

use tempfile::TempDir;

use catalog_harvester::resume::{FailureLedger, FailureSink};
use catalog_harvester::TaskType;

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("failures.json");

    {
        let ledger = FailureLedger::open(&path).unwrap();
        ledger
            .log_failure(TaskType::TimeSeries, 7, "unavailable", None)
            .unwrap();
        ledger
            .log_failure(TaskType::Catalog, 8, "rate_limited", None)
            .unwrap();
    }

    let reopened = FailureLedger::open(&path).unwrap();
    assert_eq!(reopened.len(), 2);

    let series = reopened.get_failures(Some(TaskType::TimeSeries));
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].id, 7);
    assert!(series[0].timestamp > 0);
}

#[test]
fn test_remove_failures_and_clear() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("failures.json");
    let ledger = FailureLedger::open(&path).unwrap();

    for id in 1..=4 {
        ledger
            .log_failure(TaskType::Catalog, id, "unavailable", None)
            .unwrap();
    }
    ledger.remove_failures(TaskType::Catalog, &[1, 3, 99]).unwrap();
    // Wrong namespace: nothing removed.
    ledger.remove_failure(TaskType::TimeSeries, 2).unwrap();

    let ids: Vec<u64> = ledger.get_failures(None).iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![2, 4]);

    ledger.clear().unwrap();
    assert!(ledger.is_empty());
    assert!(!path.exists());
}

#[test]
fn test_unreadable_ledger_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("failures.json");
    std::fs::write(&path, b"[{\"type\": \"catalog\"").unwrap();

    assert!(FailureLedger::open(&path).is_err());
}
