//! Failure ledger
//!
//! One record per (task type, id) explaining why the last attempt failed. The
//! ledger is diagnostic: the checkpoint decides whether an id is done, the
//! ledger says why it is not.

use super::atomic::write_atomic;
use super::ResumeError;
use crate::{ItemId, TaskType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Maximum allowed ledger file size (64 MB)
pub const MAX_LEDGER_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Why one id failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Namespace of the failed fetch
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Failed id
    pub id: ItemId,
    /// Human-readable reason
    pub reason: String,
    /// Unix seconds of the latest failure
    pub timestamp: i64,
    /// Free-form details
    #[serde(default)]
    pub context: Value,
}

/// Destination for failure records
///
/// Pipelines hold an `Arc<dyn FailureSink>`; [`NoopFailureSink`] disables
/// logging without call-site checks.
pub trait FailureSink: Send + Sync {
    /// Insert or update the record for (task, id)
    ///
    /// `context` replaces the stored context only when provided.
    fn log_failure(
        &self,
        task: TaskType,
        id: ItemId,
        reason: &str,
        context: Option<Value>,
    ) -> Result<(), ResumeError>;

    /// Delete the record for (task, id), if any
    fn remove_failure(&self, task: TaskType, id: ItemId) -> Result<(), ResumeError>;

    /// Delete records for every id with at most one write
    fn remove_failures(&self, task: TaskType, ids: &[ItemId]) -> Result<(), ResumeError> {
        for &id in ids {
            self.remove_failure(task, id)?;
        }
        Ok(())
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFailureSink;

impl FailureSink for NoopFailureSink {
    fn log_failure(
        &self,
        _task: TaskType,
        _id: ItemId,
        _reason: &str,
        _context: Option<Value>,
    ) -> Result<(), ResumeError> {
        Ok(())
    }

    fn remove_failure(&self, _task: TaskType, _id: ItemId) -> Result<(), ResumeError> {
        Ok(())
    }
}

/// File-backed failure ledger, rewritten atomically on every change
#[derive(Debug)]
pub struct FailureLedger {
    path: PathBuf,
    records: Mutex<Vec<FailureRecord>>,
}

impl FailureLedger {
    /// Open (or create) the ledger at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ResumeError> {
        let path = path.as_ref().to_path_buf();
        let records = if path.exists() {
            load_records(&path)?
        } else {
            Vec::new()
        };
        debug!(path = %path.display(), records = records.len(), "Failure ledger loaded");
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn records(&self) -> MutexGuard<'_, Vec<FailureRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, records: &[FailureRecord]) -> Result<(), ResumeError> {
        let json = serde_json::to_vec_pretty(records)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;
        write_atomic(&self.path, &json)
    }

    /// All records, optionally restricted to one task type
    pub fn get_failures(&self, task: Option<TaskType>) -> Vec<FailureRecord> {
        self.records()
            .iter()
            .filter(|r| task.is_none_or(|t| r.task_type == t))
            .cloned()
            .collect()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records().len()
    }

    /// Whether the ledger is empty
    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }

    /// Drop every record and delete the file
    pub fn clear(&self) -> Result<(), ResumeError> {
        let mut records = self.records();
        records.clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ResumeError::IoError(e.to_string())),
        }
        info!(path = %self.path.display(), "Failure ledger cleared");
        Ok(())
    }
}

impl FailureSink for FailureLedger {
    fn log_failure(
        &self,
        task: TaskType,
        id: ItemId,
        reason: &str,
        context: Option<Value>,
    ) -> Result<(), ResumeError> {
        let timestamp = chrono::Utc::now().timestamp();
        let mut records = self.records();

        match records
            .iter_mut()
            .find(|r| r.task_type == task && r.id == id)
        {
            Some(existing) => {
                existing.reason = reason.to_string();
                existing.timestamp = timestamp;
                if let Some(context) = context {
                    existing.context = context;
                }
            }
            None => records.push(FailureRecord {
                task_type: task,
                id,
                reason: reason.to_string(),
                timestamp,
                context: context.unwrap_or_else(|| Value::Object(Default::default())),
            }),
        }

        self.persist(&records)
    }

    fn remove_failure(&self, task: TaskType, id: ItemId) -> Result<(), ResumeError> {
        self.remove_failures(task, &[id])
    }

    fn remove_failures(&self, task: TaskType, ids: &[ItemId]) -> Result<(), ResumeError> {
        let mut records = self.records();
        let before = records.len();
        records.retain(|r| !(r.task_type == task && ids.contains(&r.id)));
        if records.len() == before {
            return Ok(());
        }
        debug!(task = %task, removed = before - records.len(), "Purged failure records");
        self.persist(&records)
    }
}

fn load_records(path: &Path) -> Result<Vec<FailureRecord>, ResumeError> {
    let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
    if metadata.len() > MAX_LEDGER_FILE_SIZE {
        return Err(ResumeError::StateTooLarge {
            size: metadata.len(),
            max: MAX_LEDGER_FILE_SIZE,
        });
    }
    let contents = std::fs::read(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
    serde_json::from_slice(&contents).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Failed to deserialize failure ledger");
        ResumeError::DeserializationError(e.to_string())
    })
}
