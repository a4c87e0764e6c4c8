//! Resumable execution state
//!
//! [`CheckpointStore`] tracks completed pages plus completed and failed ids for
//! each [`TaskType`]. Within a namespace an id is never both completed and
//! failed: completing evicts from the failed set, and failing an already
//! completed id is ignored.

use super::atomic::write_atomic;
use super::lock::ResumeLock;
use super::ResumeError;
use crate::{ItemId, TaskType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Maximum allowed checkpoint file size (64 MB)
pub const MAX_CHECKPOINT_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Persisted checkpoint document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Catalog pages whose ids have all been resolved
    #[serde(default)]
    pub completed_pages: BTreeSet<u32>,
    /// Catalog ids committed to storage
    #[serde(default)]
    pub completed_ids: BTreeSet<ItemId>,
    /// Catalog ids whose last fetch failed
    #[serde(default)]
    pub failed_ids: BTreeSet<ItemId>,
    /// Time-series ids committed to storage
    #[serde(default)]
    pub completed_ts_ids: BTreeSet<ItemId>,
    /// Time-series ids whose last fetch failed
    #[serde(default)]
    pub failed_ts_ids: BTreeSet<ItemId>,
}

impl CheckpointState {
    fn completed(&self, task: TaskType) -> &BTreeSet<ItemId> {
        match task {
            TaskType::Catalog => &self.completed_ids,
            TaskType::TimeSeries => &self.completed_ts_ids,
        }
    }

    fn failed(&self, task: TaskType) -> &BTreeSet<ItemId> {
        match task {
            TaskType::Catalog => &self.failed_ids,
            TaskType::TimeSeries => &self.failed_ts_ids,
        }
    }

    fn sets_mut(&mut self, task: TaskType) -> (&mut BTreeSet<ItemId>, &mut BTreeSet<ItemId>) {
        match task {
            TaskType::Catalog => (&mut self.completed_ids, &mut self.failed_ids),
            TaskType::TimeSeries => (&mut self.completed_ts_ids, &mut self.failed_ts_ids),
        }
    }

    /// Record `id` as completed, evicting it from the failed set
    ///
    /// Returns true if the state changed.
    fn complete(&mut self, task: TaskType, id: ItemId) -> bool {
        let (completed, failed) = self.sets_mut(task);
        let evicted = failed.remove(&id);
        completed.insert(id) || evicted
    }

    /// Record `id` as failed unless it is already completed
    ///
    /// Returns true if the state changed.
    fn fail(&mut self, task: TaskType, id: ItemId) -> bool {
        let (completed, failed) = self.sets_mut(task);
        if completed.contains(&id) {
            return false;
        }
        failed.insert(id)
    }

    /// Drop failed entries that are also completed; returns how many were dropped
    fn normalize(&mut self) -> usize {
        let mut dropped = 0;
        for task in [TaskType::Catalog, TaskType::TimeSeries] {
            let (completed, failed) = self.sets_mut(task);
            let before = failed.len();
            failed.retain(|id| !completed.contains(id));
            dropped += before - failed.len();
        }
        dropped
    }
}

/// Completed/failed counts for one namespace
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Completed pages (catalog only)
    pub completed_pages: usize,
    /// Completed ids
    pub completed: usize,
    /// Failed ids
    pub failed: usize,
}

#[derive(Debug)]
struct Inner {
    state: CheckpointState,
    last_saved: Instant,
    dirty: bool,
}

/// Mutex-guarded, file-backed checkpoint
///
/// Single-id mutations persist only once `save_interval` has elapsed since the
/// last write; batch mutations and clears persist immediately. Call
/// [`CheckpointStore::flush`] before exit to write anything still deferred.
#[derive(Debug)]
pub struct CheckpointStore {
    path: PathBuf,
    save_interval: Duration,
    inner: Mutex<Inner>,
    _lock: ResumeLock,
}

impl CheckpointStore {
    /// Open (or create) the checkpoint at `path`
    ///
    /// Takes an exclusive lock on `<path>.lock` for the lifetime of the store. An
    /// unreadable or corrupt file is an error rather than a silent reset.
    pub fn open(path: impl AsRef<Path>, save_interval: Duration) -> Result<Self, ResumeError> {
        let path = path.as_ref().to_path_buf();
        let lock = ResumeLock::try_acquire(&path)?;

        let mut state = if path.exists() {
            load_state(&path)?
        } else {
            debug!(path = %path.display(), "No checkpoint found, starting empty");
            CheckpointState::default()
        };

        let dropped = state.normalize();
        if dropped > 0 {
            warn!(
                dropped,
                "Checkpoint listed ids as both completed and failed; kept them completed"
            );
        }

        info!(
            path = %path.display(),
            completed = state.completed_ids.len(),
            failed = state.failed_ids.len(),
            completed_ts = state.completed_ts_ids.len(),
            failed_ts = state.failed_ts_ids.len(),
            pages = state.completed_pages.len(),
            "Checkpoint loaded"
        );

        Ok(Self {
            path,
            save_interval,
            inner: Mutex::new(Inner {
                state,
                last_saved: Instant::now(),
                dirty: dropped > 0,
            }),
            _lock: lock,
        })
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, inner: &mut Inner) -> Result<(), ResumeError> {
        let json = serde_json::to_vec(&inner.state)
            .map_err(|e| ResumeError::SerializationError(e.to_string()))?;
        write_atomic(&self.path, &json)?;
        inner.last_saved = Instant::now();
        inner.dirty = false;
        crate::metrics::record_checkpoint_save();
        debug!(path = %self.path.display(), bytes = json.len(), "Checkpoint saved");
        Ok(())
    }

    fn persist_if_due(&self, inner: &mut Inner) -> Result<(), ResumeError> {
        inner.dirty = true;
        if inner.last_saved.elapsed() >= self.save_interval {
            self.persist(inner)?;
        }
        Ok(())
    }

    /// Whether catalog page `page` has been fully resolved
    pub fn is_page_completed(&self, page: u32) -> bool {
        self.inner().state.completed_pages.contains(&page)
    }

    /// Mark catalog page `page` complete
    pub fn mark_page_completed(&self, page: u32) -> Result<(), ResumeError> {
        let mut inner = self.inner();
        if inner.state.completed_pages.insert(page) {
            self.persist_if_due(&mut inner)?;
        }
        Ok(())
    }

    /// Whether `id` is completed in `task`'s namespace
    pub fn is_completed(&self, task: TaskType, id: ItemId) -> bool {
        self.inner().state.completed(task).contains(&id)
    }

    /// Mark `id` completed, evicting it from the failed set
    pub fn mark_completed(&self, task: TaskType, id: ItemId) -> Result<(), ResumeError> {
        let mut inner = self.inner();
        if inner.state.complete(task, id) {
            self.persist_if_due(&mut inner)?;
        }
        Ok(())
    }

    /// Mark every id completed with exactly one write
    pub fn mark_completed_batch(&self, task: TaskType, ids: &[ItemId]) -> Result<(), ResumeError> {
        let mut inner = self.inner();
        for &id in ids {
            inner.state.complete(task, id);
        }
        self.persist(&mut inner)
    }

    /// Whether `id` is failed in `task`'s namespace
    pub fn is_failed(&self, task: TaskType, id: ItemId) -> bool {
        self.inner().state.failed(task).contains(&id)
    }

    /// Mark `id` failed; ignored if it is already completed
    pub fn mark_failed(&self, task: TaskType, id: ItemId) -> Result<(), ResumeError> {
        let mut inner = self.inner();
        if inner.state.fail(task, id) {
            self.persist_if_due(&mut inner)?;
        }
        Ok(())
    }

    /// Snapshot of failed ids
    pub fn get_failed(&self, task: TaskType) -> BTreeSet<ItemId> {
        self.inner().state.failed(task).clone()
    }

    /// Snapshot of completed ids
    pub fn get_completed(&self, task: TaskType) -> BTreeSet<ItemId> {
        self.inner().state.completed(task).clone()
    }

    /// Snapshot of the whole document
    pub fn snapshot(&self) -> CheckpointState {
        self.inner().state.clone()
    }

    /// Counts for one namespace
    pub fn stats(&self, task: TaskType) -> CheckpointStats {
        let inner = self.inner();
        CheckpointStats {
            completed_pages: match task {
                TaskType::Catalog => inner.state.completed_pages.len(),
                TaskType::TimeSeries => 0,
            },
            completed: inner.state.completed(task).len(),
            failed: inner.state.failed(task).len(),
        }
    }

    /// Reset both namespaces and delete the checkpoint file
    pub fn clear_all(&self) -> Result<(), ResumeError> {
        let mut inner = self.inner();
        inner.state = CheckpointState::default();
        inner.dirty = false;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ResumeError::IoError(e.to_string())),
        }
        info!(path = %self.path.display(), "Checkpoint cleared");
        Ok(())
    }

    /// Reset one namespace (catalog also drops completed pages) and persist
    pub fn clear_namespace(&self, task: TaskType) -> Result<(), ResumeError> {
        let mut inner = self.inner();
        let (completed, failed) = inner.state.sets_mut(task);
        completed.clear();
        failed.clear();
        if task == TaskType::Catalog {
            inner.state.completed_pages.clear();
        }
        info!(task = %task, "Checkpoint namespace cleared");
        self.persist(&mut inner)
    }

    /// Persist any changes deferred by the save interval
    pub fn flush(&self) -> Result<(), ResumeError> {
        let mut inner = self.inner();
        if inner.dirty {
            self.persist(&mut inner)?;
        }
        Ok(())
    }
}

fn load_state(path: &Path) -> Result<CheckpointState, ResumeError> {
    let metadata = std::fs::metadata(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
    if metadata.len() > MAX_CHECKPOINT_FILE_SIZE {
        return Err(ResumeError::StateTooLarge {
            size: metadata.len(),
            max: MAX_CHECKPOINT_FILE_SIZE,
        });
    }

    let contents = std::fs::read(path).map_err(|e| ResumeError::IoError(e.to_string()))?;
    serde_json::from_slice(&contents).map_err(|e| {
        warn!(path = %path.display(), error = %e, "Failed to deserialize checkpoint");
        ResumeError::DeserializationError(e.to_string())
    })
}
