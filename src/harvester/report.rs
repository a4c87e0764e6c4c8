//! Run accounting shared between pipeline roles

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Summary of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestReport {
    /// Catalog pages fetched this run
    pub pages_scanned: u64,
    /// Catalog pages skipped because the checkpoint already had them
    pub pages_skipped: u64,
    /// Ids handed to workers
    pub enqueued: u64,
    /// Ids seen more than once in this run
    pub duplicates: u64,
    /// Ids skipped because the checkpoint already had them completed
    pub already_completed: u64,
    /// Ids skipped because the checkpoint had them failed and the run was not forced
    pub skipped_failed: u64,
    /// Ids fetched and committed
    pub succeeded: u64,
    /// Ids whose fetch failed this run
    pub failed: u64,
    /// Storage flushes performed
    pub flushes: u64,
    /// The run stopped early on a shutdown request
    pub cancelled: bool,
}

impl fmt::Display for HarvestReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} duplicates, {} already completed, {} skipped as failed ({} flushes",
            self.succeeded,
            self.failed,
            self.duplicates,
            self.already_completed,
            self.skipped_failed,
            self.flushes
        )?;
        if self.pages_scanned > 0 || self.pages_skipped > 0 {
            write!(
                f,
                ", {} pages scanned, {} pages skipped",
                self.pages_scanned, self.pages_skipped
            )?;
        }
        if self.cancelled {
            write!(f, ", cancelled")?;
        }
        write!(f, ")")
    }
}

/// Lock-free counters updated concurrently by producer, workers and committer
#[derive(Debug, Default)]
pub(crate) struct RunStats {
    pub pages_scanned: AtomicU64,
    pub pages_skipped: AtomicU64,
    pub enqueued: AtomicU64,
    pub duplicates: AtomicU64,
    pub already_completed: AtomicU64,
    pub skipped_failed: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub flushes: AtomicU64,
}

impl RunStats {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self, cancelled: bool) -> HarvestReport {
        HarvestReport {
            pages_scanned: self.pages_scanned.load(Ordering::Relaxed),
            pages_skipped: self.pages_skipped.load(Ordering::Relaxed),
            enqueued: self.enqueued.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            already_completed: self.already_completed.load(Ordering::Relaxed),
            skipped_failed: self.skipped_failed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            cancelled,
        }
    }
}

#[derive(Debug, Default)]
struct PageProgress {
    outstanding: usize,
    sealed: bool,
}

/// Tracks which catalog pages still have unresolved ids
///
/// A page is complete once the producer has sealed it (every id enqueued) and
/// each of those ids has been committed, marked failed, or skipped. Callers mark
/// the checkpoint when `seal` or `resolve` hands a page back.
#[derive(Debug, Default)]
pub(crate) struct PageTracker {
    pages: Mutex<HashMap<u32, PageProgress>>,
}

impl PageTracker {
    /// Count one more id enqueued for `page`
    pub fn register(&self, page: u32) {
        let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        pages.entry(page).or_default().outstanding += 1;
    }

    /// Producer is done with `page`; returns it if nothing is outstanding
    pub fn seal(&self, page: u32) -> Option<u32> {
        let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        let progress = pages.entry(page).or_default();
        progress.sealed = true;
        if progress.outstanding == 0 {
            pages.remove(&page);
            Some(page)
        } else {
            None
        }
    }

    /// One id of `page` resolved; returns the page once it is complete
    pub fn resolve(&self, page: u32) -> Option<u32> {
        let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
        let progress = pages.get_mut(&page)?;
        progress.outstanding = progress.outstanding.saturating_sub(1);
        if progress.sealed && progress.outstanding == 0 {
            pages.remove(&page);
            Some(page)
        } else {
            None
        }
    }

    /// Pages with unresolved ids
    pub fn pending(&self) -> usize {
        self.pages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
