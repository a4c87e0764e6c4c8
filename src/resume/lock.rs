//! Advisory file locking for store files
//!
//! A [`ResumeLock`] holds an exclusive fd-lock on `<path>.lock` for as long as it
//! lives, so two processes never drive the same checkpoint at once.

use super::ResumeError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock on a store file, released on drop
#[derive(Debug)]
pub struct ResumeLock {
    lock_path: PathBuf,
    _lock: RwLock<File>,
}

impl ResumeLock {
    /// Path of the lock file guarding `path`
    pub fn lock_path_for(path: &Path) -> PathBuf {
        let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".lock");
        path.with_file_name(name)
    }

    /// Try to acquire an exclusive lock without blocking
    ///
    /// Returns [`ResumeError::LockError`] immediately if another process holds it.
    pub fn try_acquire(path: &Path) -> Result<Self, ResumeError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let lock_path = Self::lock_path_for(path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        {
            let guard = lock.try_write().map_err(|e| {
                ResumeError::LockError(format!(
                    "{} is locked by another process: {e}",
                    path.display()
                ))
            })?;
            // The OS lock lives as long as the file descriptor; skip the guard's unlock.
            std::mem::forget(guard);
        }

        debug!(lock = %lock_path.display(), "Acquired store lock");
        Ok(Self {
            lock_path,
            _lock: lock,
        })
    }

    /// Lock file path
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}
