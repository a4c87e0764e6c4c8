//! Atomic file replacement
//!
//! Content is written to a temporary file in the target's directory, flushed and
//! synced, then renamed over the target. Readers see either the old file or the
//! new one, never a partial write.

use super::ResumeError;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Write `contents` to a synced temporary file next to `path`
///
/// Nothing at `path` is touched until [`commit_staged`] renames the file into
/// place. Dropping the returned handle removes the temporary file.
pub fn stage(path: &Path, contents: &[u8]) -> Result<NamedTempFile, ResumeError> {
    let parent_dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent_dir).map_err(|e| ResumeError::IoError(e.to_string()))?;

    let mut temp_file = NamedTempFile::new_in(parent_dir)
        .map_err(|e| ResumeError::IoError(format!("Failed to create temp file: {e}")))?;

    temp_file
        .write_all(contents)
        .map_err(|e| ResumeError::IoError(format!("Failed to write to temp file: {e}")))?;
    temp_file
        .flush()
        .map_err(|e| ResumeError::IoError(format!("Failed to flush temp file: {e}")))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| ResumeError::IoError(format!("Failed to sync temp file: {e}")))?;

    Ok(temp_file)
}

/// Rename a staged file over `path` and sync the directory entry
pub fn commit_staged(temp_file: NamedTempFile, path: &Path) -> Result<(), ResumeError> {
    temp_file
        .persist(path)
        .map_err(|e| ResumeError::IoError(format!("Failed to persist temp file: {e}")))?;

    // Fsync parent directory so the rename itself is durable
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}

/// Atomically replace `path` with `contents`
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), ResumeError> {
    let staged = stage(path, contents)?;
    commit_staged(staged, path)
}
