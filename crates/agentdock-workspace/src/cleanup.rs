//! Best-effort directory cleanup.
//!
//! Cleanup runs after a primary failure has already been decided. Its own
//! failure is logged and handed back to the caller for inspection, but never
//! replaces the primary error.

use std::path::{Path, PathBuf};

/// Remove `path` recursively.
///
/// Returns `None` when the tree is gone (including when it never existed),
/// or the secondary error when removal failed.
pub async fn remove_dir_best_effort(path: &Path) -> Option<std::io::Error> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => None,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            tracing::error!(dir = %path.display(), "Cleanup failed: {e}");
            Some(e)
        }
    }
}

/// Highest ancestor of `target` (inclusive) that does not exist yet.
///
/// Removing this directory after a failed operation undoes every directory
/// the operation created on the way to `target`.
#[must_use]
pub fn first_missing_ancestor(target: &Path) -> Option<PathBuf> {
    target
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .last()
        .map(Path::to_path_buf)
}
