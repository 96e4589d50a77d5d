//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! reduce duplicated `create_dir_all` / parent-directory checks.

use std::path::Path;

use tracing::{debug, warn};

use crate::{Error, Result};

/// Convert an IO error into an application error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| io_error(op, path, e))
}

/// Ensure the parent directory of a file path exists with a custom operation label.
pub async fn ensure_parent_dir_with_op(op: &'static str, path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    ensure_dir_all_with_op(op, parent).await
}

/// Ensure a directory exists (synchronous variant) with a custom operation label.
pub fn ensure_dir_all_sync_with_op(op: &'static str, path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| io_error(op, path, e))
}

/// Move a file, falling back to copy + remove when a rename crosses devices.
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    ensure_parent_dir_with_op("creating destination directory", to).await?;

    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!(error = %e, from = %from.display(), "rename failed, copying instead");
            tokio::fs::copy(from, to)
                .await
                .map_err(|e| io_error("copying file", to, e))?;
            tokio::fs::remove_file(from)
                .await
                .map_err(|e| io_error("removing moved file", from, e))
        }
    }
}

/// Remove a file, logging (never returning) failures. Missing files are fine.
pub async fn remove_file_best_effort(path: &Path, what: &'static str) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed {}", what),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove {}", what),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_move_file_creates_destination_dir() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("a.mp4");
        tokio::fs::write(&src, b"data").await.unwrap();
        let dst = tmp.path().join("nested/dir/a.mp4");

        move_file(&src, &dst).await.unwrap();

        assert!(!src.exists());
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_silent() {
        let tmp = TempDir::new().unwrap();
        remove_file_best_effort(&tmp.path().join("nope.txt"), "cookie file").await;
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_for_bare_filename() {
        ensure_parent_dir_with_op("noop", Path::new("file.txt"))
            .await
            .unwrap();
    }
}
