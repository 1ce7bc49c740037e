//! Preflight checks before admitting heavy work
//!
//! All failures here are immediate and never retried: an unwritable
//! directory or a full disk will not fix itself between attempts.

use std::path::{Path, PathBuf};
use sysinfo::Disks;
use thiserror::Error;
use tracing::warn;

use crate::humanize::ByteSize;

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("destination '{path}' is not writable: {reason}")]
    DirectoryNotWritable { path: PathBuf, reason: String },

    #[error("insufficient disk space in '{path}': {free} free, {required} required")]
    InsufficientSpace {
        path: PathBuf,
        free: ByteSize,
        required: ByteSize,
    },

    #[error("path '{path}' resolves outside the storage root")]
    PathEscapesRoot { path: PathBuf },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Create the directory if absent and prove it is writable by writing and
/// removing a marker file.
pub fn ensure_dir_writable(dir: &Path) -> Result<(), PreflightError> {
    std::fs::create_dir_all(dir).map_err(|e| PreflightError::DirectoryNotWritable {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let marker = dir.join(".write_test");
    std::fs::write(&marker, b"test").map_err(|e| PreflightError::DirectoryNotWritable {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })?;
    if let Err(e) = std::fs::remove_file(&marker) {
        warn!(path = %marker.display(), error = %e, "Could not remove write-test marker");
    }
    Ok(())
}

/// Verify free space on the filesystem holding `path`.
///
/// Returns the free byte count when it can be determined. When the mount
/// cannot be resolved the check is skipped with a warning rather than
/// blocking downloads on a metrics failure.
pub fn check_free_space(path: &Path, min: ByteSize) -> Result<Option<u64>, PreflightError> {
    let resolved = path.canonicalize().map_err(|source| PreflightError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| resolved.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len());

    let Some(disk) = disk else {
        warn!(path = %resolved.display(), "Cannot determine free space, skipping check");
        return Ok(None);
    };

    let free = disk.available_space();
    if free < min.as_u64() {
        return Err(PreflightError::InsufficientSpace {
            path: resolved,
            free: ByteSize(free),
            required: min,
        });
    }
    Ok(Some(free))
}

/// Canonicalize `candidate` and require it to live inside `root`.
///
/// Every path later exposed for reading goes through this; a mismatch is a
/// security rejection, logged and never silently allowed.
pub fn resolve_inside_root(root: &Path, candidate: &Path) -> Result<PathBuf, PreflightError> {
    let real_root = root.canonicalize().map_err(|source| PreflightError::Io {
        path: root.to_path_buf(),
        source,
    })?;
    let real_path = candidate.canonicalize().map_err(|source| PreflightError::Io {
        path: candidate.to_path_buf(),
        source,
    })?;

    if real_path == real_root || real_path.starts_with(&real_root) {
        Ok(real_path)
    } else {
        warn!(
            path = %real_path.display(),
            root = %real_root.display(),
            "Path traversal attempt rejected"
        );
        Err(PreflightError::PathEscapesRoot { path: real_path })
    }
}
