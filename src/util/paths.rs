use std::fs;
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BackupError, Result};

pub fn is_safe_name(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

pub fn path_has_parent_dir(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

pub fn job_lock_path(lock_dir: &Path, label: &str) -> Result<PathBuf> {
    if !is_safe_name(label) {
        return Err(BackupError::invalid(format!(
            "job {} label must use only letters, digits, '.', '-', '_'",
            label
        )));
    }
    Ok(lock_dir.join(format!("snapvault.{}.pid", label)))
}

/// Appends an absolute path to a base directory textually, so `/var` under
/// `/tmp/job` becomes `/tmp/job/var` (and `/` becomes `/tmp/job/`).
pub fn prefix_path(base: &Path, path: &str) -> String {
    format!("{}{}", base.display(), path)
}

/// Removes empty directories below and including `base`, deepest first,
/// without crossing into other file systems. Non-empty directories stay.
pub fn prune_empty_dirs(base: &Path) {
    if !base.is_dir() {
        return;
    }
    for entry in WalkDir::new(base)
        .same_file_system(true)
        .follow_links(false)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_dir() && fs::remove_dir(entry.path()).is_ok() {
            debug!("removed empty directory {}", entry.path().display());
        }
    }
}
