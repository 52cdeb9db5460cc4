use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{BackupError, Result};
use crate::util::paths::job_lock_path;

/// Removes the pid file when dropped, if it still names this process.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = unlock_file(&self.path) {
            warn!("failed to remove lock {}: {}", self.path.display(), e);
        }
    }
}

fn pid_is_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

/// Creates `path` holding our pid. A lock left behind by a dead process is
/// replaced; a lock held by a live process returns `Ok(false)`.
pub fn lock_file(path: &Path) -> io::Result<bool> {
    for _ in 0..3 {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut f) => {
                writeln!(f, "{}", std::process::id())?;
                return Ok(true);
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let pid = match fs::read_to_string(path) {
                    Ok(text) => text.trim().parse::<u32>().ok(),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(err),
                };
                if let Some(pid) = pid {
                    if pid_is_alive(pid) {
                        return Ok(false);
                    }
                }
                debug!("replacing stale lock {}", path.display());
                match fs::remove_file(path) {
                    Ok(()) => continue,
                    Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                    Err(err) => return Err(err),
                }
            }
            Err(err) => return Err(err),
        }
    }
    Ok(false)
}

pub fn unlock_file(path: &Path) -> io::Result<()> {
    let pid = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err),
    };
    if pid.trim() == std::process::id().to_string() {
        fs::remove_file(path)?;
    }
    Ok(())
}

pub fn acquire_job_lock(lock_dir: &Path, label: &str) -> Result<LockGuard> {
    let path = job_lock_path(lock_dir, label)?;
    match lock_file(&path) {
        Ok(true) => Ok(LockGuard { path }),
        Ok(false) => Err(BackupError::AlreadyRunning(label.to_string())),
        Err(e) => Err(BackupError::message(format!(
            "failed to lock {}: {}",
            path.display(),
            e
        ))),
    }
}
