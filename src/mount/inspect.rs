use std::fs;
use std::path::{Path, PathBuf};

use crate::command::{argv, Executor};
use crate::error::{BackupError, Result};
use crate::types::is_local;

const MOUNTS_FILE: &str = "/proc/self/mounts";
const MOUNTPOINT_NOT_MOUNTED: i32 = 32;

/// Answers whether a path on a host already has a file system mounted on it.
pub trait MountProbe {
    fn is_mount_point(&self, executor: &Executor, host: &str, path: &Path) -> Result<bool>;
}

/// Reads the local mount table, or asks `mountpoint -q` on remote hosts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMountProbe;

impl MountProbe for SystemMountProbe {
    fn is_mount_point(&self, executor: &Executor, host: &str, path: &Path) -> Result<bool> {
        if is_local(host) {
            return mountpoint_is_mounted(path);
        }
        if executor.run_mode().dry_run {
            return Ok(false);
        }
        let mut cmd = argv(&["mountpoint", "-q"]);
        cmd.push(path.to_string_lossy().to_string());
        let output = executor.execute(&cmd, host)?;
        match output.status {
            0 => Ok(true),
            MOUNTPOINT_NOT_MOUNTED => Ok(false),
            status => Err(BackupError::message(format!(
                "[{}] mountpoint {} exited with status {}",
                host,
                path.display(),
                status
            ))),
        }
    }
}

fn read_mounts() -> Result<String> {
    fs::read_to_string(MOUNTS_FILE)
        .map_err(|e| BackupError::message(format!("read {}: {}", MOUNTS_FILE, e)))
}

pub fn mountpoint_is_mounted(mountpoint: &Path) -> Result<bool> {
    let contents = read_mounts()?;
    Ok(is_listed(&contents, mountpoint))
}

/// The kernel lists resolved paths, so symlinks in `mountpoint` are resolved
/// before comparing. A path that does not exist is compared as given.
pub fn is_listed(contents: &str, mountpoint: &Path) -> bool {
    let real = mountpoint
        .canonicalize()
        .unwrap_or_else(|_| mountpoint.to_path_buf());
    mount_points(contents).iter().any(|m| *m == real)
}

/// Mount points listed in a mounts table, with octal escapes decoded.
pub fn mount_points(contents: &str) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            continue;
        }
        out.push(PathBuf::from(unescape(fields[1])));
    }
    out
}

fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).unwrap_or("");
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
