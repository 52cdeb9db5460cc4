use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::command::{RemoteLogin, RetryPolicy};
use crate::snapshot::{LvmSettings, RetentionSettings};
use crate::types::{JobKind, LOCALHOST};

pub const DEFAULT_REMOTE_USER: &str = "root";
pub const DEFAULT_SSH_PATH: &str = "/usr/bin/ssh";
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_SNAPSHOT_SUFFIX: &str = "-snapvault";
pub const DEFAULT_SNAPSHOT_MOUNT_ROOT: &str = "/tmp";
pub const DEFAULT_RSYNC_PATH: &str = "/usr/bin/rsync";
pub const DEFAULT_RSYNC_OPTIONS: &str = "--archive --acls --numeric-ids --delete --inplace";
pub const DEFAULT_ZFS_SNAPSHOT_PREFIX: &str = "snapvault-";
pub const DEFAULT_ZFS_SNAPSHOT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d--%H%M";
pub const DEFAULT_RDIFF_BACKUP_PATH: &str = "/usr/bin/rdiff-backup";
pub const DEFAULT_RDIFF_BACKUP_OPTIONS: &str =
    "--exclude-device-files --exclude-fifos --exclude-sockets --terminal-verbosity 1";
pub const DEFAULT_LOCK_DIR: &str = "/var/run";

/// Settings as written in a settings file or a job's `settings` block.
/// Every key is optional; missing keys keep the value underneath.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SettingsOverrides {
    pub remote_user: Option<String>,
    pub ssh_path: Option<String>,
    pub ssh_port: Option<u16>,
    pub max_retries: Option<u32>,
    pub retry_interval: Option<u64>,
    pub snapshot_suffix: Option<String>,
    pub snapshot_mount_root: Option<PathBuf>,
    pub rsync_path: Option<String>,
    pub rsync_options: Option<String>,
    pub zfs_snapshot_prefix: Option<String>,
    pub zfs_snapshot_timestamp_format: Option<String>,
    pub rdiff_backup_path: Option<String>,
    pub rdiff_backup_options: Option<String>,
    pub backup_store_path: Option<String>,
    pub ssh_compression: Option<bool>,
    pub remove_older_than_timespec: Option<String>,
    pub lock_dir: Option<PathBuf>,
    pub debug_logging: Option<bool>,
    pub dry_run: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub remote_user: String,
    pub ssh_path: String,
    pub ssh_port: u16,
    pub max_retries: u32,
    pub retry_interval: Duration,
    pub snapshot_suffix: String,
    pub snapshot_mount_root: PathBuf,
    pub rsync_path: String,
    pub rsync_options: String,
    pub zfs_snapshot_prefix: String,
    pub zfs_snapshot_timestamp_format: String,
    pub rdiff_backup_path: String,
    pub rdiff_backup_options: String,
    pub backup_store_path: Option<String>,
    pub ssh_compression: bool,
    pub remove_older_than_timespec: Option<String>,
    pub lock_dir: PathBuf,
    pub debug_logging: bool,
    pub dry_run: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            remote_user: DEFAULT_REMOTE_USER.to_string(),
            ssh_path: DEFAULT_SSH_PATH.to_string(),
            ssh_port: DEFAULT_SSH_PORT,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_interval: Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
            snapshot_suffix: DEFAULT_SNAPSHOT_SUFFIX.to_string(),
            snapshot_mount_root: PathBuf::from(DEFAULT_SNAPSHOT_MOUNT_ROOT),
            rsync_path: DEFAULT_RSYNC_PATH.to_string(),
            rsync_options: DEFAULT_RSYNC_OPTIONS.to_string(),
            zfs_snapshot_prefix: DEFAULT_ZFS_SNAPSHOT_PREFIX.to_string(),
            zfs_snapshot_timestamp_format: DEFAULT_ZFS_SNAPSHOT_TIMESTAMP_FORMAT.to_string(),
            rdiff_backup_path: DEFAULT_RDIFF_BACKUP_PATH.to_string(),
            rdiff_backup_options: DEFAULT_RDIFF_BACKUP_OPTIONS.to_string(),
            backup_store_path: None,
            ssh_compression: false,
            remove_older_than_timespec: None,
            lock_dir: PathBuf::from(DEFAULT_LOCK_DIR),
            debug_logging: false,
            dry_run: false,
        }
    }
}

impl Settings {
    pub fn apply(&mut self, o: &SettingsOverrides) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *slot = v.clone();
            }
        }
        set(&mut self.remote_user, &o.remote_user);
        set(&mut self.ssh_path, &o.ssh_path);
        set(&mut self.ssh_port, &o.ssh_port);
        set(&mut self.max_retries, &o.max_retries);
        if let Some(secs) = o.retry_interval {
            self.retry_interval = Duration::from_secs(secs);
        }
        set(&mut self.snapshot_suffix, &o.snapshot_suffix);
        set(&mut self.snapshot_mount_root, &o.snapshot_mount_root);
        set(&mut self.rsync_path, &o.rsync_path);
        set(&mut self.rsync_options, &o.rsync_options);
        set(&mut self.zfs_snapshot_prefix, &o.zfs_snapshot_prefix);
        set(&mut self.zfs_snapshot_timestamp_format, &o.zfs_snapshot_timestamp_format);
        set(&mut self.rdiff_backup_path, &o.rdiff_backup_path);
        set(&mut self.rdiff_backup_options, &o.rdiff_backup_options);
        if o.backup_store_path.is_some() {
            self.backup_store_path = o.backup_store_path.clone();
        }
        set(&mut self.ssh_compression, &o.ssh_compression);
        if o.remove_older_than_timespec.is_some() {
            self.remove_older_than_timespec = o.remove_older_than_timespec.clone();
        }
        set(&mut self.lock_dir, &o.lock_dir);
        set(&mut self.debug_logging, &o.debug_logging);
        set(&mut self.dry_run, &o.dry_run);
    }

    pub fn remote_login(&self) -> RemoteLogin {
        RemoteLogin {
            ssh_path: self.ssh_path.clone(),
            port: self.ssh_port,
            user: self.remote_user.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            interval: self.retry_interval,
        }
    }

    pub fn lvm(&self) -> LvmSettings {
        LvmSettings {
            snapshot_suffix: self.snapshot_suffix.clone(),
            snapshot_mount_root: self.snapshot_mount_root.clone(),
        }
    }

    pub fn retention(&self) -> RetentionSettings {
        RetentionSettings {
            prefix: self.zfs_snapshot_prefix.clone(),
            timestamp_format: self.zfs_snapshot_timestamp_format.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct VolumeConfig {
    pub name: String,
    pub mount_point: String,
    #[serde(default)]
    pub mount_options: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommandHookConfig {
    pub command: Vec<String>,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub retries: bool,
    #[serde(default)]
    pub skip_on_error: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct JobConfig {
    pub label: String,
    pub kind: String,
    #[serde(default = "default_host")]
    pub source_host: String,
    #[serde(default)]
    pub volumes: Vec<VolumeConfig>,
    #[serde(default)]
    pub rsync_dst: Option<String>,
    #[serde(default)]
    pub zfs_host: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub snapshot_expiration_days: Option<u32>,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub remove_older_than: Option<String>,
    #[serde(default)]
    pub top_level_src_dir: Option<String>,
    #[serde(default)]
    pub settings: SettingsOverrides,
    #[serde(default)]
    pub pre_commands: Vec<CommandHookConfig>,
    #[serde(default)]
    pub post_commands: Vec<CommandHookConfig>,
}

/// Kind-specific destination of a job after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Zfs {
        rsync_dst: String,
        zfs_host: String,
        dataset: String,
        snapshot_expiration_days: u32,
    },
    Rdiff {
        backup_store_path: String,
        includes: Vec<String>,
        excludes: Vec<String>,
        top_level_src_dir: String,
        remove_older_than: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct RuntimeJob {
    pub label: String,
    pub kind: JobKind,
    pub source_host: String,
    pub volumes: Vec<VolumeConfig>,
    pub target: Target,
    pub pre_commands: Vec<CommandHookConfig>,
    pub post_commands: Vec<CommandHookConfig>,
    pub settings: Settings,
}

fn default_host() -> String {
    LOCALHOST.to_string()
}
