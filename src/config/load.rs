use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::config::model::{JobConfig, RuntimeJob, Settings, SettingsOverrides, Target};
use crate::error::{BackupError, ConfigError, Result};
use crate::snapshot::zfs::validate_timestamp_format;
use crate::types::{JobKind, LOCALHOST};
use crate::util::paths::is_safe_name;

pub const DEFAULT_SETTINGS_PATH: &str = "/etc/snapvault/settings.yaml";

fn read_to_string(path: &Path) -> Result<String> {
    let mut contents = String::new();
    File::open(path)
        .map_err(BackupError::Io)?
        .read_to_string(&mut contents)
        .map_err(BackupError::Io)?;
    Ok(contents)
}

/// Loads the global settings. A missing file is only acceptable when
/// `required` is false, in which case the built-in defaults are used.
pub fn load_settings(path: &Path, required: bool) -> Result<Settings> {
    let contents = match read_to_string(path) {
        Ok(contents) => contents,
        Err(BackupError::Io(e)) if e.kind() == io::ErrorKind::NotFound && !required => {
            return Ok(Settings::default());
        }
        Err(e) => return Err(e),
    };
    parse_settings(&contents)
}

pub fn parse_settings(contents: &str) -> Result<Settings> {
    let mut settings = Settings::default();
    if contents.trim().is_empty() {
        return Ok(settings);
    }
    let overrides: SettingsOverrides =
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    settings.apply(&overrides);
    validate_timestamp_format(&settings.zfs_snapshot_timestamp_format)?;
    Ok(settings)
}

pub fn load_job(path: &Path, base: &Settings) -> Result<RuntimeJob> {
    let contents = read_to_string(path)?;
    parse_job(&contents, base)
}

pub fn parse_job(contents: &str, base: &Settings) -> Result<RuntimeJob> {
    let job: JobConfig =
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
    parse_runtime(job, base)
}

fn invalid(label: &str, msg: impl std::fmt::Display) -> BackupError {
    ConfigError::Invalid(format!("job {}: {}", label, msg)).into()
}

fn required<T>(label: &str, value: Option<T>, key: &str) -> Result<T> {
    value.ok_or_else(|| invalid(label, format!("{} is required", key)))
}

fn parse_runtime(job: JobConfig, base: &Settings) -> Result<RuntimeJob> {
    if job.label.trim().is_empty() {
        return Err(ConfigError::Invalid("job label is required".to_string()).into());
    }
    if !is_safe_name(&job.label) {
        return Err(invalid(
            &job.label,
            "label must use only letters, digits, '.', '-', '_'",
        ));
    }
    let label = job.label;
    let kind: JobKind = job.kind.parse().map_err(|e: String| invalid(&label, e))?;
    if job.source_host.trim().is_empty() {
        return Err(invalid(&label, "sourceHost is empty"));
    }

    let mut settings = base.clone();
    settings.apply(&job.settings);
    validate_timestamp_format(&settings.zfs_snapshot_timestamp_format)
        .map_err(|e| invalid(&label, e))?;

    if kind.uses_lvm() && job.volumes.is_empty() {
        return Err(invalid(&label, format!("{} jobs need at least one volume", kind)));
    }
    if !kind.uses_lvm() && !job.volumes.is_empty() {
        return Err(invalid(&label, format!("{} jobs do not take volumes", kind)));
    }
    for hook in job.pre_commands.iter().chain(job.post_commands.iter()) {
        if hook.command.is_empty() {
            return Err(invalid(&label, "command hook has an empty command"));
        }
    }

    let target = match kind {
        JobKind::ZfsLvm => {
            if !job.includes.is_empty() || !job.excludes.is_empty() {
                return Err(invalid(&label, "zfs-lvm jobs do not take includes or excludes"));
            }
            Target::Zfs {
                rsync_dst: required(&label, job.rsync_dst, "rsyncDst")?,
                zfs_host: job.zfs_host.unwrap_or_else(|| LOCALHOST.to_string()),
                dataset: required(&label, job.dataset, "dataset")?,
                snapshot_expiration_days: required(
                    &label,
                    job.snapshot_expiration_days,
                    "snapshotExpirationDays",
                )?,
            }
        }
        JobKind::Rdiff | JobKind::RdiffLvm => {
            let backup_store_path = required(
                &label,
                settings.backup_store_path.clone(),
                "backupStorePath setting",
            )?;
            if kind == JobKind::RdiffLvm && job.top_level_src_dir.is_some() {
                return Err(invalid(
                    &label,
                    "rdiff-lvm jobs always use the snapshot mount base as topLevelSrcDir",
                ));
            }
            Target::Rdiff {
                backup_store_path,
                includes: job.includes,
                excludes: job.excludes,
                top_level_src_dir: job.top_level_src_dir.unwrap_or_else(|| "/".to_string()),
                remove_older_than: job
                    .remove_older_than
                    .or_else(|| settings.remove_older_than_timespec.clone()),
            }
        }
    };

    Ok(RuntimeJob {
        label,
        kind,
        source_host: job.source_host,
        volumes: job.volumes,
        target,
        pre_commands: job.pre_commands,
        post_commands: job.post_commands,
        settings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    const ZFS_JOB: &str = r#"
label: "db1"
kind: "zfs-lvm"
sourceHost: "db1.example.com"
volumes:
  - name: "vg0/root"
    mountPoint: "/"
  - name: "vg0/var"
    mountPoint: "/var"
    mountOptions: "ro,noatime"
rsyncDst: "/srv/backup/db1"
dataset: "tank/backup/db1"
snapshotExpirationDays: 30
settings:
  snapshotSuffix: "-nightly"
postCommands:
  - command: ["/usr/local/bin/notify", "done"]
    skipOnError: true
"#;

    #[test]
    fn load_job_with_settings_overrides() {
        let mut file = NamedTempFile::new().expect("tempfile");
        file.write_all(ZFS_JOB.as_bytes()).expect("write");
        let job = load_job(file.path(), &Settings::default()).expect("load");
        assert_eq!(job.label, "db1");
        assert_eq!(job.kind, JobKind::ZfsLvm);
        assert_eq!(job.volumes.len(), 2);
        assert_eq!(job.volumes[1].mount_options.as_deref(), Some("ro,noatime"));
        assert_eq!(job.settings.snapshot_suffix, "-nightly");
        assert_eq!(job.settings.remote_user, "root");
        assert_eq!(job.post_commands[0].host, LOCALHOST);
        assert!(job.post_commands[0].skip_on_error);
        assert_eq!(
            job.target,
            Target::Zfs {
                rsync_dst: "/srv/backup/db1".to_string(),
                zfs_host: LOCALHOST.to_string(),
                dataset: "tank/backup/db1".to_string(),
                snapshot_expiration_days: 30,
            }
        );
    }

    #[test]
    fn missing_optional_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.yaml");
        assert_eq!(load_settings(&path, false).unwrap(), Settings::default());
        assert!(load_settings(&path, true).is_err());
    }

    #[test]
    fn settings_file_rejects_unknown_keys() {
        let err = parse_settings("sshPort: 2222\nbogusKey: 1\n").unwrap_err();
        assert!(matches!(err, BackupError::Config(ConfigError::Parse(_))));
        let settings = parse_settings("sshPort: 2222\nlockDir: /run\n").unwrap();
        assert_eq!(settings.ssh_port, 2222);
        assert_eq!(settings.lock_dir, PathBuf::from("/run"));
    }

    #[test]
    fn zfs_job_requires_destination_fields() {
        let yaml = "label: db1\nkind: zfs-lvm\nvolumes: [{name: vg0/root, mountPoint: /}]\n";
        let err = parse_job(yaml, &Settings::default()).unwrap_err();
        assert!(err.to_string().contains("rsyncDst is required"));
    }

    #[test]
    fn rdiff_job_takes_store_path_and_timespec_from_settings() {
        let mut base = Settings::default();
        base.backup_store_path = Some("/srv/rdiff".to_string());
        base.remove_older_than_timespec = Some("30D".to_string());
        let yaml = "label: web\nkind: rdiff\nincludes: [/etc]\n";
        let job = parse_job(yaml, &base).unwrap();
        match job.target {
            Target::Rdiff {
                backup_store_path,
                top_level_src_dir,
                remove_older_than,
                ..
            } => {
                assert_eq!(backup_store_path, "/srv/rdiff");
                assert_eq!(top_level_src_dir, "/");
                assert_eq!(remove_older_than.as_deref(), Some("30D"));
            }
            other => panic!("unexpected target {:?}", other),
        }

        let err = parse_job(yaml, &Settings::default()).unwrap_err();
        assert!(err.to_string().contains("backupStorePath"));
    }

    #[test]
    fn rejects_unsafe_label_and_bad_kind() {
        assert!(parse_job("label: ../x\nkind: rdiff\n", &Settings::default()).is_err());
        let err = parse_job("label: x\nkind: tape\n", &Settings::default()).unwrap_err();
        assert!(err.to_string().contains("invalid job kind"));
    }

    #[test]
    fn rejects_invalid_timestamp_format_override() {
        let yaml = format!("{}\n", ZFS_JOB.replace(
            "snapshotSuffix: \"-nightly\"",
            "zfsSnapshotTimestampFormat: \"%Q\"",
        ));
        assert!(parse_job(&yaml, &Settings::default()).is_err());
    }
}
