//! LVM snapshot lifecycle for a backup source.
//!
//! Every registered volume gets a copy-on-write snapshot that is mounted
//! below `<snapshot_mount_root>/<label>` before the backup and unmounted and
//! removed afterwards. Each [`SnapshotRecord`] flag is raised only after the
//! matching command succeeded, and teardown consults exactly that flag, so
//! cleanup does as much work as setup actually did no matter where setup
//! stopped.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{info, warn};

use crate::command::{argv, Executor};
use crate::error::{BackupError, Result};
use crate::hooks::{Hook, HookContext, HookPipeline};
use crate::mount::{MountProbe, SystemMountProbe};
use crate::types::is_local;
use crate::util::paths::{path_has_parent_dir, prefix_path, prune_empty_dirs};

/// Size of the copy-on-write exception table given to every snapshot.
pub const SNAPSHOT_SIZE: &str = "1G";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LvmSettings {
    pub snapshot_suffix: String,
    pub snapshot_mount_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    /// `group/volume`
    pub name: String,
    pub mount_point: String,
    pub mount_options: Option<String>,
}

impl Volume {
    fn split(&self) -> (&str, &str) {
        self.name.split_once('/').unwrap_or(("", &self.name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    /// `group/volume<suffix>`
    pub snapshot_path: String,
    pub mount_path: PathBuf,
    pub mount_options: Option<String>,
    pub created: bool,
    pub mount_point_created: bool,
    pub mounted: bool,
}

impl SnapshotRecord {
    pub fn device_path(&self) -> String {
        format!("/dev/{}", self.snapshot_path)
    }

    pub fn is_live(&self) -> bool {
        self.created || self.mount_point_created || self.mounted
    }

    fn mount_arg(&self) -> String {
        self.mount_path.to_string_lossy().to_string()
    }
}

pub struct LvmSnapshots {
    executor: Rc<Executor>,
    host: String,
    settings: LvmSettings,
    mount_base: PathBuf,
    volumes: Vec<Volume>,
    records: Vec<SnapshotRecord>,
    probe: Box<dyn MountProbe>,
}

impl LvmSnapshots {
    pub fn new(label: &str, host: &str, settings: LvmSettings, executor: Rc<Executor>) -> Self {
        let mount_base = settings.snapshot_mount_root.join(label);
        Self {
            executor,
            host: host.to_string(),
            settings,
            mount_base,
            volumes: Vec::new(),
            records: Vec::new(),
            probe: Box::new(SystemMountProbe),
        }
    }

    pub fn with_mount_probe(mut self, probe: impl MountProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Directory under which all snapshots of this job are mounted.
    pub fn mount_base(&self) -> &Path {
        &self.mount_base
    }

    pub fn volumes(&self) -> &[Volume] {
        &self.volumes
    }

    pub fn records(&self) -> &[SnapshotRecord] {
        &self.records
    }

    /// Prefixes a source path with the snapshot mount base.
    pub fn snapshot_path_for(&self, path: &str) -> String {
        prefix_path(&self.mount_base, path)
    }

    pub fn add_volume(&mut self, name: &str, mount_point: &str, mount_options: Option<&str>) -> Result<()> {
        match name.split_once('/') {
            Some((group, volume)) if !group.is_empty() && !volume.is_empty() && !volume.contains('/') => {}
            _ => {
                return Err(BackupError::invalid(format!(
                    "volume {} must be given as group/volume",
                    name
                )))
            }
        }
        let path = Path::new(mount_point);
        if !path.is_absolute() || path_has_parent_dir(path) {
            return Err(BackupError::invalid(format!(
                "volume {}: mount point {} must be absolute without ..",
                name, mount_point
            )));
        }
        self.volumes.push(Volume {
            name: name.to_string(),
            mount_point: mount_point.to_string(),
            mount_options: mount_options.map(str::to_string),
        });
        Ok(())
    }

    /// Snapshots every volume in registration order. A failure stops here;
    /// volumes snapshotted so far stay in the record list for teardown.
    pub fn create_snapshots(&mut self) -> Result<()> {
        info!("creating LVM snapshots...");
        self.records.retain(SnapshotRecord::is_live);
        for volume in &self.volumes {
            let (group, lv) = volume.split();
            let snapshot_name = format!("{}{}", lv, self.settings.snapshot_suffix);
            let cmd = argv(&[
                "lvcreate",
                "-s",
                "-L",
                SNAPSHOT_SIZE,
                &volume.name,
                "-n",
                &snapshot_name,
            ]);
            self.executor.run(&cmd, &self.host)?;
            self.records.push(SnapshotRecord {
                snapshot_path: format!("{}/{}", group, snapshot_name),
                mount_path: PathBuf::from(prefix_path(&self.mount_base, &volume.mount_point)),
                mount_options: volume.mount_options.clone(),
                created: true,
                mount_point_created: false,
                mounted: false,
            });
        }
        Ok(())
    }

    /// Creates mount points and mounts each snapshot. Refuses to mount over
    /// a path that is already a mount point, such as one left behind by a
    /// crashed run.
    pub fn mount_snapshots(&mut self) -> Result<()> {
        info!("mounting LVM snapshots...");
        for record in self.records.iter_mut().filter(|r| r.created && !r.mounted) {
            let mount_arg = record.mount_arg();
            self.executor
                .run(&argv(&["mkdir", "-p", &mount_arg]), &self.host)?;
            record.mount_point_created = true;

            if self
                .probe
                .is_mount_point(&self.executor, &self.host, &record.mount_path)?
            {
                return Err(BackupError::ResourceState(format!(
                    "{} is already a mount point",
                    record.mount_path.display()
                )));
            }

            let device = record.device_path();
            let cmd = match &record.mount_options {
                Some(options) => argv(&["mount", "-o", options, &device, &mount_arg]),
                None => argv(&["mount", &device, &mount_arg]),
            };
            self.executor.run(&cmd, &self.host)?;
            record.mounted = true;
        }
        Ok(())
    }

    /// Unmounts and removes mount points in reverse registration order so
    /// nested mounts go first. Every flagged record is attempted; failures
    /// are reported together.
    pub fn unmount_snapshots(&mut self) -> Result<()> {
        info!("unmounting LVM snapshots...");
        let mut failures = Vec::new();
        for record in self.records.iter_mut().rev() {
            let mount_arg = record.mount_arg();
            if record.mounted {
                match self
                    .executor
                    .run_with_retries(&argv(&["umount", &mount_arg]), &self.host)
                {
                    Ok(_) => record.mounted = false,
                    Err(err) => {
                        warn!("umount {} failed: {}", mount_arg, err);
                        failures.push(err);
                        continue;
                    }
                }
            }
            if record.mount_point_created {
                match self
                    .executor
                    .run_with_retries(&argv(&["rmdir", &mount_arg]), &self.host)
                {
                    Ok(_) => record.mount_point_created = false,
                    Err(err) => {
                        warn!("rmdir {} failed: {}", mount_arg, err);
                        failures.push(err);
                    }
                }
            }
        }
        if failures.is_empty() && is_local(&self.host) && !self.executor.run_mode().dry_run {
            prune_empty_dirs(&self.mount_base);
        }
        BackupError::collect(failures)
    }

    /// Removes every snapshot that was created, in reverse registration
    /// order. Every flagged record is attempted.
    pub fn delete_snapshots(&mut self) -> Result<()> {
        info!("deleting LVM snapshots...");
        let mut failures = Vec::new();
        for record in self.records.iter_mut().rev().filter(|r| r.created) {
            if record.mounted {
                failures.push(BackupError::ResourceState(format!(
                    "snapshot {} is still mounted at {}",
                    record.snapshot_path,
                    record.mount_path.display()
                )));
                continue;
            }
            match self
                .executor
                .run_with_retries(&argv(&["lvremove", "-f", &record.snapshot_path]), &self.host)
            {
                Ok(_) => record.created = false,
                Err(err) => {
                    warn!("lvremove {} failed: {}", record.snapshot_path, err);
                    failures.push(err);
                }
            }
        }
        BackupError::collect(failures)
    }

    /// Registers create/mount as before-hooks and unmount/delete as
    /// after-hooks. The after-hooks run the same way whatever `error_case`.
    pub fn register(manager: &Rc<RefCell<Self>>, pipeline: &mut HookPipeline) {
        let m = Rc::clone(manager);
        pipeline.add_before(Hook::new("create_snapshots", move |_: &HookContext| {
            m.borrow_mut().create_snapshots()
        }));
        let m = Rc::clone(manager);
        pipeline.add_before(Hook::new("mount_snapshots", move |_: &HookContext| {
            m.borrow_mut().mount_snapshots()
        }));
        let m = Rc::clone(manager);
        pipeline.add_after(Hook::new("unmount_snapshots", move |_: &HookContext| {
            m.borrow_mut().unmount_snapshots()
        }));
        let m = Rc::clone(manager);
        pipeline.add_after(Hook::new("delete_snapshots", move |_: &HookContext| {
            m.borrow_mut().delete_snapshots()
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use crate::testing::{executor_with, FakeRunner};

    struct FakeProbe(HashSet<PathBuf>);

    impl MountProbe for FakeProbe {
        fn is_mount_point(&self, _: &Executor, _: &str, path: &Path) -> Result<bool> {
            Ok(self.0.contains(path))
        }
    }

    fn nothing_mounted() -> FakeProbe {
        FakeProbe(HashSet::new())
    }

    fn settings() -> LvmSettings {
        LvmSettings {
            snapshot_suffix: "-test".to_string(),
            snapshot_mount_root: PathBuf::from("/snap-root"),
        }
    }

    fn manager(runner: &FakeRunner, host: &str) -> LvmSnapshots {
        let mut m = LvmSnapshots::new("job", host, settings(), Rc::new(executor_with(runner, 0)))
            .with_mount_probe(nothing_mounted());
        m.add_volume("vg/lv1", "/etc", None).unwrap();
        m.add_volume("vg/lv2", "/var", Some("noatime,ro")).unwrap();
        m
    }

    fn flags(m: &LvmSnapshots) -> Vec<(bool, bool, bool)> {
        m.records()
            .iter()
            .map(|r| (r.created, r.mount_point_created, r.mounted))
            .collect()
    }

    #[test]
    fn create_snapshots_in_registration_order() {
        let runner = FakeRunner::new();
        let mut m = manager(&runner, "localhost");
        m.create_snapshots().unwrap();
        assert_eq!(
            runner.joined_calls(),
            vec![
                "lvcreate -s -L 1G vg/lv1 -n lv1-test",
                "lvcreate -s -L 1G vg/lv2 -n lv2-test",
            ]
        );
        assert_eq!(m.records().len(), 2);
        assert_eq!(flags(&m), vec![(true, false, false), (true, false, false)]);
        assert_eq!(m.records()[1].snapshot_path, "vg/lv2-test");
        assert_eq!(m.records()[1].mount_path, PathBuf::from("/snap-root/job/var"));
    }

    #[test]
    fn failed_create_keeps_only_earlier_records() {
        let runner = FakeRunner::new();
        runner.on("vg/lv2", "", 5);
        let mut m = manager(&runner, "localhost");
        m.add_volume("vg/lv3", "/home", None).unwrap();
        let err = m.create_snapshots().unwrap_err();
        assert!(matches!(err, BackupError::NonZeroExitStatus { status: 5, .. }));
        assert_eq!(flags(&m), vec![(true, false, false)]);
        assert_eq!(runner.calls().len(), 2);
    }

    #[test]
    fn mount_creates_dirs_then_mounts_with_options() {
        let runner = FakeRunner::new();
        let mut m = manager(&runner, "localhost");
        m.create_snapshots().unwrap();
        m.mount_snapshots().unwrap();
        assert_eq!(
            runner.joined_calls()[2..],
            [
                "mkdir -p /snap-root/job/etc",
                "mount /dev/vg/lv1-test /snap-root/job/etc",
                "mkdir -p /snap-root/job/var",
                "mount -o noatime,ro /dev/vg/lv2-test /snap-root/job/var",
            ]
        );
        assert_eq!(flags(&m), vec![(true, true, true), (true, true, true)]);
    }

    #[test]
    fn stale_mount_is_refused_before_mounting() {
        let runner = FakeRunner::new();
        let mut m = manager(&runner, "localhost").with_mount_probe(FakeProbe(HashSet::from([
            PathBuf::from("/snap-root/job/etc"),
        ])));
        m.create_snapshots().unwrap();
        let err = m.mount_snapshots().unwrap_err();
        assert!(matches!(err, BackupError::ResourceState(_)));
        assert!(!runner.joined_calls().iter().any(|c| c.starts_with("mount ")));
        assert_eq!(flags(&m), vec![(true, true, false), (true, false, false)]);
    }

    #[test]
    fn teardown_runs_in_reverse_and_is_idempotent() {
        let runner = FakeRunner::new();
        let mut m = manager(&runner, "localhost");
        m.create_snapshots().unwrap();
        m.mount_snapshots().unwrap();
        let before = runner.calls().len();
        m.unmount_snapshots().unwrap();
        m.delete_snapshots().unwrap();
        assert_eq!(
            runner.joined_calls()[before..],
            [
                "umount /snap-root/job/var",
                "rmdir /snap-root/job/var",
                "umount /snap-root/job/etc",
                "rmdir /snap-root/job/etc",
                "lvremove -f vg/lv2-test",
                "lvremove -f vg/lv1-test",
            ]
        );
        assert_eq!(flags(&m), vec![(false, false, false), (false, false, false)]);

        let after = runner.calls().len();
        m.unmount_snapshots().unwrap();
        m.delete_snapshots().unwrap();
        assert_eq!(runner.calls().len(), after);
    }

    #[test]
    fn teardown_after_partial_mount_touches_only_flagged_steps() {
        let runner = FakeRunner::new();
        runner.on("/dev/vg/lv2-test", "", 32);
        let mut m = manager(&runner, "localhost");
        m.create_snapshots().unwrap();
        assert!(m.mount_snapshots().is_err());
        assert_eq!(flags(&m), vec![(true, true, true), (true, true, false)]);

        let before = runner.calls().len();
        m.unmount_snapshots().unwrap();
        m.delete_snapshots().unwrap();
        assert_eq!(
            runner.joined_calls()[before..],
            [
                "rmdir /snap-root/job/var",
                "umount /snap-root/job/etc",
                "rmdir /snap-root/job/etc",
                "lvremove -f vg/lv2-test",
                "lvremove -f vg/lv1-test",
            ]
        );
    }

    #[test]
    fn failed_unmount_does_not_stop_other_records() {
        let runner = FakeRunner::new();
        let mut m = manager(&runner, "localhost");
        m.create_snapshots().unwrap();
        m.mount_snapshots().unwrap();
        runner.on("umount /snap-root/job/var", "", 1);
        assert!(m.unmount_snapshots().is_err());
        assert_eq!(flags(&m), vec![(true, false, false), (true, true, true)]);

        let err = m.delete_snapshots().unwrap_err();
        assert!(matches!(err, BackupError::ResourceState(_)));
        assert_eq!(flags(&m), vec![(false, false, false), (true, true, true)]);
        assert!(!runner.joined_calls().iter().any(|c| c == "rmdir /snap-root/job/var"));
    }

    #[test]
    fn remote_source_commands_use_remote_login() {
        let runner = FakeRunner::new();
        let mut m = manager(&runner, "db1");
        m.create_snapshots().unwrap();
        assert_eq!(
            runner.joined_calls()[0],
            "/usr/bin/ssh -p 22 root@db1 lvcreate -s -L 1G vg/lv1 -n lv1-test"
        );
    }

    #[test]
    fn recreate_drops_finished_records() {
        let runner = FakeRunner::new();
        let mut m = manager(&runner, "localhost");
        m.create_snapshots().unwrap();
        m.delete_snapshots().unwrap();
        m.create_snapshots().unwrap();
        assert_eq!(m.records().len(), 2);
    }

    #[test]
    fn add_volume_validates_names_and_paths() {
        let runner = FakeRunner::new();
        let mut m = LvmSnapshots::new("job", "localhost", settings(), Rc::new(executor_with(&runner, 0)));
        assert!(m.add_volume("lv1", "/etc", None).is_err());
        assert!(m.add_volume("vg/lv1/x", "/etc", None).is_err());
        assert!(m.add_volume("vg/lv1", "etc", None).is_err());
        assert!(m.add_volume("vg/lv1", "/etc/../root", None).is_err());
        assert!(m.volumes().is_empty());
    }

    #[test]
    fn registered_hooks_keep_relative_order() {
        let runner = FakeRunner::new();
        let m = Rc::new(RefCell::new(manager(&runner, "localhost")));
        let mut pipeline = HookPipeline::new();
        LvmSnapshots::register(&m, &mut pipeline);
        assert_eq!(
            pipeline.names(crate::types::Phase::Before),
            vec!["create_snapshots", "mount_snapshots"]
        );
        assert_eq!(
            pipeline.names(crate::types::Phase::After),
            vec!["unmount_snapshots", "delete_snapshots"]
        );
    }
}
