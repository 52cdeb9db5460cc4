use std::cell::RefCell;
use std::rc::Rc;

use crate::backup::commands::command_hook;
use crate::backup::rdiff::RdiffBackup;
use crate::backup::rsync::RsyncAction;
use crate::command::Executor;
use crate::config::{RuntimeJob, Target};
use crate::error::{BackupError, Result};
use crate::snapshot::{LvmSnapshots, ZfsRetention};
use crate::types::Phase;
use crate::workflow::Job;

pub mod commands;
pub mod rdiff;
pub mod rsync;

/// A job ready to run, with handles on the state its hooks share.
pub struct BackupPlan {
    pub job: Job,
    pub snapshots: Option<Rc<RefCell<LvmSnapshots>>>,
    pub retention: Option<Rc<ZfsRetention>>,
    pub rdiff: Option<Rc<RefCell<RdiffBackup>>>,
}

fn join_or(items: &[String], empty: &str) -> String {
    if items.is_empty() {
        empty.to_string()
    } else {
        items.join(", ")
    }
}

pub fn print_hook_order(job: &Job) {
    let pipeline = job.pipeline();
    println!("  before hooks: {}", pipeline.names(Phase::Before).join(", "));
    println!("  after hooks: {}", pipeline.names(Phase::After).join(", "));
}

pub fn print_job_details(job: &RuntimeJob) {
    println!("job: {}", job.label);
    println!("  kind: {}", job.kind);
    println!("  source host: {}", job.source_host);
    for volume in &job.volumes {
        println!(
            "  volume: {} -> {}{}",
            volume.name,
            volume.mount_point,
            volume
                .mount_options
                .as_deref()
                .map(|o| format!(" ({})", o))
                .unwrap_or_default()
        );
    }
    match &job.target {
        Target::Zfs {
            rsync_dst,
            zfs_host,
            dataset,
            snapshot_expiration_days,
        } => {
            println!("  rsync destination: {}", rsync_dst);
            println!("  zfs dataset: {} on {}", dataset, zfs_host);
            println!("  snapshot expiration: {} days", snapshot_expiration_days);
        }
        Target::Rdiff {
            backup_store_path,
            includes,
            excludes,
            top_level_src_dir,
            remove_older_than,
        } => {
            println!("  backup store: {}/{}", backup_store_path, job.label);
            println!("  top level source: {}", top_level_src_dir);
            println!("  includes: {}", join_or(includes, "<none>"));
            println!("  excludes: {}", join_or(excludes, "<none>"));
            println!(
                "  remove older than: {}",
                remove_older_than.as_deref().unwrap_or("<never>")
            );
        }
    }
    let pre: Vec<String> = job.pre_commands.iter().map(|c| c.command.join(" ")).collect();
    let post: Vec<String> = job.post_commands.iter().map(|c| c.command.join(" ")).collect();
    println!("  pre commands: {}", join_or(&pre, "<none>"));
    println!("  post commands: {}", join_or(&post, "<none>"));
}

/// Wires the snapshot manager, the data movement step, retention and the
/// configured commands into a [`Job`].
///
/// Configured pre- and post-commands are appended after the strategy's own
/// hooks, so post-commands run after snapshot teardown and retention.
pub fn build_job(runtime: &RuntimeJob, executor: Rc<Executor>) -> Result<BackupPlan> {
    let mut job = Job::new(runtime.label.as_str());

    let snapshots = if runtime.kind.uses_lvm() {
        let mut lvm = LvmSnapshots::new(
            &runtime.label,
            &runtime.source_host,
            runtime.settings.lvm(),
            Rc::clone(&executor),
        );
        for volume in &runtime.volumes {
            lvm.add_volume(&volume.name, &volume.mount_point, volume.mount_options.as_deref())?;
        }
        let lvm = Rc::new(RefCell::new(lvm));
        LvmSnapshots::register(&lvm, job.pipeline_mut());
        Some(lvm)
    } else {
        None
    };

    let mut retention = None;
    let mut rdiff = None;
    match &runtime.target {
        Target::Zfs {
            rsync_dst,
            zfs_host,
            dataset,
            snapshot_expiration_days,
        } => {
            let lvm = snapshots
                .as_ref()
                .ok_or_else(|| BackupError::invalid(format!("job {}: zfs target needs volumes", runtime.label)))?;
            let source = lvm.borrow().mount_base().to_path_buf();
            job.set_action(RsyncAction::new(
                &runtime.settings,
                &source,
                rsync_dst,
                &runtime.source_host,
                Rc::clone(&executor),
            ));
            let zfs = Rc::new(ZfsRetention::new(
                zfs_host,
                dataset,
                runtime.settings.retention(),
                Rc::clone(&executor),
            )?);
            ZfsRetention::register(&zfs, job.pipeline_mut(), *snapshot_expiration_days);
            retention = Some(zfs);
        }
        Target::Rdiff {
            backup_store_path,
            includes,
            excludes,
            top_level_src_dir,
            remove_older_than,
        } => {
            let mut backup = RdiffBackup::new(
                &runtime.label,
                &runtime.source_host,
                &runtime.settings,
                backup_store_path,
                Rc::clone(&executor),
            );
            backup.check_binary()?;
            match &snapshots {
                Some(lvm) => {
                    let lvm = lvm.borrow();
                    backup.set_top_level_src_dir(lvm.mount_base().to_string_lossy());
                    for path in includes {
                        backup.include(lvm.snapshot_path_for(path));
                    }
                    for path in excludes {
                        backup.exclude(lvm.snapshot_path_for(path));
                    }
                }
                None => {
                    backup.set_top_level_src_dir(top_level_src_dir.as_str());
                    for path in includes {
                        backup.include(path.as_str());
                    }
                    for path in excludes {
                        backup.exclude(path.as_str());
                    }
                }
            }
            backup.set_remove_older_than(remove_older_than.clone());
            let backup = Rc::new(RefCell::new(backup));
            RdiffBackup::attach(&backup, &mut job);
            rdiff = Some(backup);
        }
    }

    for (i, config) in runtime.pre_commands.iter().enumerate() {
        job.add_pre_hook(command_hook(
            format!("pre_command_{}", i),
            config,
            Rc::clone(&executor),
        ));
    }
    for (i, config) in runtime.post_commands.iter().enumerate() {
        job.add_post_hook(command_hook(
            format!("post_command_{}", i),
            config,
            Rc::clone(&executor),
        ));
    }

    Ok(BackupPlan {
        job,
        snapshots,
        retention,
        rdiff,
    })
}
