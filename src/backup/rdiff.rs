//! Incremental backups with rdiff-backup.
//!
//! rdiff-backup always runs on the backup server and pulls from the source
//! host over its own SSH transport (`user@host::path`).

use std::cell::RefCell;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::rc::Rc;

use tracing::info;

use crate::backup::rsync::split_options;
use crate::command::Executor;
use crate::config::Settings;
use crate::error::{BackupError, Result};
use crate::hooks::{ArgSource, Hook, HookArgs, HookContext};
use crate::types::{is_local, LOCALHOST};
use crate::workflow::Job;

pub struct RdiffBackup {
    executor: Rc<Executor>,
    label: String,
    source_host: String,
    remote_user: String,
    rdiff_backup_path: String,
    default_options: Vec<String>,
    ssh_compression: bool,
    backup_store_path: String,
    top_level_src_dir: String,
    includes: Vec<String>,
    excludes: Vec<String>,
    remove_older_than: Option<String>,
}

impl RdiffBackup {
    pub fn new(
        label: &str,
        source_host: &str,
        settings: &Settings,
        backup_store_path: &str,
        executor: Rc<Executor>,
    ) -> Self {
        Self {
            executor,
            label: label.to_string(),
            source_host: source_host.to_string(),
            remote_user: settings.remote_user.clone(),
            rdiff_backup_path: settings.rdiff_backup_path.clone(),
            default_options: split_options(&settings.rdiff_backup_options),
            ssh_compression: settings.ssh_compression,
            backup_store_path: backup_store_path.trim_end_matches('/').to_string(),
            top_level_src_dir: "/".to_string(),
            includes: Vec::new(),
            excludes: Vec::new(),
            remove_older_than: settings.remove_older_than_timespec.clone(),
        }
    }

    pub fn include(&mut self, path: impl Into<String>) {
        self.includes.push(path.into());
    }

    pub fn exclude(&mut self, path: impl Into<String>) {
        self.excludes.push(path.into());
    }

    pub fn set_top_level_src_dir(&mut self, dir: impl Into<String>) {
        self.top_level_src_dir = dir.into();
    }

    /// Changes the retention timespec. Read when the after-hook runs, so it
    /// may be changed any time before the job starts.
    pub fn set_remove_older_than(&mut self, timespec: Option<String>) {
        self.remove_older_than = timespec;
    }

    pub fn destination(&self) -> String {
        format!("{}/{}", self.backup_store_path, self.label)
    }

    fn source(&self) -> String {
        if is_local(&self.source_host) {
            self.top_level_src_dir.clone()
        } else {
            format!(
                "{}@{}::{}",
                self.remote_user, self.source_host, self.top_level_src_dir
            )
        }
    }

    pub fn check_binary(&self) -> Result<()> {
        if self.executor.run_mode().dry_run {
            return Ok(());
        }
        let executable = fs::metadata(&self.rdiff_backup_path)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false);
        if !executable {
            return Err(BackupError::invalid(format!(
                "rdiff-backup ({}) does not appear to be installed or is not executable",
                self.rdiff_backup_path
            )));
        }
        Ok(())
    }

    pub fn argv(&self) -> Vec<String> {
        let mut args = vec![self.rdiff_backup_path.clone()];
        args.extend(self.default_options.iter().cloned());
        // rdiff-backup compresses SSH by default and can only be told not to.
        if !is_local(&self.source_host) && !self.ssh_compression {
            args.push("--ssh-no-compression".to_string());
        }
        for path in &self.excludes {
            args.push("--exclude".to_string());
            args.push(path.clone());
        }
        for path in &self.includes {
            args.push("--include".to_string());
            args.push(path.clone());
        }
        args.push("--exclude".to_string());
        args.push("**".to_string());
        args.push(self.source());
        args.push(self.destination());
        args
    }

    pub fn run_backup(&self) -> Result<()> {
        self.executor.run(&self.argv(), LOCALHOST)?;
        Ok(())
    }

    /// Trims increments older than `timespec` (`30D`, `10W`, ...). Does
    /// nothing when the job failed.
    pub fn remove_older_than(&self, timespec: &str, error_case: bool) -> Result<()> {
        if error_case {
            return Ok(());
        }
        info!("remove_older_than {} started", timespec);
        let args = vec![
            self.rdiff_backup_path.clone(),
            "--force".to_string(),
            "--remove-older-than".to_string(),
            timespec.to_string(),
            self.destination(),
        ];
        self.executor.run(&args, LOCALHOST)?;
        info!("remove_older_than {} completed", timespec);
        Ok(())
    }

    /// Makes rdiff-backup the job's action and, when a timespec is set,
    /// appends the retention after-hook.
    pub fn attach(rdiff: &Rc<RefCell<Self>>, job: &mut Job) {
        let r = Rc::clone(rdiff);
        job.set_action(move || r.borrow().run_backup());

        if rdiff.borrow().remove_older_than.is_none() {
            return;
        }
        let source = Rc::clone(rdiff);
        let r = Rc::clone(rdiff);
        job.add_post_hook(
            Hook::new("remove_older_than", move |ctx: &HookContext| {
                match ctx.arg("timespec") {
                    Some(timespec) => r.borrow().remove_older_than(timespec, ctx.error_case),
                    None => Ok(()),
                }
            })
            .with_args(ArgSource::deferred(move || {
                let mut args = HookArgs::new();
                if let Some(timespec) = &source.borrow().remove_older_than {
                    args.insert("timespec".to_string(), timespec.clone());
                }
                args
            })),
        );
    }
}
