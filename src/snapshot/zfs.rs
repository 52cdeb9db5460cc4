//! Historical ZFS snapshots on the backup destination.
//!
//! After a successful run a snapshot named `<prefix><timestamp>` is taken of
//! the destination dataset, and prefixed snapshots older than the retention
//! window are destroyed. Age is always taken from the dataset's `creation`
//! property; the timestamp in the name is for people only.

use std::rc::Rc;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone};
use tracing::{info, warn};

use crate::command::{argv, Executor};
use crate::error::{BackupError, Result};
use crate::hooks::{ArgSource, Hook, HookContext, HookPipeline};

const CREATION_TEXT_FORMAT: &str = "%a %b %d %H:%M %Y";

pub type Clock = Box<dyn Fn() -> DateTime<Local>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSettings {
    pub prefix: String,
    pub timestamp_format: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSnapshot {
    pub full_name: String,
    pub creation_time: DateTime<Local>,
}

pub struct ZfsRetention {
    executor: Rc<Executor>,
    host: String,
    dataset: String,
    settings: RetentionSettings,
    clock: Clock,
}

pub fn validate_timestamp_format(format: &str) -> Result<()> {
    if format.is_empty() || StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(BackupError::invalid(format!(
            "invalid snapshot timestamp format {:?}",
            format
        )));
    }
    Ok(())
}

/// Parses the `creation` property as printed by `zfs get -p` (seconds since
/// the epoch) or in its human readable form.
pub fn parse_creation(value: &str) -> Result<DateTime<Local>> {
    let value = value.trim();
    if !value.is_empty() && value.chars().all(|c| c.is_ascii_digit()) {
        let secs: i64 = value
            .parse()
            .map_err(|e| BackupError::message(format!("creation time {}: {}", value, e)))?;
        return Local
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| BackupError::message(format!("creation time {} out of range", value)));
    }
    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    let naive = NaiveDateTime::parse_from_str(&normalized, CREATION_TEXT_FORMAT)
        .map_err(|e| BackupError::message(format!("creation time {:?}: {}", value, e)))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| BackupError::message(format!("creation time {:?} does not exist locally", value)))
}

impl ZfsRetention {
    pub fn new(
        host: &str,
        dataset: &str,
        settings: RetentionSettings,
        executor: Rc<Executor>,
    ) -> Result<Self> {
        validate_timestamp_format(&settings.timestamp_format)?;
        if dataset.trim().is_empty() || dataset.contains('@') {
            return Err(BackupError::invalid(format!("invalid dataset name {:?}", dataset)));
        }
        Ok(Self {
            executor,
            host: host.to_string(),
            dataset: dataset.to_string(),
            settings,
            clock: Box::new(Local::now),
        })
    }

    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Local> + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn snapshot_name(&self) -> String {
        let now = (self.clock)();
        format!(
            "{}{}",
            self.settings.prefix,
            now.format(&self.settings.timestamp_format)
        )
    }

    pub fn create_historical_snapshot(&self, error_case: bool) -> Result<()> {
        if error_case {
            return Ok(());
        }
        info!("creating ZFS snapshot...");
        let full_name = format!("{}@{}", self.dataset, self.snapshot_name());
        self.executor
            .run(&argv(&["zfs", "snapshot", &full_name]), &self.host)?;
        Ok(())
    }

    /// Full names of this dataset's snapshots whose name carries our prefix.
    pub fn list_prefixed_snapshots(&self) -> Result<Vec<String>> {
        let cmd = argv(&["zfs", "get", "-rH", "-o", "name,value", "type", &self.dataset]);
        let output = self.executor.run(&cmd, &self.host)?;
        let mut snapshots = Vec::new();
        for line in output.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Some((name, kind)) = line.split_once('\t') else {
                warn!("ignoring unexpected zfs output line {:?}", line);
                continue;
            };
            if kind.trim() != "snapshot" {
                continue;
            }
            let Some((dataset, snapshot)) = name.split_once('@') else {
                continue;
            };
            if dataset == self.dataset && snapshot.starts_with(&self.settings.prefix) {
                snapshots.push(name.to_string());
            }
        }
        Ok(snapshots)
    }

    pub fn creation_time(&self, snapshot: &str) -> Result<DateTime<Local>> {
        let cmd = argv(&["zfs", "get", "-Hp", "-o", "value", "creation", snapshot]);
        let output = self.executor.run(&cmd, &self.host)?;
        parse_creation(&output.stdout)
    }

    /// Prefixed snapshots created at or before `now - max_age_days`.
    pub fn find_expired(&self, max_age_days: i64) -> Result<Vec<RetentionSnapshot>> {
        let cutoff = (self.clock)() - Duration::days(max_age_days);
        let mut expired = Vec::new();
        for full_name in self.list_prefixed_snapshots()? {
            let creation_time = self.creation_time(&full_name)?;
            if creation_time <= cutoff {
                expired.push(RetentionSnapshot {
                    full_name,
                    creation_time,
                });
            }
        }
        Ok(expired)
    }

    pub fn destroy_expired_snapshots(&self, max_age_days: i64, error_case: bool) -> Result<()> {
        if error_case {
            return Ok(());
        }
        info!("looking for expired ZFS snapshots...");
        let expired = self.find_expired(max_age_days)?;
        if expired.is_empty() {
            info!("found no expired ZFS snapshots");
            return Ok(());
        }
        let mut failures = Vec::new();
        for snapshot in expired {
            match self
                .executor
                .run(&argv(&["zfs", "destroy", &snapshot.full_name]), &self.host)
            {
                Ok(_) => info!(
                    "{} destroyed (created {})",
                    snapshot.full_name,
                    snapshot.creation_time.format("%Y-%m-%d %H:%M")
                ),
                Err(err) => failures.push(err),
            }
        }
        BackupError::collect(failures)
    }

    /// Registers snapshot creation then expiry as after-hooks.
    pub fn register(manager: &Rc<Self>, pipeline: &mut HookPipeline, max_age_days: u32) {
        let m = Rc::clone(manager);
        pipeline.add_after(Hook::new("create_zfs_snapshot", move |ctx: &HookContext| {
            m.create_historical_snapshot(ctx.error_case)
        }));
        let m = Rc::clone(manager);
        pipeline.add_after(
            Hook::new("destroy_expired_zfs_snapshots", move |ctx: &HookContext| {
                m.destroy_expired_snapshots(ctx.parse("days")?, ctx.error_case)
            })
            .with_args(ArgSource::fixed([("days", max_age_days.to_string())])),
        );
    }
}
