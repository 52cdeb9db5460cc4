use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::backup::{build_job, print_hook_order, print_job_details};
use crate::cli::args::Cli;
use crate::command::{Executor, ProcessRunner};
use crate::config::{load_job, load_settings, RuntimeJob, DEFAULT_SETTINGS_PATH};
use crate::error::BackupError;
use crate::signal_handler;
use crate::types::RunMode;
use crate::util::lock::acquire_job_lock;

pub mod args;

pub const EXIT_OK: i32 = 0;
pub const EXIT_JOB_FAILED: i32 = 1;
pub const EXIT_USAGE: i32 = 2;
pub const EXIT_ALREADY_RUNNING: i32 = 3;

pub fn run() -> i32 {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => EXIT_OK,
                _ => EXIT_USAGE,
            };
        }
    };

    let loaded = load(&cli);
    let debug = cli.debug
        || loaded
            .as_ref()
            .map(|job| job.settings.debug_logging)
            .unwrap_or(false);
    init_tracing(debug);

    let runtime = match loaded {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("{:#}", err);
            return EXIT_USAGE;
        }
    };
    match run_job(&cli, runtime) {
        Ok(true) => EXIT_OK,
        Ok(false) => EXIT_JOB_FAILED,
        Err(err) => {
            error!("{:#}", err);
            exit_code_for(&err)
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<BackupError>() {
        Some(BackupError::AlreadyRunning(_)) => EXIT_ALREADY_RUNNING,
        _ => EXIT_USAGE,
    }
}

fn load(cli: &Cli) -> Result<RuntimeJob> {
    let (settings_path, required) = match &cli.settings {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(DEFAULT_SETTINGS_PATH), false),
    };
    let settings = load_settings(&settings_path, required)
        .with_context(|| format!("load settings {}", settings_path.display()))?;
    let mut job = load_job(&cli.job_file, &settings)
        .with_context(|| format!("load job {}", cli.job_file.display()))?;
    if cli.dry_run {
        job.settings.dry_run = true;
    }
    Ok(job)
}

fn run_job(cli: &Cli, runtime: RuntimeJob) -> Result<bool> {
    let run_mode = RunMode {
        dry_run: runtime.settings.dry_run,
    };
    if cli.print_job {
        // Built against a dry-run executor so nothing is checked or spawned.
        let executor = Rc::new(Executor::new(
            Box::new(ProcessRunner::new(Default::default())),
            runtime.settings.remote_login(),
            runtime.settings.retry_policy(),
            RunMode { dry_run: true },
        ));
        let plan = build_job(&runtime, executor)?;
        print_job_details(&runtime);
        print_hook_order(&plan.job);
        return Ok(true);
    }
    if run_mode.dry_run {
        info!("dry-run: no commands will be executed");
    }
    let _lock = if run_mode.dry_run || cli.no_lock {
        None
    } else {
        Some(acquire_job_lock(&runtime.settings.lock_dir, &runtime.label)?)
    };

    let interrupt = signal_handler::install()?;
    let executor = Rc::new(Executor::new(
        Box::new(ProcessRunner::new(interrupt)),
        runtime.settings.remote_login(),
        runtime.settings.retry_policy(),
        run_mode,
    ));
    let mut plan = build_job(&runtime, executor)?;
    Ok(plan.job.run())
}

/// Logs to stderr. `RUST_LOG` wins over the debug switch.
pub fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(debug)
        .with_line_number(debug)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_running_maps_to_its_own_exit_code() {
        let err = anyhow::Error::new(BackupError::AlreadyRunning("db1".to_string()));
        assert_eq!(exit_code_for(&err), EXIT_ALREADY_RUNNING);
        let err = anyhow::Error::new(BackupError::message("bad")).context("load job");
        assert_eq!(exit_code_for(&err), EXIT_USAGE);
    }

    #[test]
    fn cli_dry_run_overrides_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let job_path = dir.path().join("web1.yaml");
        std::fs::write(
            &job_path,
            "label: web1\nkind: rdiff\nsettings:\n  backupStorePath: /srv/rdiff\n",
        )
        .unwrap();
        let cli = Cli::try_parse_from([
            "snapvault".to_string(),
            "--settings".to_string(),
            dir.path().join("missing.yaml").display().to_string(),
            job_path.display().to_string(),
        ])
        .unwrap();
        assert!(load(&cli).is_err());

        let cli = Cli::try_parse_from([
            "snapvault".to_string(),
            "--dry-run".to_string(),
            job_path.display().to_string(),
        ])
        .unwrap();
        let job = load(&cli).unwrap();
        assert!(job.settings.dry_run);
    }
}
