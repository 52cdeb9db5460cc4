use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{BackupError, Result};
use crate::types::{is_local, RunMode};

pub mod process;

pub use process::ProcessRunner;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Spawns an argument vector and waits for it. Implementations must not treat
/// a non-zero exit status as an error.
pub trait CommandRunner {
    fn run(&self, argv: &[String]) -> Result<CommandOutput>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLogin {
    pub ssh_path: String,
    pub port: u16,
    pub user: String,
}

impl RemoteLogin {
    pub fn prefix(&self, host: &str) -> Vec<String> {
        vec![
            self.ssh_path.clone(),
            "-p".to_string(),
            self.port.to_string(),
            format!("{}@{}", self.user, host),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub interval: Duration,
}

pub type Sleeper = Box<dyn Fn(Duration)>;

pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

pub fn display_argv(argv: &[String]) -> String {
    argv.join(" ")
}

/// Runs commands on the local host or through the remote login, with an
/// optional fixed-interval retry loop.
///
/// Retries do not distinguish transient from permanent failures: every
/// error and every non-zero exit status is retried until `max_retries` extra
/// attempts have been spent.
pub struct Executor {
    runner: Box<dyn CommandRunner>,
    remote: RemoteLogin,
    retry: RetryPolicy,
    sleep: Sleeper,
    run_mode: RunMode,
}

impl Executor {
    pub fn new(
        runner: Box<dyn CommandRunner>,
        remote: RemoteLogin,
        retry: RetryPolicy,
        run_mode: RunMode,
    ) -> Self {
        Self {
            runner,
            remote,
            retry,
            sleep: Box::new(std::thread::sleep),
            run_mode,
        }
    }

    pub fn with_sleeper(mut self, sleep: impl Fn(Duration) + 'static) -> Self {
        self.sleep = Box::new(sleep);
        self
    }

    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    pub fn host_argv(&self, argv: &[String], host: &str) -> Vec<String> {
        if is_local(host) {
            return argv.to_vec();
        }
        let mut full = self.remote.prefix(host);
        full.extend(argv.iter().cloned());
        full
    }

    /// Runs `argv` on `host` and returns whatever the process produced.
    pub fn execute(&self, argv: &[String], host: &str) -> Result<CommandOutput> {
        if argv.is_empty() {
            return Err(BackupError::message("refusing to run an empty command"));
        }
        let full = self.host_argv(argv, host);
        if self.run_mode.dry_run {
            info!("dry-run: {}", display_argv(&full));
            return Ok(CommandOutput::default());
        }
        debug!("run_command {:?}", full);
        let output = self.runner.run(&full)?;
        if !output.stdout.is_empty() {
            debug!("{}", output.stdout.trim_end());
        }
        if !output.stderr.is_empty() {
            warn!("{}", output.stderr.trim_end());
        }
        Ok(output)
    }

    /// Like [`Executor::execute`] but a non-zero exit status is an error.
    pub fn run(&self, argv: &[String], host: &str) -> Result<CommandOutput> {
        let output = self.execute(argv, host)?;
        if !output.success() {
            return Err(BackupError::NonZeroExitStatus {
                host: host.to_string(),
                command: display_argv(argv),
                status: output.status,
            });
        }
        Ok(output)
    }

    pub fn run_with_retries(&self, argv: &[String], host: &str) -> Result<CommandOutput> {
        let attempts = self.retry.max_retries + 1;
        let mut attempt = 1;
        loop {
            match self.run(argv, host) {
                Ok(output) => return Ok(output),
                Err(err) if attempt < attempts => {
                    warn!(
                        "attempt {}/{} failed: {}; retrying in {}s",
                        attempt,
                        attempts,
                        err,
                        self.retry.interval.as_secs()
                    );
                    (self.sleep)(self.retry.interval);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
