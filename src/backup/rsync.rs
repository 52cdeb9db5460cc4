use std::path::Path;
use std::rc::Rc;

use tracing::info;

use crate::command::{display_argv, Executor};
use crate::config::Settings;
use crate::error::Result;
use crate::workflow::BackupAction;

/// Splits an option string from the settings file into arguments. Options
/// are separated by whitespace; quoting is not interpreted.
pub fn split_options(options: &str) -> Vec<String> {
    options.split_whitespace().map(str::to_string).collect()
}

/// Copies the mounted snapshots of a source host into the destination with
/// rsync, run on the source host.
pub struct RsyncAction {
    executor: Rc<Executor>,
    host: String,
    args: Vec<String>,
}

impl RsyncAction {
    pub fn new(
        settings: &Settings,
        source: &Path,
        destination: &str,
        host: &str,
        executor: Rc<Executor>,
    ) -> Self {
        let mut args = vec![settings.rsync_path.clone()];
        args.extend(split_options(&settings.rsync_options));
        args.push("--exclude".to_string());
        args.push("/.zfs".to_string());
        // Trailing slash copies the contents instead of the directory itself.
        args.push(format!("{}/", source.display()));
        args.push(destination.to_string());
        Self {
            executor,
            host: host.to_string(),
            args,
        }
    }

    pub fn argv(&self) -> &[String] {
        &self.args
    }
}

impl BackupAction for RsyncAction {
    fn run(&mut self) -> Result<()> {
        info!("rsync {}", display_argv(&self.args[1..]));
        self.executor.run(&self.args, &self.host)?;
        Ok(())
    }
}
