//! A single backup job: before-hooks, the main action, after-hooks.
//!
//! Any failure in the before-hooks or the main action (including a user
//! interrupt) sets the job's `error_case`, which then stays set for the rest
//! of the run and is handed to every after-hook. After-hooks always run.

use tracing::{error, info, info_span};

use crate::error::{BackupError, Result};
use crate::hooks::{Hook, HookPipeline};

/// The data movement step of a job.
pub trait BackupAction {
    fn run(&mut self) -> Result<()>;
}

impl<F> BackupAction for F
where
    F: FnMut() -> Result<()>,
{
    fn run(&mut self) -> Result<()> {
        self()
    }
}

pub struct Job {
    label: String,
    pipeline: HookPipeline,
    action: Option<Box<dyn BackupAction>>,
    error_case: bool,
}

impl Job {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pipeline: HookPipeline::new(),
            action: None,
            error_case: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn error_case(&self) -> bool {
        self.error_case
    }

    pub fn pipeline(&self) -> &HookPipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut HookPipeline {
        &mut self.pipeline
    }

    pub fn set_action(&mut self, action: impl BackupAction + 'static) {
        self.action = Some(Box::new(action));
    }

    pub fn add_pre_hook(&mut self, hook: Hook) {
        self.pipeline.add_before(hook);
    }

    pub fn add_post_hook(&mut self, hook: Hook) {
        self.pipeline.add_after(hook);
    }

    pub fn insert_pre_hook(&mut self, index: usize, hook: Hook) {
        self.pipeline.insert_before(index, hook);
    }

    pub fn insert_post_hook(&mut self, index: usize, hook: Hook) {
        self.pipeline.insert_after(index, hook);
    }

    pub fn delete_pre_hook(&mut self, index: usize) -> Result<Hook> {
        self.pipeline.delete_before(index)
    }

    pub fn delete_post_hook(&mut self, index: usize) -> Result<Hook> {
        self.pipeline.delete_after(index)
    }

    fn run_main(&mut self) -> Result<()> {
        self.pipeline.run_before()?;
        let action = self
            .action
            .as_mut()
            .ok_or_else(|| BackupError::message("no backup action configured"))?;
        info!("data backup started...");
        action.run()?;
        info!("data backup complete");
        Ok(())
    }

    /// Runs the whole job. Returns `true` only when the before-hooks, the
    /// main action and every after-hook succeeded.
    pub fn run(&mut self) -> bool {
        let span = info_span!("job", label = %self.label);
        let _enter = span.enter();

        self.error_case = false;
        info!("started");
        if let Err(err) = self.run_main() {
            self.error_case = true;
            if err.is_cancelled() {
                error!("backup job cancelled by user");
            } else {
                error!("{}", err);
            }
            error!("let's try to clean up...");
        }

        let cleanup = self.pipeline.run_after(self.error_case);
        if let Err(err) = &cleanup {
            error!("post-job hooks failed: {}", err);
        }
        info!("stopped");
        !self.error_case && cleanup.is_ok()
    }
}
