use std::rc::Rc;

use tracing::info;

use crate::command::{display_argv, Executor};
use crate::config::CommandHookConfig;
use crate::hooks::{Hook, HookContext};

/// Wraps a configured external command as a hook. Post-job commands marked
/// `skip_on_error` do nothing when the job has already failed.
pub fn command_hook(name: String, config: &CommandHookConfig, executor: Rc<Executor>) -> Hook {
    let config = config.clone();
    Hook::new(name.clone(), move |ctx: &HookContext| {
        if ctx.error_case && config.skip_on_error {
            info!("{}: skipped after earlier failure", name);
            return Ok(());
        }
        info!("{}: {}", name, display_argv(&config.command));
        if config.retries {
            executor.run_with_retries(&config.command, &config.host)?;
        } else {
            executor.run(&config.command, &config.host)?;
        }
        Ok(())
    })
}
