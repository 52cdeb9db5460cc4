use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;

use crate::error::{BackupError, Result};

/// Raised by SIGINT/SIGTERM; consumed by the process runner, which cancels
/// the in-flight command and lowers it again.
pub type Interrupt = Arc<AtomicBool>;

/// Routes SIGINT and SIGTERM into the returned flag. A second signal that
/// arrives before the first one was consumed terminates the process.
pub fn install() -> Result<Interrupt> {
    let interrupt: Interrupt = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        flag::register_conditional_shutdown(signal, 1, Arc::clone(&interrupt))
            .map_err(|e| BackupError::message(format!("signal handler setup failed: {}", e)))?;
        flag::register(signal, Arc::clone(&interrupt))
            .map_err(|e| BackupError::message(format!("signal handler setup failed: {}", e)))?;
    }
    Ok(interrupt)
}
