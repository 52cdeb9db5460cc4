use std::io::Read;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use signal_hook::consts::{SIGINT, SIGTERM};
use tracing::warn;

use crate::command::{display_argv, CommandOutput, CommandRunner};
use crate::error::{BackupError, Result};
use crate::signal_handler::Interrupt;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs commands as child processes, killing the child when an interrupt
/// arrives while it is running.
pub struct ProcessRunner {
    interrupt: Interrupt,
}

impl ProcessRunner {
    pub fn new(interrupt: Interrupt) -> Self {
        Self { interrupt }
    }

    fn cancelled(child: &mut Child, argv: &[String]) -> BackupError {
        let _ = child.kill();
        let _ = child.wait();
        BackupError::UserCancelled {
            command: display_argv(argv),
        }
    }

    /// Consumes the interrupt flag after the child exited on its own. A
    /// terminal Ctrl-C reaches the child too, and the child may exit before
    /// our handler has raised the flag; a child killed by SIGINT/SIGTERM
    /// gets one poll interval for the flag to catch up, so it cannot leak
    /// into the next command.
    fn exited(&self, status: ExitStatus, argv: &[String]) -> Result<i32> {
        let mut interrupted = self.interrupt.swap(false, Ordering::SeqCst);
        let by_signal = matches!(status.signal(), Some(SIGINT) | Some(SIGTERM));
        if by_signal && !interrupted {
            thread::sleep(POLL_INTERVAL);
            interrupted = self.interrupt.swap(false, Ordering::SeqCst);
        }
        if interrupted || by_signal {
            warn!("{} ended by interrupt", argv[0]);
            return Err(BackupError::UserCancelled {
                command: display_argv(argv),
            });
        }
        Ok(status.code().unwrap_or(1))
    }

    fn wait(&self, child: &mut Child, argv: &[String]) -> Result<i32> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return self.exited(status, argv),
                Ok(None) => {}
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(err.into());
                }
            }
            if self.interrupt.swap(false, Ordering::SeqCst) {
                warn!("interrupt received; terminating {}", argv[0]);
                return Err(Self::cancelled(child, argv));
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

impl CommandRunner for ProcessRunner {
    fn run(&self, argv: &[String]) -> Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BackupError::message("refusing to run an empty command"))?;
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| BackupError::CommandNotFound {
                command: display_argv(argv),
                source,
            })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());
        let status = self.wait(&mut child, argv)?;
        Ok(CommandOutput {
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::argv;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    fn runner() -> (ProcessRunner, Interrupt) {
        let flag: Interrupt = Arc::new(AtomicBool::new(false));
        (ProcessRunner::new(flag.clone()), flag)
    }

    #[test]
    fn captures_output_and_status() {
        let (runner, _) = runner();
        let out = runner
            .run(&argv(&["sh", "-c", "echo hello; echo oops >&2; exit 4"]))
            .unwrap();
        assert_eq!(out.stdout, "hello\n");
        assert_eq!(out.stderr, "oops\n");
        assert_eq!(out.status, 4);
    }

    #[test]
    fn unknown_binary_is_command_not_found() {
        let (runner, _) = runner();
        let err = runner
            .run(&argv(&["/nonexistent/snapvault-test-binary"]))
            .unwrap_err();
        assert!(matches!(err, BackupError::CommandNotFound { .. }));
    }

    #[test]
    fn raised_interrupt_kills_child_and_clears_flag() {
        let (runner, flag) = runner();
        flag.store(true, Ordering::SeqCst);
        let err = runner.run(&argv(&["sleep", "5"])).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn child_killed_by_sigint_is_cancellation() {
        let (runner, flag) = runner();
        let err = runner.run(&argv(&["sh", "-c", "kill -INT $$; sleep 1"])).unwrap_err();
        assert!(err.is_cancelled());
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn signal_arriving_as_child_exits_does_not_cancel_next_command() {
        let interrupt = crate::signal_handler::install().expect("install handlers");
        let runner = ProcessRunner::new(Arc::clone(&interrupt));
        let err = runner
            .run(&argv(&["sh", "-c", "kill -INT $PPID; exit 1"]))
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!interrupt.load(Ordering::SeqCst));

        let out = runner.run(&argv(&["sh", "-c", "echo unmounted"])).unwrap();
        assert_eq!(out.stdout, "unmounted\n");
        assert_eq!(out.status, 0);
    }
}
