//! Scripted command runner and helpers shared by unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;
use std::time::Duration;

use crate::command::{CommandOutput, CommandRunner, Executor, RemoteLogin, RetryPolicy};
use crate::error::{BackupError, Result};
use crate::types::RunMode;

#[derive(Clone)]
enum Response {
    Output(CommandOutput),
    NotFound,
    Cancelled,
}

#[derive(Default)]
struct State {
    calls: Vec<Vec<String>>,
    rules: Vec<(String, Response)>,
    queue: VecDeque<Response>,
}

/// Records every argv it is asked to run. Rules registered with `on` answer
/// any command containing the needle; otherwise queued responses are used in
/// order, and an empty queue means success.
#[derive(Clone, Default)]
pub struct FakeRunner {
    state: Rc<RefCell<State>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.borrow().calls.clone()
    }

    pub fn joined_calls(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.join(" ")).collect()
    }

    pub fn push_output(&self, stdout: &str, stderr: &str, status: i32) {
        self.state.borrow_mut().queue.push_back(Response::Output(CommandOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            status,
        }));
    }

    pub fn push_status(&self, status: i32) {
        self.push_output("", "", status);
    }

    pub fn push_not_found(&self) {
        self.state.borrow_mut().queue.push_back(Response::NotFound);
    }

    pub fn on(&self, needle: &str, stdout: &str, status: i32) {
        self.state.borrow_mut().rules.push((
            needle.to_string(),
            Response::Output(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                status,
            }),
        ));
    }

    pub fn cancel_on(&self, needle: &str) {
        self.state
            .borrow_mut()
            .rules
            .push((needle.to_string(), Response::Cancelled));
    }
}

impl CommandRunner for FakeRunner {
    fn run(&self, argv: &[String]) -> Result<CommandOutput> {
        let mut state = self.state.borrow_mut();
        state.calls.push(argv.to_vec());
        let joined = argv.join(" ");
        let ruled = state
            .rules
            .iter()
            .find(|(needle, _)| joined.contains(needle.as_str()))
            .map(|(_, response)| response.clone());
        let response = match ruled {
            Some(response) => response,
            None => state
                .queue
                .pop_front()
                .unwrap_or(Response::Output(CommandOutput::default())),
        };
        match response {
            Response::Output(output) => Ok(output),
            Response::NotFound => Err(BackupError::CommandNotFound {
                command: joined,
                source: io::Error::new(io::ErrorKind::NotFound, "not found"),
            }),
            Response::Cancelled => Err(BackupError::UserCancelled { command: joined }),
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingSleeper {
    sleeps: Rc<RefCell<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeper(&self) -> impl Fn(Duration) + 'static {
        let sleeps = Rc::clone(&self.sleeps);
        move |d| sleeps.borrow_mut().push(d)
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

pub fn remote_login() -> RemoteLogin {
    RemoteLogin {
        ssh_path: "/usr/bin/ssh".to_string(),
        port: 22,
        user: "root".to_string(),
    }
}

/// Executor over `runner` with a 7 second retry interval that never sleeps.
pub fn executor_with(runner: &FakeRunner, max_retries: u32) -> Executor {
    Executor::new(
        Box::new(runner.clone()),
        remote_login(),
        RetryPolicy {
            max_retries,
            interval: Duration::from_secs(7),
        },
        RunMode::default(),
    )
    .with_sleeper(|_| {})
}
