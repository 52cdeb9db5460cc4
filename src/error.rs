use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("{0}")]
    Message(String),
    #[error("unable to execute/find {command}: {source}")]
    CommandNotFound {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error(
        "[{host}] a command terminated with exit status {status} and likely requires intervention; the command attempted was \"{command}\""
    )]
    NonZeroExitStatus {
        host: String,
        command: String,
        status: i32,
    },
    #[error("{0}")]
    ResourceState(String),
    #[error("cancelled by user while running \"{command}\"")]
    UserCancelled { command: String },
    #[error("hook {hook}: {source}")]
    HookFailed {
        hook: String,
        #[source]
        source: Box<BackupError>,
    },
    #[error("{}", join_errors(.0))]
    Multiple(Vec<BackupError>),
    #[error("no {phase} hook at index {index} (list has {len})")]
    HookIndex {
        phase: &'static str,
        index: usize,
        len: usize,
    },
    #[error("job {0} is already running")]
    AlreadyRunning(String),
    #[error("{0}")]
    Config(ConfigError),
    #[error("{0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parse config: {0}")]
    Parse(String),
    #[error("{0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, BackupError>;

impl BackupError {
    pub fn message(msg: impl Into<String>) -> Self {
        BackupError::Message(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        BackupError::Config(ConfigError::Invalid(msg.into()))
    }

    /// Folds a list of failures into a single error, or `Ok` when empty.
    pub fn collect(mut errors: Vec<BackupError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(BackupError::Multiple(errors)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            BackupError::UserCancelled { .. } => true,
            BackupError::HookFailed { source, .. } => source.is_cancelled(),
            BackupError::Multiple(errors) => errors.iter().any(|e| e.is_cancelled()),
            _ => false,
        }
    }
}

impl From<ConfigError> for BackupError {
    fn from(err: ConfigError) -> Self {
        BackupError::Config(err)
    }
}

fn join_errors(errors: &[BackupError]) -> String {
    let parts: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("{} failures: {}", errors.len(), parts.join("; "))
}
