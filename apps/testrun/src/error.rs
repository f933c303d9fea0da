//! Error type shared by the library modules.

use std::path::PathBuf;
use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read config {}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {message}", .path.display())]
    ConfigParse { path: PathBuf, message: String },

    #[error("invalid step name '{0}' (expected erase-coverage|tests|coverage-report|lint)")]
    UnknownStep(String),

    #[error("command is empty for {0}")]
    EmptyCommand(&'static str),

    #[error("invalid glob pattern '{pattern}'")]
    Glob {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("can't run command {command} in non-existent directory {}", .cwd.display())]
    MissingCwd { command: String, cwd: PathBuf },

    #[error("failed to start {command}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command {command} failed{}", .code.map(|c| format!(" with exit code {c}")).unwrap_or_default())]
    CommandFailed { command: String, code: Option<i32> },

    #[error("command {command} timed out after {}s", .elapsed.as_secs())]
    Timeout { command: String, elapsed: Duration },

    #[error("command {command} produced no output for {}s", .idle.as_secs())]
    OutputTimeout { command: String, idle: Duration },

    #[error("fixture server at {url} not ready after {}ms", .waited.as_millis())]
    NotReady { url: String, waited: Duration },

    #[error("fixture server exited before becoming ready{}", .code.map(|c| format!(" (exit code {c})")).unwrap_or_default())]
    ServerExited { code: Option<i32> },

    #[error("linter could not be run on {}", .file.display())]
    Linter {
        file: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Exit code of the failed child process, when one is known.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::CommandFailed { code, .. } => *code,
            _ => None,
        }
    }
}
