//! Error types shared across vpnsync.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by vpnsync-core.
#[derive(Error, Debug)]
pub enum Error {
    #[error("config file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    #[error("invalid configuration:\n  {}", .0.join("\n  "))]
    ConfigValidation(Vec<String>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// The connection manager could not answer a query.
    #[error("connection manager error: {0}")]
    Manager(String),

    /// A connect/disconnect command for `target` failed.
    #[error("failed to {action} '{target}': {failure}")]
    Command {
        action: &'static str,
        target: String,
        failure: CommandFailure,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a command runner: exit status (if the process ran)
/// plus stderr or spawn error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub status: Option<i32>,
    pub message: String,
}

impl CommandFailure {
    pub fn new(status: Option<i32>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Failure of a process that could not be started at all.
    pub fn spawn(message: impl Into<String>) -> Self {
        Self::new(None, message)
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = self.message.trim();
        match (self.status, message.is_empty()) {
            (Some(code), true) => write!(f, "exited with status {}", code),
            (Some(code), false) => write!(f, "{} (exit status {})", message, code),
            (None, true) => f.write_str("unknown error"),
            (None, false) => f.write_str(message),
        }
    }
}

impl std::error::Error for CommandFailure {}
