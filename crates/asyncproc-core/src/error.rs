use crate::process::ProcessId;
use thiserror::Error;

/// Lifecycle violations reported by a managed process
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("process has not exited yet")]
    NotExited,

    #[error("process is not running")]
    NotRunning,

    #[error("process handle has been closed")]
    Closed,

    #[error("exit code is not available for this process")]
    NoExitCode,
}

/// Core error types for process operations
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Unable to find executable '{name}'")]
    Resolution { name: String },

    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid process state: {0}")]
    State(#[from] StateError),

    #[error("Output stream protocol violation: {0}")]
    StreamProtocolViolation(String),

    #[error("Not supported on this platform: {0}")]
    Unsupported(String),

    #[error("Process not found: {0}")]
    ProcessNotFound(ProcessId),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ProcessError {
    pub fn resolution(name: impl Into<String>) -> Self {
        ProcessError::Resolution { name: name.into() }
    }

    pub fn launch(program: impl Into<String>, source: std::io::Error) -> Self {
        ProcessError::Launch {
            program: program.into(),
            source,
        }
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        ProcessError::Unsupported(what.into())
    }

    /// Check if this error reports a lifecycle violation
    pub fn is_state_error(&self) -> bool {
        matches!(self, ProcessError::State(_))
    }

    /// Check if this error can only be caused by broken internal wiring
    pub fn is_programming_error(&self) -> bool {
        matches!(self, ProcessError::StreamProtocolViolation(_))
    }

    /// The lifecycle violation carried by this error, if any
    pub fn state(&self) -> Option<StateError> {
        match self {
            ProcessError::State(state) => Some(*state),
            _ => None,
        }
    }
}
