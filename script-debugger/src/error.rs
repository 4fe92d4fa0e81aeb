// Debugger error types
//
// Every fallible operation in the crate returns DebugResult.

use thiserror::Error;

pub type DebugResult<T> = Result<T, DebuggerError>;

#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("Engine is currently executing, not interrupted")]
    EngineUnavailable,

    #[error("Script is not running")]
    NotRunning,

    #[error("Script is not interrupted")]
    NotInterrupted,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("No breakpoint at {file}:{line}")]
    UnknownBreakpoint { file: String, line: u32 },

    #[error("Script worker thread is gone")]
    WorkerGone,

    #[error("Job was cancelled before it completed")]
    JobCancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DebuggerError {
    /// True for errors caused by the caller's input rather than debugger state
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            DebuggerError::InvalidCommand(_) | DebuggerError::UnknownBreakpoint { .. }
        )
    }
}
