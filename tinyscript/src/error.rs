// Script error types
//
// Syntax errors carry the offending position; runtime errors carry the thrown value.

use crate::value::Value;
use thiserror::Error;

pub type ScriptResult<T> = Result<T, ScriptError>;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("SyntaxError: {message} (line {line}, column {column})")]
pub struct SyntaxError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl SyntaxError {
    pub fn new(line: u32, column: u32, message: impl Into<String>) -> Self {
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

/// Outcome of an evaluation that did not complete normally
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    #[error(transparent)]
    Syntax(#[from] SyntaxError),

    #[error("Uncaught {message}")]
    Thrown {
        value: Value,
        message: String,
        line: u32,
        backtrace: Vec<String>,
    },

    #[error("Evaluation aborted")]
    Aborted,
}

impl ScriptError {
    /// Line at which the error was raised, if known
    pub fn line(&self) -> Option<u32> {
        match self {
            ScriptError::Syntax(e) => Some(e.line),
            ScriptError::Thrown { line, .. } => Some(*line),
            ScriptError::Aborted => None,
        }
    }
}
