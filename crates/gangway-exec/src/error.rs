//! Error types for collaborator calls.

use thiserror::Error;

/// Result type alias for collaborator operations.
pub type ExecResult<T> = Result<T, ExecError>;

/// Errors from external collaborator calls.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} timed out after {secs}s")]
    TimedOut { command: String, secs: u64 },

    #[error("{command} exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("i/o error during {command}: {source}")]
    Io {
        command: String,
        source: std::io::Error,
    },

    #[error("unexpected output from {command}: {detail}")]
    Output { command: String, detail: String },
}
