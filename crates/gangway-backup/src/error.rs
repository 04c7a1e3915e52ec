//! Error types for the backup manager.

use thiserror::Error;

/// Result type alias for backup operations.
pub type BackupResult<T> = Result<T, BackupError>;

/// Errors that can occur while creating, restoring, or pruning backups.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup {0} is not restorable: metadata missing")]
    NotRestorable(String),

    #[error("database dump implausibly small ({size} bytes); refusing to keep it")]
    DumpTooSmall { size: u64 },

    #[error("no unit config matches instance {0}")]
    UnknownUnit(String),

    #[error("target declares a database but no engine is wired")]
    NoEngine,

    #[error("collaborator call failed: {0}")]
    Exec(#[from] gangway_exec::ExecError),

    #[error("i/o error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),
}

impl BackupError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        BackupError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
