//! Deploy lock — at most one in-flight pipeline per target.
//!
//! The lock is a file created with `create_new`, so acquisition is atomic
//! at the filesystem level and works across processes. The file records
//! pid and acquisition time for operator inspection when a deploy is
//! rejected as already in flight.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StateError, StateResult};

/// Contents of a deploy.lock file.
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    acquired_at: u64,
}

/// Held deploy lock. Released (file removed) on drop.
#[derive(Debug)]
pub struct DeployLock {
    path: PathBuf,
}

impl DeployLock {
    /// Try to acquire the lock at `path`.
    pub(crate) fn acquire(path: &Path) -> StateResult<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = std::fs::read_to_string(path).unwrap_or_default();
                return Err(StateError::LockHeld(format!(
                    "{} ({})",
                    path.display(),
                    holder.trim()
                )));
            }
            Err(e) => return Err(StateError::Write(e.to_string())),
        };

        let info = LockInfo {
            pid: std::process::id(),
            acquired_at: epoch_secs(),
        };
        let data = serde_json::to_string(&info).map_err(|e| StateError::Serialize(e.to_string()))?;
        file.write_all(data.as_bytes())
            .map_err(|e| StateError::Write(e.to_string()))?;

        debug!(path = %path.display(), pid = info.pid, "deploy lock acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DeployLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove deploy lock");
        } else {
            debug!(path = %self.path.display(), "deploy lock released");
        }
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
