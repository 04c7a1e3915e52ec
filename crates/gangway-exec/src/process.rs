//! Timed process execution shared by the collaborator clients.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ExecError, ExecResult};

/// Captured output of a successful command.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    /// Stdout as trimmed UTF-8 (lossy).
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).trim().to_string()
    }
}

/// Run `program args..` with a deadline, optionally feeding `stdin_data`.
///
/// Non-zero exit is an error carrying stderr; exceeding the deadline kills
/// the child and reports a timeout.
pub async fn run_with_timeout(
    program: &str,
    args: &[&str],
    stdin_data: Option<&[u8]>,
    timeout: Duration,
) -> ExecResult<CommandOutput> {
    let rendered = render(program, args);
    debug!(command = %rendered, timeout_secs = timeout.as_secs(), "running command");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| ExecError::Spawn {
        command: rendered.clone(),
        source,
    })?;

    if let Some(data) = stdin_data {
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(data).await.map_err(|source| ExecError::Io {
                command: rendered.clone(),
                source,
            })?;
        }
    }

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ExecError::TimedOut {
            command: rendered.clone(),
            secs: timeout.as_secs(),
        })?
        .map_err(|source| ExecError::Io {
            command: rendered.clone(),
            source,
        })?;

    if !output.status.success() {
        return Err(ExecError::Failed {
            command: rendered,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(CommandOutput {
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

fn render(program: &str, args: &[&str]) -> String {
    let mut s = String::from(program);
    for arg in args {
        s.push(' ');
        s.push_str(arg);
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout() {
        let out = run_with_timeout("echo", &["hello"], None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout_str(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_failed() {
        let err = run_with_timeout("false", &[], None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Failed { status: 1, .. }));
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let err = run_with_timeout("definitely-not-a-binary", &[], None, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn deadline_is_enforced() {
        let err = run_with_timeout("sleep", &["5"], None, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn stdin_is_fed() {
        let out = run_with_timeout("cat", &[], Some(b"piped"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.stdout_str(), "piped");
    }
}
