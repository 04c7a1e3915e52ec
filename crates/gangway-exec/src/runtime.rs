//! Container runtime client.
//!
//! The [`ContainerRuntime`] trait is the only way the pipeline touches
//! workload containers. [`DockerRuntime`] implements it by shelling out to
//! the docker CLI with bounded timeouts.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{ExecError, ExecResult};
use crate::process::run_with_timeout;

/// Lifecycle state of a workload unit as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Running,
    Exited,
    /// No container with that name exists.
    Missing,
    /// Created / paused / restarting / dead — anything else.
    Other,
}

impl UnitState {
    fn parse(s: &str) -> UnitState {
        match s {
            "running" => UnitState::Running,
            "exited" => UnitState::Exited,
            "" => UnitState::Missing,
            _ => UnitState::Other,
        }
    }
}

/// One workload unit as listed by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInstance {
    pub name: String,
    /// Image reference the container was created from (including tag).
    pub image: String,
    pub state: UnitState,
}

/// Parameters for starting a new workload unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartSpec {
    pub name: String,
    /// Full image reference including tag.
    pub image: String,
    /// Published port (host and container side).
    pub port: u16,
}

/// Synchronous request/response surface over the container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List units whose names start with `prefix` (running or not).
    async fn list_units(&self, prefix: &str) -> ExecResult<Vec<UnitInstance>>;

    /// Current state of a single named unit.
    async fn unit_state(&self, name: &str) -> ExecResult<UnitState>;

    /// Pull an image reference.
    async fn pull_image(&self, image: &str) -> ExecResult<()>;

    /// Tag `source` as `target` without touching `source`.
    async fn tag_image(&self, source: &str, target: &str) -> ExecResult<()>;

    /// Remove an image tag.
    async fn remove_image(&self, image: &str) -> ExecResult<()>;

    /// Stop a unit. Stopping an already-stopped unit is not an error.
    async fn stop_unit(&self, name: &str) -> ExecResult<()>;

    /// Remove a (stopped) unit.
    async fn remove_unit(&self, name: &str) -> ExecResult<()>;

    /// Rename a unit, freeing its name for a replacement.
    async fn rename_unit(&self, name: &str, new_name: &str) -> ExecResult<()>;

    /// Start a new unit from the given spec.
    async fn start_unit(&self, spec: &StartSpec) -> ExecResult<()>;

    /// Run a command inside a running unit, returning its stdout.
    async fn exec_in(
        &self,
        container: &str,
        command: &[String],
        timeout: Duration,
    ) -> ExecResult<String>;

    /// Archive a named volume's contents into a tar.gz at `dest`.
    async fn archive_volume(&self, volume: &str, dest: &Path) -> ExecResult<()>;

    /// Replace a named volume's contents from a tar.gz at `src`.
    async fn restore_volume(&self, volume: &str, src: &Path) -> ExecResult<()>;
}

/// Docker CLI implementation.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
    timeout: Duration,
    /// Longer bound for pulls and volume archive jobs.
    slow_timeout: Duration,
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
            timeout: Duration::from_secs(60),
            slow_timeout: Duration::from_secs(300),
        }
    }
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the docker binary (e.g. "podman").
    pub fn with_binary(mut self, binary: &str) -> Self {
        self.binary = binary.to_string();
        self
    }

    async fn docker(&self, args: &[&str], timeout: Duration) -> ExecResult<String> {
        let out = run_with_timeout(&self.binary, args, None, timeout).await?;
        Ok(out.stdout_str())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_units(&self, prefix: &str) -> ExecResult<Vec<UnitInstance>> {
        let filter = format!("name={prefix}");
        let stdout = self
            .docker(
                &[
                    "ps",
                    "-a",
                    "--filter",
                    &filter,
                    "--format",
                    "{{.Names}}|{{.Image}}|{{.State}}",
                ],
                self.timeout,
            )
            .await?;

        let mut units = Vec::new();
        for line in stdout.lines().filter(|l| !l.is_empty()) {
            let mut parts = line.splitn(3, '|');
            let (name, image, state) = match (parts.next(), parts.next(), parts.next()) {
                (Some(n), Some(i), Some(s)) => (n, i, s),
                _ => {
                    return Err(ExecError::Output {
                        command: "docker ps".to_string(),
                        detail: format!("unparseable line: {line:?}"),
                    });
                }
            };
            // Docker's name filter is a substring match; anchor it here.
            if !name.starts_with(prefix) {
                continue;
            }
            units.push(UnitInstance {
                name: name.to_string(),
                image: image.to_string(),
                state: UnitState::parse(state),
            });
        }
        Ok(units)
    }

    async fn unit_state(&self, name: &str) -> ExecResult<UnitState> {
        let units = self.list_units(name).await?;
        Ok(units
            .into_iter()
            .find(|u| u.name == name)
            .map(|u| u.state)
            .unwrap_or(UnitState::Missing))
    }

    async fn pull_image(&self, image: &str) -> ExecResult<()> {
        info!(%image, "pulling image");
        self.docker(&["pull", image], self.slow_timeout).await?;
        Ok(())
    }

    async fn tag_image(&self, source: &str, target: &str) -> ExecResult<()> {
        debug!(%source, %target, "tagging image");
        self.docker(&["tag", source, target], self.timeout).await?;
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> ExecResult<()> {
        self.docker(&["rmi", image], self.timeout).await?;
        Ok(())
    }

    async fn stop_unit(&self, name: &str) -> ExecResult<()> {
        info!(unit = %name, "stopping unit");
        match self.docker(&["stop", name], self.timeout).await {
            Ok(_) => Ok(()),
            // Stopping a missing container is idempotent from the pipeline's
            // point of view.
            Err(ExecError::Failed { stderr, .. }) if stderr.contains("No such container") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn remove_unit(&self, name: &str) -> ExecResult<()> {
        debug!(unit = %name, "removing unit");
        match self.docker(&["rm", "-f", name], self.timeout).await {
            Ok(_) => Ok(()),
            Err(ExecError::Failed { stderr, .. }) if stderr.contains("No such container") => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn rename_unit(&self, name: &str, new_name: &str) -> ExecResult<()> {
        debug!(unit = %name, %new_name, "renaming unit");
        self.docker(&["rename", name, new_name], self.timeout).await?;
        Ok(())
    }

    async fn start_unit(&self, spec: &StartSpec) -> ExecResult<()> {
        info!(unit = %spec.name, image = %spec.image, "starting unit");
        let publish = format!("{0}:{0}", spec.port);
        self.docker(
            &[
                "run",
                "-d",
                "--name",
                &spec.name,
                "--restart",
                "unless-stopped",
                "-p",
                &publish,
                &spec.image,
            ],
            self.timeout,
        )
        .await?;
        Ok(())
    }

    async fn exec_in(
        &self,
        container: &str,
        command: &[String],
        timeout: Duration,
    ) -> ExecResult<String> {
        let mut args = vec!["exec", container];
        args.extend(command.iter().map(|s| s.as_str()));
        self.docker(&args, timeout).await
    }

    async fn archive_volume(&self, volume: &str, dest: &Path) -> ExecResult<()> {
        let (dir, file) = split_archive_path(dest)?;
        info!(%volume, dest = %dest.display(), "archiving volume");
        let data_mount = format!("{volume}:/data:ro");
        let backup_mount = format!("{dir}:/backup");
        let tar_cmd = format!("tar czf /backup/{file} -C /data .");
        self.docker(
            &[
                "run", "--rm", "-v", &data_mount, "-v", &backup_mount, "alpine", "sh", "-c",
                &tar_cmd,
            ],
            self.slow_timeout,
        )
        .await?;
        Ok(())
    }

    async fn restore_volume(&self, volume: &str, src: &Path) -> ExecResult<()> {
        let (dir, file) = split_archive_path(src)?;
        info!(%volume, src = %src.display(), "restoring volume");
        let data_mount = format!("{volume}:/data");
        let backup_mount = format!("{dir}:/backup:ro");
        let untar_cmd =
            format!("rm -rf /data/* /data/..?* /data/.[!.]* && tar xzf /backup/{file} -C /data");
        self.docker(
            &[
                "run", "--rm", "-v", &data_mount, "-v", &backup_mount, "alpine", "sh", "-c",
                &untar_cmd,
            ],
            self.slow_timeout,
        )
        .await?;
        Ok(())
    }
}

/// Split an archive path into (parent dir, file name) strings for mount args.
fn split_archive_path(path: &Path) -> ExecResult<(String, String)> {
    let dir = path
        .parent()
        .map(|p| p.display().to_string())
        .filter(|s| !s.is_empty());
    let file = path.file_name().map(|f| f.to_string_lossy().to_string());
    match (dir, file) {
        (Some(dir), Some(file)) => Ok((dir, file)),
        _ => Err(ExecError::Output {
            command: "archive".to_string(),
            detail: format!("archive path has no parent/file name: {}", path.display()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_state_parsing() {
        assert_eq!(UnitState::parse("running"), UnitState::Running);
        assert_eq!(UnitState::parse("exited"), UnitState::Exited);
        assert_eq!(UnitState::parse(""), UnitState::Missing);
        assert_eq!(UnitState::parse("paused"), UnitState::Other);
    }

    #[test]
    fn split_archive_path_works() {
        let (dir, file) = split_archive_path(Path::new("/backups/stage/vol-a.tar.gz")).unwrap();
        assert_eq!(dir, "/backups/stage");
        assert_eq!(file, "vol-a.tar.gz");
    }

    #[test]
    fn split_archive_path_rejects_bare_root() {
        assert!(split_archive_path(Path::new("/")).is_err());
    }
}
