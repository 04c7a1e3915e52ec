//! In-memory collaborator fakes.
//!
//! Used by the pipeline crates' tests to assert ordering guarantees
//! (smoke before cutover, proxy untouched until cutover) and to script
//! failures at specific stages. Each fake records the calls made against
//! it; failures are injected by operation key (`"reload"`,
//! `"start_unit:shopfront-api-green"`).

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::database::DatabaseEngine;
use crate::error::{ExecError, ExecResult};
use crate::proxy::ReverseProxy;
use crate::runtime::{ContainerRuntime, StartSpec, UnitInstance, UnitState};

fn injected(key: &str) -> ExecError {
    ExecError::Failed {
        command: key.to_string(),
        status: 1,
        stderr: "injected failure".to_string(),
    }
}

// ── Container runtime ──────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FakeUnit {
    image: String,
    state: UnitState,
}

#[derive(Debug, Default)]
struct RuntimeState {
    units: BTreeMap<String, FakeUnit>,
    images: BTreeSet<String>,
    calls: Vec<String>,
    fail: BTreeSet<String>,
}

/// Scriptable in-memory container runtime.
#[derive(Debug, Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a unit as already existing.
    pub fn with_unit(self, name: &str, image: &str, running: bool) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.units.insert(
                name.to_string(),
                FakeUnit {
                    image: image.to_string(),
                    state: if running {
                        UnitState::Running
                    } else {
                        UnitState::Exited
                    },
                },
            );
            state.images.insert(image.to_string());
        }
        self
    }

    /// Make calls matching `key` fail (either a bare op name like
    /// `"pull_image"` or an op:arg pair like `"start_unit:api-green"`).
    pub fn fail_on(&self, key: &str) {
        self.state.lock().unwrap().fail.insert(key.to_string());
    }

    /// All calls recorded so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Image reference a unit currently runs, if the unit exists.
    pub fn unit_image(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .units
            .get(name)
            .map(|u| u.image.clone())
    }

    /// Whether an image tag exists.
    pub fn has_image(&self, image: &str) -> bool {
        self.state.lock().unwrap().images.contains(image)
    }

    fn check(&self, op: &str, arg: &str) -> ExecResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("{op}:{arg}"));
        let keyed = format!("{op}:{arg}");
        if state.fail.contains(op) || state.fail.contains(&keyed) {
            return Err(injected(&keyed));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_units(&self, prefix: &str) -> ExecResult<Vec<UnitInstance>> {
        self.check("list_units", prefix)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .units
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, unit)| UnitInstance {
                name: name.clone(),
                image: unit.image.clone(),
                state: unit.state,
            })
            .collect())
    }

    async fn unit_state(&self, name: &str) -> ExecResult<UnitState> {
        self.check("unit_state", name)?;
        let state = self.state.lock().unwrap();
        Ok(state
            .units
            .get(name)
            .map(|u| u.state)
            .unwrap_or(UnitState::Missing))
    }

    async fn pull_image(&self, image: &str) -> ExecResult<()> {
        self.check("pull_image", image)?;
        self.state.lock().unwrap().images.insert(image.to_string());
        Ok(())
    }

    async fn tag_image(&self, source: &str, target: &str) -> ExecResult<()> {
        self.check("tag_image", &format!("{source}->{target}"))?;
        self.state.lock().unwrap().images.insert(target.to_string());
        Ok(())
    }

    async fn remove_image(&self, image: &str) -> ExecResult<()> {
        self.check("remove_image", image)?;
        self.state.lock().unwrap().images.remove(image);
        Ok(())
    }

    async fn stop_unit(&self, name: &str) -> ExecResult<()> {
        self.check("stop_unit", name)?;
        let mut state = self.state.lock().unwrap();
        if let Some(unit) = state.units.get_mut(name) {
            unit.state = UnitState::Exited;
        }
        Ok(())
    }

    async fn remove_unit(&self, name: &str) -> ExecResult<()> {
        self.check("remove_unit", name)?;
        self.state.lock().unwrap().units.remove(name);
        Ok(())
    }

    async fn rename_unit(&self, name: &str, new_name: &str) -> ExecResult<()> {
        self.check("rename_unit", &format!("{name}->{new_name}"))?;
        let mut state = self.state.lock().unwrap();
        if let Some(unit) = state.units.remove(name) {
            state.units.insert(new_name.to_string(), unit);
        }
        Ok(())
    }

    async fn start_unit(&self, spec: &StartSpec) -> ExecResult<()> {
        self.check("start_unit", &spec.name)?;
        self.state.lock().unwrap().units.insert(
            spec.name.clone(),
            FakeUnit {
                image: spec.image.clone(),
                state: UnitState::Running,
            },
        );
        Ok(())
    }

    async fn exec_in(
        &self,
        container: &str,
        command: &[String],
        _timeout: Duration,
    ) -> ExecResult<String> {
        self.check("exec_in", &format!("{container}:{}", command.join(" ")))?;
        Ok(String::new())
    }

    async fn archive_volume(&self, volume: &str, dest: &Path) -> ExecResult<()> {
        self.check("archive_volume", volume)?;
        std::fs::write(dest, b"fake volume archive").map_err(|source| ExecError::Io {
            command: format!("archive_volume {volume}"),
            source,
        })?;
        Ok(())
    }

    async fn restore_volume(&self, volume: &str, src: &Path) -> ExecResult<()> {
        self.check("restore_volume", volume)?;
        if !src.exists() {
            return Err(ExecError::Output {
                command: format!("restore_volume {volume}"),
                detail: format!("missing archive {}", src.display()),
            });
        }
        Ok(())
    }
}

// ── Reverse proxy ──────────────────────────────────────────────────

#[derive(Debug, Default)]
struct ProxyState {
    calls: Vec<String>,
    fail_validate: bool,
    fail_reloads: u32,
}

/// Scriptable in-memory reverse proxy.
#[derive(Debug, Default)]
pub struct FakeProxy {
    state: Mutex<ProxyState>,
}

impl FakeProxy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make config validation fail.
    pub fn fail_validation(&self) {
        self.state.lock().unwrap().fail_validate = true;
    }

    /// Make the next `n` reload calls fail.
    pub fn fail_next_reloads(&self, n: u32) {
        self.state.lock().unwrap().fail_reloads = n;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of reloads attempted.
    pub fn reload_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| *c == "reload")
            .count()
    }
}

#[async_trait]
impl ReverseProxy for FakeProxy {
    async fn validate_config(&self) -> ExecResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("validate_config".to_string());
        if state.fail_validate {
            return Err(injected("validate_config"));
        }
        Ok(())
    }

    async fn reload(&self) -> ExecResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("reload".to_string());
        if state.fail_reloads > 0 {
            state.fail_reloads -= 1;
            return Err(injected("reload"));
        }
        Ok(())
    }
}

// ── Database engine ────────────────────────────────────────────────

#[derive(Debug)]
struct DatabaseState {
    dump: Vec<u8>,
    calls: Vec<String>,
    fail: BTreeSet<String>,
}

/// Scriptable in-memory database engine.
#[derive(Debug)]
pub struct FakeDatabase {
    state: Mutex<DatabaseState>,
}

impl Default for FakeDatabase {
    fn default() -> Self {
        // A plausible dump: comfortably above the corruption floor.
        Self {
            state: Mutex::new(DatabaseState {
                dump: vec![b'-'; 512],
                calls: Vec::new(),
                fail: BTreeSet::new(),
            }),
        }
    }
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the bytes the next dump produces.
    pub fn with_dump(self, dump: Vec<u8>) -> Self {
        self.state.lock().unwrap().dump = dump;
        self
    }

    /// Make an operation (`"dump_to"`, `"restore_from"`, ...) fail.
    pub fn fail_on(&self, op: &str) {
        self.state.lock().unwrap().fail.insert(op.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn check(&self, op: &str) -> ExecResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(op.to_string());
        if state.fail.contains(op) {
            return Err(injected(op));
        }
        Ok(())
    }
}

#[async_trait]
impl DatabaseEngine for FakeDatabase {
    async fn dump_to(&self, path: &Path) -> ExecResult<u64> {
        self.check("dump_to")?;
        let dump = self.state.lock().unwrap().dump.clone();
        std::fs::write(path, &dump).map_err(|source| ExecError::Io {
            command: "dump_to".to_string(),
            source,
        })?;
        Ok(dump.len() as u64)
    }

    async fn drop_database(&self) -> ExecResult<()> {
        self.check("drop_database")
    }

    async fn create_database(&self) -> ExecResult<()> {
        self.check("create_database")
    }

    async fn restore_from(&self, path: &Path) -> ExecResult<()> {
        self.check("restore_from")?;
        if !path.exists() {
            return Err(ExecError::Output {
                command: "restore_from".to_string(),
                detail: format!("missing dump {}", path.display()),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_runtime_tracks_lifecycle() {
        let runtime = FakeRuntime::new().with_unit("api", "r/api:v1", true);

        runtime.stop_unit("api").await.unwrap();
        assert_eq!(runtime.unit_state("api").await.unwrap(), UnitState::Exited);

        runtime
            .start_unit(&StartSpec {
                name: "api".to_string(),
                image: "r/api:v2".to_string(),
                port: 8080,
            })
            .await
            .unwrap();
        assert_eq!(runtime.unit_image("api").unwrap(), "r/api:v2");
    }

    #[tokio::test]
    async fn fake_runtime_injects_failures() {
        let runtime = FakeRuntime::new();
        runtime.fail_on("pull_image");
        assert!(runtime.pull_image("r/api:v2").await.is_err());

        runtime.fail_on("start_unit:api-green");
        assert!(
            runtime
                .start_unit(&StartSpec {
                    name: "api-green".to_string(),
                    image: "r/api:v2".to_string(),
                    port: 1,
                })
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn fake_proxy_fails_scripted_reloads() {
        let proxy = FakeProxy::new();
        proxy.fail_next_reloads(1);
        assert!(proxy.reload().await.is_err());
        assert!(proxy.reload().await.is_ok());
        assert_eq!(proxy.reload_count(), 2);
    }

    #[tokio::test]
    async fn fake_database_writes_dump() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.dump");
        let db = FakeDatabase::new();
        let size = db.dump_to(&path).await.unwrap();
        assert_eq!(size, 512);
        assert!(path.exists());
    }
}
