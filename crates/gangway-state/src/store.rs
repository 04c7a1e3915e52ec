//! StateStore — file-backed state persistence for one target.
//!
//! Values are JSON files under `{state_dir}/{name}/{environment}/`. Every
//! write lands in a temp file in the same directory and is renamed into
//! place; rename is atomic on the filesystems we care about, so a reader
//! sees either the old value or the new one, never a torn write.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::lock::DeployLock;
use crate::types::{DeploymentManifest, DeploymentRecord, SlotPointer};

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Per-target state store.
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    /// Open (creating directories as needed) the state store for one target.
    pub fn open(state_dir: &Path, name: &str, environment: &str) -> StateResult<Self> {
        let dir = state_dir.join(name).join(environment);
        fs::create_dir_all(&dir).map_err(map_err!(Create))?;
        debug!(dir = %dir.display(), "state store opened");
        Ok(Self { dir })
    }

    /// Directory holding this target's state files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join("manifest.json")
    }

    fn slot_path(&self) -> PathBuf {
        self.dir.join("active_slot.json")
    }

    /// Write a JSON value to `path` via temp-file-then-rename.
    fn install_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> StateResult<()> {
        let data = serde_json::to_vec_pretty(value).map_err(map_err!(Serialize))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &data).map_err(map_err!(Write))?;
        fs::rename(&tmp, path).map_err(map_err!(Write))?;
        Ok(())
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, path: &Path) -> StateResult<Option<T>> {
        match fs::read(path) {
            Ok(data) => {
                let value = serde_json::from_slice(&data).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::Read(e.to_string())),
        }
    }

    // ── Manifest ───────────────────────────────────────────────────

    /// Load the deployment manifest. A target that has never deployed gets
    /// an empty manifest.
    pub fn load_manifest(&self) -> StateResult<DeploymentManifest> {
        Ok(self.read_json(&self.manifest_path())?.unwrap_or_default())
    }

    /// Record a successful deployment: rotate `current` into history and
    /// install the new record. Called only after cutover succeeds.
    pub fn record_success(&self, record: DeploymentRecord) -> StateResult<DeploymentManifest> {
        let mut manifest = self.load_manifest()?;
        manifest.record_success(record);
        self.install_json(&self.manifest_path(), &manifest)?;
        debug!(dir = %self.dir.display(), "manifest updated");
        Ok(manifest)
    }

    // ── Active slot pointer ────────────────────────────────────────

    /// Read the active slot pointer. Missing file means blue at version 0.
    pub fn read_slot(&self) -> StateResult<SlotPointer> {
        Ok(self.read_json(&self.slot_path())?.unwrap_or_default())
    }

    /// Compare-and-swap the slot pointer.
    ///
    /// `expected` must match what is currently on disk; the new pointer is
    /// installed at `expected.version + 1`. A mismatch means another writer
    /// got there first and is reported as a conflict, never overwritten.
    pub fn swap_slot(
        &self,
        expected: SlotPointer,
        new_slot: crate::types::ActiveSlot,
    ) -> StateResult<SlotPointer> {
        let on_disk = self.read_slot()?;
        if on_disk != expected {
            return Err(StateError::Conflict(format!(
                "expected {}@v{}, found {}@v{}",
                expected.slot, expected.version, on_disk.slot, on_disk.version
            )));
        }
        let next = SlotPointer {
            slot: new_slot,
            version: expected.version + 1,
        };
        self.install_json(&self.slot_path(), &next)?;
        debug!(slot = %next.slot, version = next.version, "slot pointer swapped");
        Ok(next)
    }

    // ── Deploy lock ────────────────────────────────────────────────

    /// Acquire the per-target deploy lock. Fails if a pipeline is already
    /// in flight for this target.
    pub fn acquire_lock(&self) -> StateResult<DeployLock> {
        DeployLock::acquire(&self.dir.join("deploy.lock"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ActiveSlot, HISTORY_CAP};
    use std::collections::BTreeMap;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path(), "shopfront", "production").unwrap();
        (dir, store)
    }

    fn record(tag: &str) -> DeploymentRecord {
        DeploymentRecord {
            images: BTreeMap::from([("api".to_string(), format!("r/api:{tag}"))]),
            deployed_at: 42,
            operator: "ops".to_string(),
            source_revision: Some("abc123".to_string()),
            backup_id: Some("shopfront-production-1".to_string()),
            db_backup: None,
        }
    }

    #[test]
    fn empty_manifest_for_fresh_target() {
        let (_dir, store) = store();
        let manifest = store.load_manifest().unwrap();
        assert!(manifest.current.is_none());
        assert!(manifest.history.is_empty());
    }

    #[test]
    fn record_success_persists() {
        let (_dir, store) = store();
        store.record_success(record("v1")).unwrap();
        store.record_success(record("v2")).unwrap();

        let manifest = store.load_manifest().unwrap();
        assert_eq!(manifest.current.unwrap().images["api"], "r/api:v2");
        assert_eq!(manifest.history.len(), 1);
        assert_eq!(manifest.history[0].images["api"], "r/api:v1");
    }

    #[test]
    fn history_bounded_across_reloads() {
        let (_dir, store) = store();
        for i in 0..HISTORY_CAP + 5 {
            store.record_success(record(&format!("v{i}"))).unwrap();
        }
        let manifest = store.load_manifest().unwrap();
        assert_eq!(manifest.history.len(), HISTORY_CAP);
    }

    #[test]
    fn no_temp_file_left_behind() {
        let (_dir, store) = store();
        store.record_success(record("v1")).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn missing_slot_reads_as_blue_v0() {
        let (_dir, store) = store();
        assert_eq!(store.read_slot().unwrap(), SlotPointer::default());
    }

    #[test]
    fn swap_slot_increments_version() {
        let (_dir, store) = store();
        let current = store.read_slot().unwrap();
        let next = store.swap_slot(current, ActiveSlot::Green).unwrap();
        assert_eq!(next.slot, ActiveSlot::Green);
        assert_eq!(next.version, 1);
        assert_eq!(store.read_slot().unwrap(), next);
    }

    #[test]
    fn swap_slot_detects_conflict() {
        let (_dir, store) = store();
        let stale = store.read_slot().unwrap();
        store.swap_slot(stale, ActiveSlot::Green).unwrap();

        // A second writer holding the stale pointer must be rejected.
        let result = store.swap_slot(stale, ActiveSlot::Green);
        assert!(matches!(result, Err(StateError::Conflict(_))));
        assert_eq!(store.read_slot().unwrap().slot, ActiveSlot::Green);
    }

    #[test]
    fn lock_blocks_second_acquire() {
        let (_dir, store) = store();
        let _lock = store.acquire_lock().unwrap();
        assert!(matches!(store.acquire_lock(), Err(StateError::LockHeld(_))));
    }

    #[test]
    fn lock_released_on_drop() {
        let (_dir, store) = store();
        drop(store.acquire_lock().unwrap());
        assert!(store.acquire_lock().is_ok());
    }
}
