//! BackupManager — create, restore, list, and prune backups.
//!
//! Layout under the backup root:
//!
//! ```text
//! {root}/{target}/{environment}/
//!     {backup_id}/
//!         backup.json          # metadata, written last
//!         config.tar.gz
//!         db.dump              # optional
//!         volumes/{vol}.tar.gz
//!     .staging-{backup_id}/    # in-progress build, renamed on completion
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use gangway_core::TargetConfig;
use gangway_exec::{ContainerRuntime, DatabaseEngine, StartSpec, UnitState};

use crate::archive;
use crate::error::{BackupError, BackupResult};
use crate::meta::{BackupMeta, DB_DUMP_FILE, META_FILE};

/// Dumps below this size are treated as corrupt and fail the backup.
const MIN_DUMP_BYTES: u64 = 100;

/// Creates and restores point-in-time snapshots for a target.
pub struct BackupManager {
    root: PathBuf,
    runtime: Arc<dyn ContainerRuntime>,
    database: Option<Arc<dyn DatabaseEngine>>,
}

impl BackupManager {
    pub fn new(
        root: PathBuf,
        runtime: Arc<dyn ContainerRuntime>,
        database: Option<Arc<dyn DatabaseEngine>>,
    ) -> Self {
        Self {
            root,
            runtime,
            database,
        }
    }

    fn target_dir(&self, config: &TargetConfig) -> PathBuf {
        self.root
            .join(&config.target.name)
            .join(&config.target.environment)
    }

    fn backup_dir(&self, config: &TargetConfig, id: &str) -> PathBuf {
        self.target_dir(config).join(id)
    }

    // ── Create ─────────────────────────────────────────────────────

    /// Snapshot the target's recoverable state. Returns the completed
    /// metadata; on any failure the staging directory is removed and no
    /// metadata exists.
    pub async fn create_backup(
        &self,
        config: &TargetConfig,
        operator: &str,
    ) -> BackupResult<BackupMeta> {
        let base = format!(
            "{}-{}-{}",
            config.target.name,
            config.target.environment,
            epoch_secs()
        );
        let target_dir = self.target_dir(config);
        fs::create_dir_all(&target_dir).map_err(|e| BackupError::io(&target_dir, e))?;

        // Two backups in the same second get distinct ids.
        let mut id = base.clone();
        let mut n = 1;
        while target_dir.join(&id).exists() {
            n += 1;
            id = format!("{base}-{n}");
        }

        let staging = target_dir.join(format!(".staging-{id}"));
        info!(backup_id = %id, "creating backup");

        match self.stage_backup(config, operator, &id, &staging).await {
            Ok(meta) => {
                let final_dir = self.backup_dir(config, &id);
                fs::rename(&staging, &final_dir).map_err(|e| BackupError::io(&final_dir, e))?;
                info!(backup_id = %id, dir = %final_dir.display(), "backup complete");
                Ok(meta)
            }
            Err(e) => {
                if staging.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&staging) {
                        warn!(backup_id = %id, error = %cleanup, "failed to remove staging dir");
                    }
                }
                Err(e)
            }
        }
    }

    /// Build all backup artifacts in `staging`, metadata last.
    async fn stage_backup(
        &self,
        config: &TargetConfig,
        operator: &str,
        id: &str,
        staging: &Path,
    ) -> BackupResult<BackupMeta> {
        let volumes_dir = staging.join("volumes");
        fs::create_dir_all(&volumes_dir).map_err(|e| BackupError::io(&volumes_dir, e))?;

        // Tag every running unit's current image with the backup id. The
        // original tag is untouched.
        let mut images = BTreeMap::new();
        let mut backup_tags = BTreeMap::new();
        for unit in &config.units {
            let instances = self.runtime.list_units(&unit.name).await?;
            let running = instances.iter().find(|i| {
                i.state == UnitState::Running
                    && (i.name == unit.name || i.name.starts_with(&format!("{}-", unit.name)))
            });
            let Some(instance) = running else {
                continue;
            };
            let backup_tag = format!("{}:backup-{id}", unit.image);
            self.runtime.tag_image(&instance.image, &backup_tag).await?;
            images.insert(instance.name.clone(), instance.image.clone());
            backup_tags.insert(instance.name.clone(), backup_tag);
        }

        for volume in &config.target.volumes {
            let dest = volumes_dir.join(format!("{volume}.tar.gz"));
            self.runtime.archive_volume(volume, &dest).await?;
        }

        archive::create_tar_gz(&config.target.config_dir, &staging.join("config.tar.gz"))?;

        let mut db_dump = None;
        if config.database.is_some() {
            let engine = self.database.as_ref().ok_or(BackupError::NoEngine)?;
            let dump_path = staging.join(DB_DUMP_FILE);
            let size = engine.dump_to(&dump_path).await?;
            if size < MIN_DUMP_BYTES {
                return Err(BackupError::DumpTooSmall { size });
            }
            db_dump = Some(DB_DUMP_FILE.to_string());
        }

        // Metadata goes in last: its presence marks the backup complete.
        let meta = BackupMeta {
            id: id.to_string(),
            target: config.target.name.clone(),
            environment: config.target.environment.clone(),
            created_at: epoch_secs(),
            created_by: operator.to_string(),
            images,
            backup_tags,
            volumes: config.target.volumes.clone(),
            has_config: true,
            db_dump,
        };
        write_meta(&staging.join(META_FILE), &meta)?;
        Ok(meta)
    }

    // ── Restore ────────────────────────────────────────────────────

    /// Restore the target to the state captured by `id`.
    ///
    /// Refuses to start when the backup's metadata is missing; no partial
    /// restore is attempted.
    pub async fn restore_backup(
        &self,
        config: &TargetConfig,
        id: &str,
    ) -> BackupResult<BackupMeta> {
        let dir = self.backup_dir(config, id);
        let meta_path = dir.join(META_FILE);
        if !meta_path.exists() {
            return Err(BackupError::NotRestorable(id.to_string()));
        }
        let meta = read_meta(&meta_path)?;
        info!(backup_id = %id, "restoring backup");

        // Stop current units first. They are recreated, not merely
        // restarted, because their image references are about to change.
        for instance in meta.images.keys() {
            self.runtime.stop_unit(instance).await?;
        }

        for (instance, original_ref) in &meta.images {
            let backup_tag = meta
                .backup_tags
                .get(instance)
                .ok_or_else(|| BackupError::NotRestorable(format!("{id}: no tag for {instance}")))?;
            self.runtime.tag_image(backup_tag, original_ref).await?;
        }

        for volume in &meta.volumes {
            let src = dir.join("volumes").join(format!("{volume}.tar.gz"));
            self.runtime.restore_volume(volume, &src).await?;
        }

        if meta.has_config {
            archive::replace_dir_from_tar_gz(
                &dir.join("config.tar.gz"),
                &config.target.config_dir,
            )?;
        }

        if let Some(dump) = &meta.db_dump {
            let engine = self.database.as_ref().ok_or(BackupError::NoEngine)?;
            engine.drop_database().await?;
            engine.create_database().await?;
            engine.restore_from(&dir.join(dump)).await?;
        }

        for (instance, original_ref) in &meta.images {
            let unit = config
                .units
                .iter()
                .find(|u| {
                    *instance == u.name || instance.starts_with(&format!("{}-", u.name))
                })
                .ok_or_else(|| BackupError::UnknownUnit(instance.clone()))?;
            self.runtime.remove_unit(instance).await?;
            self.runtime
                .start_unit(&StartSpec {
                    name: instance.clone(),
                    image: original_ref.clone(),
                    port: unit.port,
                })
                .await?;
        }

        info!(backup_id = %id, "restore complete");
        Ok(meta)
    }

    // ── Metadata queries ───────────────────────────────────────────

    /// All complete backups for the target, newest first.
    pub fn list_backups(&self, config: &TargetConfig) -> BackupResult<Vec<BackupMeta>> {
        let target_dir = self.target_dir(config);
        let entries = match fs::read_dir(&target_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::io(&target_dir, e)),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| BackupError::io(&target_dir, e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(".staging-") || !entry.path().is_dir() {
                continue;
            }
            let meta_path = entry.path().join(META_FILE);
            if !meta_path.exists() {
                // Incomplete: a build that never finished. Invisible.
                continue;
            }
            backups.push(read_meta(&meta_path)?);
        }

        backups.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(backups)
    }

    /// The most recent complete backup, if any.
    pub fn latest_backup(&self, config: &TargetConfig) -> BackupResult<Option<BackupMeta>> {
        Ok(self.list_backups(config)?.into_iter().next())
    }

    /// Whether a backup id resolves to a complete backup on disk.
    pub fn backup_exists(&self, config: &TargetConfig, id: &str) -> bool {
        self.backup_dir(config, id).join(META_FILE).exists()
    }

    /// Remove every backup older than `retention_days`. Metadata goes
    /// first, then the artifacts, so a cleanup interrupted partway never
    /// leaves a listed-but-gutted backup. Returns the number removed.
    pub async fn cleanup_old_backups(
        &self,
        config: &TargetConfig,
        retention_days: u64,
    ) -> BackupResult<usize> {
        let now = epoch_secs();
        let mut removed = 0;

        for meta in self.list_backups(config)? {
            let expired = meta.created_at + retention_days * 86_400 < now;
            if !expired {
                continue;
            }

            let dir = self.backup_dir(config, &meta.id);
            fs::remove_file(dir.join(META_FILE)).map_err(|e| BackupError::io(&dir, e))?;
            fs::remove_dir_all(&dir).map_err(|e| BackupError::io(&dir, e))?;

            for tag in meta.backup_tags.values() {
                if let Err(e) = self.runtime.remove_image(tag).await {
                    warn!(backup_id = %meta.id, %tag, error = %e, "failed to remove backup tag");
                }
            }

            info!(backup_id = %meta.id, age_days = meta.age_days(now), "backup pruned");
            removed += 1;
        }
        Ok(removed)
    }
}

fn write_meta(path: &Path, meta: &BackupMeta) -> BackupResult<()> {
    let data =
        serde_json::to_vec_pretty(meta).map_err(|e| BackupError::Serialize(e.to_string()))?;
    fs::write(path, data).map_err(|e| BackupError::io(path, e))
}

fn read_meta(path: &Path) -> BackupResult<BackupMeta> {
    let data = fs::read(path).map_err(|e| BackupError::io(path, e))?;
    serde_json::from_slice(&data).map_err(|e| BackupError::Deserialize(e.to_string()))
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gangway_exec::fake::{FakeDatabase, FakeRuntime};

    fn target_config(workspace: &Path) -> TargetConfig {
        let config_dir = workspace.join("config");
        fs::create_dir_all(&config_dir).unwrap();
        fs::write(config_dir.join("app.conf"), "port = 8080\n").unwrap();

        let toml_str = format!(
            r#"
[target]
name = "shopfront"
environment = "production"
config_dir = {config_dir:?}
strategy = "direct"
volumes = ["shopfront-data"]

[database]
name = "shopfront"
user = "shopfront"
container = "shopfront-db"

[[unit]]
name = "shopfront-api"
image = "registry.local/shopfront-api"
port = 8080
role = "api"
[unit.health]
path = "/healthz"
"#,
            config_dir = config_dir.display().to_string()
        );
        let config: TargetConfig = toml::from_str(&toml_str).unwrap();
        config.validate().unwrap();
        config
    }

    fn manager(
        workspace: &Path,
        runtime: Arc<FakeRuntime>,
        database: Arc<FakeDatabase>,
    ) -> BackupManager {
        BackupManager::new(
            workspace.join("backups"),
            runtime,
            Some(database as Arc<dyn DatabaseEngine>),
        )
    }

    #[tokio::test]
    async fn create_backup_stages_then_installs() {
        let workspace = tempfile::tempdir().unwrap();
        let config = target_config(workspace.path());
        let runtime = Arc::new(
            FakeRuntime::new().with_unit("shopfront-api", "registry.local/shopfront-api:v1", true),
        );
        let db = Arc::new(FakeDatabase::new());
        let mgr = manager(workspace.path(), runtime.clone(), db);

        let meta = mgr.create_backup(&config, "ops").await.unwrap();

        let dir = workspace
            .path()
            .join("backups/shopfront/production")
            .join(&meta.id);
        assert!(dir.join(META_FILE).exists());
        assert!(dir.join("config.tar.gz").exists());
        assert!(dir.join("volumes/shopfront-data.tar.gz").exists());
        assert!(dir.join(DB_DUMP_FILE).exists());

        // Original tag preserved, backup tag added.
        assert_eq!(
            meta.images["shopfront-api"],
            "registry.local/shopfront-api:v1"
        );
        assert!(runtime.has_image(&format!("registry.local/shopfront-api:backup-{}", meta.id)));

        // No staging directory left behind.
        let staging: Vec<_> = fs::read_dir(dir.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging-"))
            .collect();
        assert!(staging.is_empty());
    }

    #[tokio::test]
    async fn failed_backup_leaves_no_metadata() {
        let workspace = tempfile::tempdir().unwrap();
        let config = target_config(workspace.path());
        let runtime = Arc::new(
            FakeRuntime::new().with_unit("shopfront-api", "registry.local/shopfront-api:v1", true),
        );
        runtime.fail_on("archive_volume");
        let db = Arc::new(FakeDatabase::new());
        let mgr = manager(workspace.path(), runtime, db);

        assert!(mgr.create_backup(&config, "ops").await.is_err());
        assert!(mgr.list_backups(&config).unwrap().is_empty());

        // The interrupted build is fully gone, not merely hidden.
        let target_dir = workspace.path().join("backups/shopfront/production");
        let leftover: Vec<_> = fs::read_dir(&target_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftover.is_empty());
    }

    #[tokio::test]
    async fn tiny_dump_fails_backup() {
        let workspace = tempfile::tempdir().unwrap();
        let config = target_config(workspace.path());
        let runtime = Arc::new(
            FakeRuntime::new().with_unit("shopfront-api", "registry.local/shopfront-api:v1", true),
        );
        let db = Arc::new(FakeDatabase::new().with_dump(vec![b'x'; 40]));
        let mgr = manager(workspace.path(), runtime, db);

        let err = mgr.create_backup(&config, "ops").await.unwrap_err();
        assert!(matches!(err, BackupError::DumpTooSmall { size: 40 }));
        assert!(mgr.list_backups(&config).unwrap().is_empty());
    }

    #[tokio::test]
    async fn incomplete_backup_dir_is_invisible() {
        let workspace = tempfile::tempdir().unwrap();
        let config = target_config(workspace.path());
        let runtime = Arc::new(FakeRuntime::new());
        let db = Arc::new(FakeDatabase::new());
        let mgr = manager(workspace.path(), runtime, db);

        // A backup directory with artifacts but no metadata, as left by a
        // crash mid-archive.
        let dir = workspace
            .path()
            .join("backups/shopfront/production/shopfront-production-123");
        fs::create_dir_all(dir.join("volumes")).unwrap();
        fs::write(dir.join("config.tar.gz"), b"partial").unwrap();

        assert!(mgr.list_backups(&config).unwrap().is_empty());
        assert!(
            matches!(
                mgr.restore_backup(&config, "shopfront-production-123").await,
                Err(BackupError::NotRestorable(_))
            )
        );
    }

    #[tokio::test]
    async fn restore_puts_images_back() {
        let workspace = tempfile::tempdir().unwrap();
        let config = target_config(workspace.path());
        let runtime = Arc::new(
            FakeRuntime::new().with_unit("shopfront-api", "registry.local/shopfront-api:v1", true),
        );
        let db = Arc::new(FakeDatabase::new());
        let mgr = manager(workspace.path(), runtime.clone(), db.clone());

        let meta = mgr.create_backup(&config, "ops").await.unwrap();

        // A deploy happens: the unit now runs v2.
        runtime
            .start_unit(&StartSpec {
                name: "shopfront-api".to_string(),
                image: "registry.local/shopfront-api:v2".to_string(),
                port: 8080,
            })
            .await
            .unwrap();

        mgr.restore_backup(&config, &meta.id).await.unwrap();

        assert_eq!(
            runtime.unit_image("shopfront-api").unwrap(),
            "registry.local/shopfront-api:v1"
        );
        // Database went through drop → create → restore.
        assert_eq!(
            db.calls(),
            vec!["dump_to", "drop_database", "create_database", "restore_from"]
        );
    }

    #[tokio::test]
    async fn list_is_newest_first() {
        let workspace = tempfile::tempdir().unwrap();
        let config = target_config(workspace.path());
        let runtime = Arc::new(FakeRuntime::new());
        let db = Arc::new(FakeDatabase::new());
        let mgr = manager(workspace.path(), runtime, db);

        // Hand-write two complete backups with distinct timestamps.
        for (id, created_at) in [("shopfront-production-100", 100u64), ("shopfront-production-200", 200)] {
            let dir = workspace.path().join("backups/shopfront/production").join(id);
            fs::create_dir_all(&dir).unwrap();
            let meta = BackupMeta {
                id: id.to_string(),
                target: "shopfront".to_string(),
                environment: "production".to_string(),
                created_at,
                created_by: "ops".to_string(),
                images: BTreeMap::new(),
                backup_tags: BTreeMap::new(),
                volumes: vec![],
                has_config: false,
                db_dump: None,
            };
            fs::write(dir.join(META_FILE), serde_json::to_vec(&meta).unwrap()).unwrap();
        }

        let backups = mgr.list_backups(&config).unwrap();
        assert_eq!(backups[0].id, "shopfront-production-200");
        assert_eq!(backups[1].id, "shopfront-production-100");
        assert_eq!(
            mgr.latest_backup(&config).unwrap().unwrap().id,
            "shopfront-production-200"
        );
    }

    #[tokio::test]
    async fn cleanup_removes_expired_completely() {
        let workspace = tempfile::tempdir().unwrap();
        let config = target_config(workspace.path());
        let runtime = Arc::new(FakeRuntime::new());
        let db = Arc::new(FakeDatabase::new());
        let mgr = manager(workspace.path(), runtime, db);

        let old_id = "shopfront-production-1000";
        let dir = workspace.path().join("backups/shopfront/production").join(old_id);
        fs::create_dir_all(dir.join("volumes")).unwrap();
        fs::write(dir.join("config.tar.gz"), b"data").unwrap();
        let meta = BackupMeta {
            id: old_id.to_string(),
            target: "shopfront".to_string(),
            environment: "production".to_string(),
            created_at: 1000, // 1970 — far past any retention window.
            created_by: "ops".to_string(),
            images: BTreeMap::new(),
            backup_tags: BTreeMap::new(),
            volumes: vec![],
            has_config: true,
            db_dump: None,
        };
        fs::write(dir.join(META_FILE), serde_json::to_vec(&meta).unwrap()).unwrap();

        let removed = mgr.cleanup_old_backups(&config, 7).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!dir.exists());
        assert!(mgr.list_backups(&config).unwrap().is_empty());
    }

    #[tokio::test]
    async fn cleanup_keeps_recent() {
        let workspace = tempfile::tempdir().unwrap();
        let config = target_config(workspace.path());
        let runtime = Arc::new(
            FakeRuntime::new().with_unit("shopfront-api", "registry.local/shopfront-api:v1", true),
        );
        let db = Arc::new(FakeDatabase::new());
        let mgr = manager(workspace.path(), runtime, db);

        mgr.create_backup(&config, "ops").await.unwrap();
        let removed = mgr.cleanup_old_backups(&config, 7).await.unwrap();
        assert_eq!(removed, 0);
        assert_eq!(mgr.list_backups(&config).unwrap().len(), 1);
    }
}
