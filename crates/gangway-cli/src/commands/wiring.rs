//! Assembles the collaborator clients and stores for one target.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;

use gangway_backup::BackupManager;
use gangway_core::TargetConfig;
use gangway_exec::{
    ContainerRuntime, DatabaseEngine, DockerRuntime, NginxProxy, PostgresEngine, ReverseProxy,
};
use gangway_rollout::Orchestrator;
use gangway_state::StateStore;

/// Everything a command needs, built from a gangway.toml path.
pub(crate) struct Wiring {
    pub config: TargetConfig,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub proxy: Option<Arc<dyn ReverseProxy>>,
    pub state: StateStore,
    pub backups: Arc<BackupManager>,
}

impl Wiring {
    pub fn build(config_path: &Path) -> anyhow::Result<Self> {
        let config = TargetConfig::from_file(config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;

        let runtime: Arc<dyn ContainerRuntime> = Arc::new(DockerRuntime::new());

        let proxy: Option<Arc<dyn ReverseProxy>> = config
            .proxy
            .as_ref()
            .filter(|p| p.enabled)
            .map(|p| {
                Arc::new(NginxProxy::new(p.config_path.clone(), p.container.clone()))
                    as Arc<dyn ReverseProxy>
            });

        let database: Option<Arc<dyn DatabaseEngine>> = config.database.as_ref().map(|d| {
            Arc::new(PostgresEngine::new(&d.container, &d.name, &d.user))
                as Arc<dyn DatabaseEngine>
        });

        let state = StateStore::open(
            &config.target.state_dir,
            &config.target.name,
            &config.target.environment,
        )?;

        let backups = Arc::new(BackupManager::new(
            config.target.backup_dir.clone(),
            runtime.clone(),
            database,
        ));

        Ok(Self {
            config,
            runtime,
            proxy,
            state,
            backups,
        })
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(
            self.config.clone(),
            self.runtime.clone(),
            self.proxy.clone(),
            self.backups.clone(),
            self.state.clone(),
        )
    }
}

/// Operator identity: explicit flag, else $USER, else "unknown".
pub(crate) fn operator_name(explicit: Option<String>) -> String {
    explicit
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "unknown".to_string())
}
