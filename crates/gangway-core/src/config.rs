//! gangway.toml configuration parser.
//!
//! One file describes one deployment target: its workload units, rollout
//! strategy, and the optional proxy / database / migration collaborators.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;

/// Errors raised while loading or validating a target config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Rollout strategy for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// New units reuse the old units' identities; short stop/start gap.
    Direct,
    /// Dual-slot: deploy into the inactive slot, flip the pointer after gates.
    BlueGreen,
}

/// What to do with units that declare no health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthPolicy {
    /// A unit observed running counts as healthy. Default, permissive.
    #[default]
    RunningIsHealthy,
    /// Pre-flight validation rejects units without a health block.
    RequireHealthcheck,
}

/// Role of a unit, used by the smoke tester to pick probe paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitRole {
    /// API-serving: probed at `/api/health` with `/api/status` fallback.
    Api,
    /// Content-serving: probed at `/` with `/index.html` fallback.
    Content,
    /// Not smoke-tested.
    #[default]
    None,
}

/// Full configuration for one deployment target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub target: TargetSection,
    pub proxy: Option<ProxyConfig>,
    pub database: Option<DatabaseConfig>,
    pub migration: Option<MigrationConfig>,
    #[serde(rename = "unit", default)]
    pub units: Vec<UnitConfig>,
    #[serde(default)]
    pub strictness: Strictness,
}

/// The `[target]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSection {
    pub name: String,
    pub environment: String,
    /// Live configuration tree, archived in backups and drift-checked.
    pub config_dir: PathBuf,
    /// Version-controlled source of `config_dir`; drift check compares the two.
    pub config_source_dir: Option<PathBuf>,
    /// Root for manifests, slot pointers, and deploy locks.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Root for backup trees.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    pub strategy: Strategy,
    /// Environment variables that must be set before a deploy may proceed.
    #[serde(default)]
    pub required_env: Vec<String>,
    /// Named container volumes archived into each backup.
    #[serde(default)]
    pub volumes: Vec<String>,
    /// How long the superseded slot keeps running after a blue-green cutover.
    #[serde(default = "default_drain_grace")]
    pub drain_grace: String,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/gangway")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("/var/backups/gangway")
}

fn default_drain_grace() -> String {
    "300s".to_string()
}

/// The `[proxy]` section — reverse proxy collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub config_path: PathBuf,
    /// When set, proxy commands run via `docker exec` in this container.
    pub container: Option<String>,
}

/// The `[database]` section — relational database collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_engine")]
    pub engine: String,
    pub name: String,
    pub user: String,
    pub container: String,
}

fn default_engine() -> String {
    "postgres".to_string()
}

/// The `[migration]` section — command run after deploy, before health gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Unit whose container runs the migration.
    pub container: String,
    pub command: Vec<String>,
    #[serde(default = "default_migration_timeout")]
    pub timeout: String,
}

fn default_migration_timeout() -> String {
    "300s".to_string()
}

/// The `[strictness]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Strictness {
    #[serde(default)]
    pub units_without_healthcheck: HealthPolicy,
}

/// One `[[unit]]` entry — a deployable process group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitConfig {
    pub name: String,
    /// Image reference without tag; the deploy tag is supplied per run.
    pub image: String,
    pub port: u16,
    #[serde(default)]
    pub role: UnitRole,
    pub health: Option<UnitHealth>,
}

/// Health check descriptor for a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitHealth {
    pub path: String,
    #[serde(default = "default_expect_status")]
    pub expect_status: u16,
    #[serde(default = "default_probe_timeout")]
    pub timeout: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_start_grace")]
    pub start_grace: String,
}

fn default_expect_status() -> u16 {
    200
}

fn default_probe_timeout() -> String {
    "5s".to_string()
}

fn default_retries() -> u32 {
    3
}

fn default_start_grace() -> String {
    "10s".to_string()
}

fn default_true() -> bool {
    true
}

impl TargetConfig {
    /// Load and validate a target config from a gangway.toml file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TargetConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Composite key identifying this target: `{name}/{environment}`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.target.name, self.target.environment)
    }

    /// Drain grace as a parsed duration.
    pub fn drain_grace(&self) -> Duration {
        // Validated in `validate`, so the fallback is unreachable in practice.
        parse_duration(&self.target.drain_grace).unwrap_or(Duration::from_secs(300))
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.name.is_empty() || self.target.environment.is_empty() {
            return Err(ConfigError::Invalid(
                "target.name and target.environment must be non-empty".to_string(),
            ));
        }
        if self.units.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[unit]] is required".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for unit in &self.units {
            if unit.name.is_empty() {
                return Err(ConfigError::Invalid("unit name must be non-empty".to_string()));
            }
            if !seen.insert(unit.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate unit name: {}",
                    unit.name
                )));
            }
            if unit.port == 0 {
                return Err(ConfigError::Invalid(format!(
                    "unit {} has port 0",
                    unit.name
                )));
            }
            if let Some(health) = &unit.health {
                for (field, value) in [
                    ("timeout", &health.timeout),
                    ("start_grace", &health.start_grace),
                ] {
                    if parse_duration(value).is_none() {
                        return Err(ConfigError::Invalid(format!(
                            "unit {}: invalid {field} duration {value:?}",
                            unit.name
                        )));
                    }
                }
            }
        }

        if parse_duration(&self.target.drain_grace).is_none() {
            return Err(ConfigError::Invalid(format!(
                "invalid drain_grace duration {:?}",
                self.target.drain_grace
            )));
        }
        if let Some(migration) = &self.migration {
            if migration.command.is_empty() {
                return Err(ConfigError::Invalid(
                    "migration.command must be non-empty".to_string(),
                ));
            }
            if parse_duration(&migration.timeout).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "invalid migration timeout {:?}",
                    migration.timeout
                )));
            }
        }

        Ok(())
    }

    /// Units that the smoke tester will probe.
    pub fn smoke_units(&self) -> impl Iterator<Item = &UnitConfig> {
        self.units.iter().filter(|u| u.role != UnitRole::None)
    }
}

impl UnitHealth {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn start_grace(&self) -> Duration {
        parse_duration(&self.start_grace).unwrap_or(Duration::from_secs(10))
    }
}

impl MigrationConfig {
    pub fn timeout(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[target]
name = "shopfront"
environment = "production"
config_dir = "/srv/shopfront/config"
strategy = "blue_green"

[[unit]]
name = "shopfront-api"
image = "registry.local/shopfront-api"
port = 8080
role = "api"

[unit.health]
path = "/healthz"
"#;

    #[test]
    fn parse_minimal() {
        let config: TargetConfig = toml::from_str(MINIMAL).unwrap();
        config.validate().unwrap();
        assert_eq!(config.key(), "shopfront/production");
        assert_eq!(config.target.strategy, Strategy::BlueGreen);
        assert_eq!(config.units.len(), 1);

        let health = config.units[0].health.as_ref().unwrap();
        assert_eq!(health.expect_status, 200);
        assert_eq!(health.timeout(), Duration::from_secs(5));
        assert_eq!(health.start_grace(), Duration::from_secs(10));
    }

    #[test]
    fn defaults_applied() {
        let config: TargetConfig = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.target.state_dir, PathBuf::from("/var/lib/gangway"));
        assert_eq!(config.drain_grace(), Duration::from_secs(300));
        assert_eq!(
            config.strictness.units_without_healthcheck,
            HealthPolicy::RunningIsHealthy
        );
    }

    #[test]
    fn rejects_duplicate_unit_names() {
        let toml_str = format!(
            "{MINIMAL}\n[[unit]]\nname = \"shopfront-api\"\nimage = \"x\"\nport = 8081\n"
        );
        let config: TargetConfig = toml::from_str(&toml_str).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_empty_units() {
        let toml_str = r#"
[target]
name = "a"
environment = "b"
config_dir = "/tmp"
strategy = "direct"
"#;
        let config: TargetConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_duration() {
        let toml_str = MINIMAL.replace("path = \"/healthz\"", "path = \"/healthz\"\ntimeout = \"soon\"");
        let config: TargetConfig = toml::from_str(&toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn smoke_units_skips_none_role() {
        let toml_str = format!(
            "{MINIMAL}\n[[unit]]\nname = \"worker\"\nimage = \"x\"\nport = 9000\n"
        );
        let config: TargetConfig = toml::from_str(&toml_str).unwrap();
        let names: Vec<_> = config.smoke_units().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["shopfront-api"]);
    }

    #[test]
    fn from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gangway.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = TargetConfig::from_file(&path).unwrap();
        assert_eq!(config.target.name, "shopfront");
    }

    #[test]
    fn migration_requires_command() {
        let toml_str = format!("{MINIMAL}\n[migration]\ncontainer = \"shopfront-api\"\ncommand = []\n");
        let config: TargetConfig = toml::from_str(&toml_str).unwrap();
        assert!(config.validate().is_err());
    }
}
