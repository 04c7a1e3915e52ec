//! Pre-flight validation.
//!
//! Runs before anything is mutated and collects *all* violations rather
//! than stopping at the first, so an operator fixes one round of problems,
//! not one problem per round. `--force` downgrades violations to warnings;
//! it is an explicit escape hatch, never silent.

use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;
use walkdir::WalkDir;

use gangway_core::{HealthPolicy, TargetConfig};
use gangway_exec::ReverseProxy;

/// Default disk floor: 5 GiB.
const DEFAULT_MIN_FREE_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Which check a violation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Check {
    DiskSpace,
    ConfigDrift,
    ProxyConfig,
    RequiredEnv,
    MissingHealthcheck,
}

impl Check {
    pub fn as_str(self) -> &'static str {
        match self {
            Check::DiskSpace => "disk-space",
            Check::ConfigDrift => "config-drift",
            Check::ProxyConfig => "proxy-config",
            Check::RequiredEnv => "required-env",
            Check::MissingHealthcheck => "missing-healthcheck",
        }
    }
}

/// One violated check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub check: Check,
    pub detail: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.check.as_str(), self.detail)
    }
}

/// Outcome of a validation run.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Pre-flight validator.
pub struct Validator {
    min_free_bytes: u64,
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
        }
    }
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the disk floor (bytes).
    pub fn with_min_free_bytes(mut self, bytes: u64) -> Self {
        self.min_free_bytes = bytes;
        self
    }

    /// Run every check against the target. Never mutates anything.
    pub async fn validate(
        &self,
        config: &TargetConfig,
        proxy: Option<&dyn ReverseProxy>,
    ) -> ValidationReport {
        let mut report = ValidationReport::default();

        self.check_disk_space(config, &mut report);
        self.check_config_drift(config, &mut report);
        self.check_proxy(config, proxy, &mut report).await;
        self.check_required_env(config, &mut report);
        self.check_healthchecks(config, &mut report);

        report
    }

    fn check_disk_space(&self, config: &TargetConfig, report: &mut ValidationReport) {
        if self.min_free_bytes == 0 {
            return;
        }
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let backup_dir = &config.target.backup_dir;

        // Longest mount point that prefixes the backup dir is its filesystem.
        let disk = disks
            .iter()
            .filter(|d| backup_dir.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len());

        match disk {
            Some(disk) if disk.available_space() < self.min_free_bytes => {
                report.violations.push(Violation {
                    check: Check::DiskSpace,
                    detail: format!(
                        "{} bytes free on {}, {} required",
                        disk.available_space(),
                        disk.mount_point().display(),
                        self.min_free_bytes
                    ),
                });
            }
            Some(_) => {}
            None => {
                debug!(backup_dir = %backup_dir.display(), "no disk matches backup dir; skipping space check");
            }
        }
    }

    fn check_config_drift(&self, config: &TargetConfig, report: &mut ValidationReport) {
        let Some(source_dir) = &config.target.config_source_dir else {
            return;
        };
        let live = digest_tree(&config.target.config_dir);
        let source = digest_tree(source_dir);
        match (live, source) {
            (Some(live), Some(source)) => {
                if live != source {
                    report.violations.push(Violation {
                        check: Check::ConfigDrift,
                        detail: format!(
                            "live config {} differs from source {}",
                            &live[..12],
                            &source[..12]
                        ),
                    });
                }
            }
            (None, _) => report.violations.push(Violation {
                check: Check::ConfigDrift,
                detail: format!(
                    "config tree unreadable: {}",
                    config.target.config_dir.display()
                ),
            }),
            (_, None) => report.violations.push(Violation {
                check: Check::ConfigDrift,
                detail: format!("config tree unreadable: {}", source_dir.display()),
            }),
        }
    }

    async fn check_proxy(
        &self,
        config: &TargetConfig,
        proxy: Option<&dyn ReverseProxy>,
        report: &mut ValidationReport,
    ) {
        let enabled = config.proxy.as_ref().is_some_and(|p| p.enabled);
        if !enabled {
            return;
        }
        let Some(proxy) = proxy else {
            return;
        };
        if let Err(e) = proxy.validate_config().await {
            report.violations.push(Violation {
                check: Check::ProxyConfig,
                detail: e.to_string(),
            });
        }
    }

    fn check_required_env(&self, config: &TargetConfig, report: &mut ValidationReport) {
        for var in &config.target.required_env {
            if std::env::var_os(var).is_none() {
                report.violations.push(Violation {
                    check: Check::RequiredEnv,
                    detail: format!("{var} is not set"),
                });
            }
        }
    }

    fn check_healthchecks(&self, config: &TargetConfig, report: &mut ValidationReport) {
        if config.strictness.units_without_healthcheck != HealthPolicy::RequireHealthcheck {
            return;
        }
        for unit in &config.units {
            if unit.health.is_none() {
                report.violations.push(Violation {
                    check: Check::MissingHealthcheck,
                    detail: format!("unit {} declares no health check", unit.name),
                });
            }
        }
    }
}

/// Recursive SHA-256 digest of a directory tree: relative paths in sorted
/// order, each hashed with its contents. `None` when the tree is unreadable.
pub fn digest_tree(dir: &Path) -> Option<String> {
    if !dir.is_dir() {
        return None;
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.ok()?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    files.sort();

    let mut hasher = Sha256::new();
    for path in files {
        let relative = path.strip_prefix(dir).ok()?;
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        hasher.update(std::fs::read(&path).ok()?);
        hasher.update([0u8]);
    }
    Some(hex::encode(hasher.finalize()))
}
