//! Manifest recorder — bookkeeping after a successful cutover.
//!
//! The manifest is the single source of truth for "what is running now"
//! and the historical rollback trail, independent of backup retention.
//! It is written exactly once per pipeline run, and only after the
//! cutover committed.

use tracing::info;

use gangway_state::{DeploymentRecord, StateResult, StateStore};

use crate::plan::UnitPlan;

/// Writes deployment records into the manifest.
pub struct ManifestRecorder {
    state: StateStore,
}

impl ManifestRecorder {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    /// Record a successful deployment. The previous `current` rotates into
    /// history (bounded); the new record becomes `current`.
    pub fn record(
        &self,
        plans: &[UnitPlan],
        operator: &str,
        source_revision: Option<String>,
        backup_id: Option<String>,
        db_backup: Option<String>,
    ) -> StateResult<DeploymentRecord> {
        let record = DeploymentRecord {
            images: plans
                .iter()
                .map(|p| (p.unit.name.clone(), p.image.clone()))
                .collect(),
            deployed_at: epoch_secs(),
            operator: operator.to_string(),
            source_revision,
            backup_id,
            db_backup,
        };
        self.state.record_success(record.clone())?;
        info!(operator, units = record.images.len(), "deployment recorded");
        Ok(record)
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
