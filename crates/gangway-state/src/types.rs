//! Domain types for persisted deployment state.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of records kept in a manifest's history.
pub const HISTORY_CAP: usize = 10;

/// One successful deployment, as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    /// Unit name → full image reference (including tag) that went live.
    pub images: BTreeMap<String, String>,
    /// Unix timestamp (seconds) of the cutover.
    pub deployed_at: u64,
    /// Operator identity that ran the deploy.
    pub operator: String,
    /// Source revision (e.g. git sha) the images were built from, if known.
    pub source_revision: Option<String>,
    /// Backup taken before this deploy, if any.
    pub backup_id: Option<String>,
    /// Database dump reference inside that backup, if any.
    pub db_backup: Option<String>,
}

/// The deployment manifest for one target: what is running now, and what ran
/// before it.
///
/// `current` always reflects the last *successful* cutover — failed or
/// rolled-back attempts never touch it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub current: Option<DeploymentRecord>,
    #[serde(default)]
    pub history: Vec<DeploymentRecord>,
}

impl DeploymentManifest {
    /// Append the previous `current` to history (newest first, capped) and
    /// install a new current record.
    pub fn record_success(&mut self, record: DeploymentRecord) {
        if let Some(previous) = self.current.take() {
            self.history.insert(0, previous);
            self.history.truncate(HISTORY_CAP);
        }
        self.current = Some(record);
    }
}

/// Which blue/green slot is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveSlot {
    Blue,
    Green,
}

impl ActiveSlot {
    /// The other slot — where a blue-green deploy lands.
    pub fn other(self) -> ActiveSlot {
        match self {
            ActiveSlot::Blue => ActiveSlot::Green,
            ActiveSlot::Green => ActiveSlot::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActiveSlot::Blue => "blue",
            ActiveSlot::Green => "green",
        }
    }
}

impl fmt::Display for ActiveSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted active-slot pointer.
///
/// The version counter makes writes a compare-and-swap: a writer that
/// observed version N may only install version N+1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotPointer {
    pub slot: ActiveSlot,
    pub version: u64,
}

impl Default for SlotPointer {
    /// A target that has never cut over is on blue.
    fn default() -> Self {
        Self {
            slot: ActiveSlot::Blue,
            version: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: &str) -> DeploymentRecord {
        DeploymentRecord {
            images: BTreeMap::from([("api".to_string(), format!("registry.local/api:{tag}"))]),
            deployed_at: 1000,
            operator: "ops".to_string(),
            source_revision: None,
            backup_id: None,
            db_backup: None,
        }
    }

    #[test]
    fn record_success_rotates_current_into_history() {
        let mut manifest = DeploymentManifest::default();
        manifest.record_success(record("v1"));
        assert!(manifest.history.is_empty());

        manifest.record_success(record("v2"));
        assert_eq!(manifest.history.len(), 1);
        assert_eq!(
            manifest.history[0].images["api"],
            "registry.local/api:v1"
        );
    }

    #[test]
    fn history_caps_at_ten_oldest_evicted() {
        let mut manifest = DeploymentManifest::default();
        for i in 0..=HISTORY_CAP + 1 {
            manifest.record_success(record(&format!("v{i}")));
        }

        assert_eq!(manifest.history.len(), HISTORY_CAP);
        // Newest prior record first, oldest evicted.
        assert_eq!(
            manifest.history[0].images["api"],
            format!("registry.local/api:v{HISTORY_CAP}")
        );
        assert_eq!(manifest.history[HISTORY_CAP - 1].images["api"], "registry.local/api:v1");
    }

    #[test]
    fn slot_other_flips() {
        assert_eq!(ActiveSlot::Blue.other(), ActiveSlot::Green);
        assert_eq!(ActiveSlot::Green.other(), ActiveSlot::Blue);
    }

    #[test]
    fn default_pointer_is_blue_at_zero() {
        let pointer = SlotPointer::default();
        assert_eq!(pointer.slot, ActiveSlot::Blue);
        assert_eq!(pointer.version, 0);
    }
}
