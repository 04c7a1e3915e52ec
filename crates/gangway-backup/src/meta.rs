//! Backup metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// File name of the metadata record inside a backup directory.
///
/// Written last: a backup directory without this file is incomplete and is
/// neither listed nor restorable.
pub const META_FILE: &str = "backup.json";

/// File name of the database dump inside a backup directory.
pub const DB_DUMP_FILE: &str = "db.dump";

/// Metadata record for one immutable backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMeta {
    /// `{target}-{environment}-{unix_ts}`.
    pub id: String,
    pub target: String,
    pub environment: String,
    /// Unix timestamp (seconds).
    pub created_at: u64,
    pub created_by: String,
    /// Instance (container) name → the live image reference it ran at
    /// backup time. Restore retags back to exactly these references.
    pub images: BTreeMap<String, String>,
    /// Instance name → the backup-scoped tag created for it.
    pub backup_tags: BTreeMap<String, String>,
    /// Named volumes archived under `volumes/`.
    pub volumes: Vec<String>,
    /// Whether `config.tar.gz` is present.
    pub has_config: bool,
    /// Database dump file name, when the target declares a database.
    pub db_dump: Option<String>,
}

impl BackupMeta {
    /// Age of this backup in whole days relative to `now` (unix seconds).
    pub fn age_days(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at) / 86_400
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_in_days() {
        let meta = BackupMeta {
            id: "a-prod-1000".to_string(),
            target: "a".to_string(),
            environment: "prod".to_string(),
            created_at: 1000,
            created_by: "ops".to_string(),
            images: BTreeMap::new(),
            backup_tags: BTreeMap::new(),
            volumes: vec![],
            has_config: false,
            db_dump: None,
        };
        assert_eq!(meta.age_days(1000), 0);
        assert_eq!(meta.age_days(1000 + 86_400 * 3 + 5), 3);
        // Clock skew must not underflow.
        assert_eq!(meta.age_days(0), 0);
    }
}
