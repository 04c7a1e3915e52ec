//! `gangway backup` — list, create, and prune backups.

use std::path::Path;

use super::{Wiring, operator_name};

pub fn list(config_path: &Path) -> anyhow::Result<()> {
    let wiring = Wiring::build(config_path)?;
    let backups = wiring.backups.list_backups(&wiring.config)?;

    if backups.is_empty() {
        println!("no backups for {}", wiring.config.key());
        return Ok(());
    }
    for meta in backups {
        println!(
            "{}  created {} by {}  units {}{}",
            meta.id,
            meta.created_at,
            meta.created_by,
            meta.images.len(),
            if meta.db_dump.is_some() { "  +db" } else { "" },
        );
    }
    Ok(())
}

pub async fn create(config_path: &Path) -> anyhow::Result<()> {
    let wiring = Wiring::build(config_path)?;
    let meta = wiring
        .backups
        .create_backup(&wiring.config, &operator_name(None))
        .await?;
    println!("backup {} complete", meta.id);
    Ok(())
}

pub async fn cleanup(config_path: &Path, retention_days: u64) -> anyhow::Result<()> {
    let wiring = Wiring::build(config_path)?;
    let removed = wiring
        .backups
        .cleanup_old_backups(&wiring.config, retention_days)
        .await?;
    println!("removed {removed} backup(s) older than {retention_days} days");
    Ok(())
}
