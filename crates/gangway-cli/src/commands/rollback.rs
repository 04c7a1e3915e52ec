//! `gangway rollback` — restore a previous backup.

use std::path::Path;

use super::Wiring;

pub async fn run(config_path: &Path, backup: Option<&str>) -> anyhow::Result<()> {
    let wiring = Wiring::build(config_path)?;
    let target_key = wiring.config.key();
    let orchestrator = wiring.orchestrator();

    let restored = orchestrator.rollback(backup).await?;
    println!("restored {target_key} from backup {restored}");
    Ok(())
}
