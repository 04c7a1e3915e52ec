//! `gangway deploy` — run the gated pipeline.

use std::path::Path;

use anyhow::bail;
use tracing::info;

use gangway_rollout::DeployRequest;

use super::{Wiring, operator_name};

pub async fn run(
    config_path: &Path,
    tag: &str,
    skip_backup: bool,
    force: bool,
    operator: Option<String>,
    revision: Option<String>,
) -> anyhow::Result<()> {
    let wiring = Wiring::build(config_path)?;
    let target_key = wiring.config.key();
    let orchestrator = wiring.orchestrator();

    let request = DeployRequest {
        tag: tag.to_string(),
        operator: operator_name(operator),
        source_revision: revision,
        skip_backup,
        force,
    };

    match orchestrator.deploy(&request).await {
        Ok(summary) => {
            println!(
                "deployed {target_key} at {tag} in {}s",
                summary.duration.as_secs()
            );
            if let Some(backup_id) = &summary.backup_id {
                println!("backup: {backup_id}");
            }
            if let Some(teardown) = summary.teardown {
                info!("waiting out drain grace before old slot teardown");
                let _ = teardown.await;
            }
            Ok(())
        }
        // A successful rollback is still a failed deploy: non-zero exit.
        Err(failure) => bail!("{failure}"),
    }
}
