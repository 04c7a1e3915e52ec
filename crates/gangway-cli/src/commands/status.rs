//! `gangway status` — what is running, what ran before, what a rollback
//! would restore.

use std::path::Path;

use gangway_state::DeploymentRecord;

use super::Wiring;

pub fn run(config_path: &Path, history: bool, rollback: bool) -> anyhow::Result<()> {
    let wiring = Wiring::build(config_path)?;
    let manifest = wiring.state.load_manifest()?;

    println!("target: {}", wiring.config.key());
    match &manifest.current {
        Some(record) => {
            println!("current:");
            print_record(record, "  ");
        }
        None => println!("current: (never deployed)"),
    }

    if history {
        if manifest.history.is_empty() {
            println!("history: (empty)");
        } else {
            println!("history (newest first):");
            for (i, record) in manifest.history.iter().enumerate() {
                // A record may outlive its backup; make that visible rather
                // than letting a rollback plan silently dangle.
                let backup_note = match &record.backup_id {
                    Some(id) if wiring.backups.backup_exists(&wiring.config, id) => String::new(),
                    Some(_) => " [backup pruned]".to_string(),
                    None => " [no backup]".to_string(),
                };
                println!("  #{i}{backup_note}");
                print_record(record, "    ");
            }
        }
    }

    if rollback {
        match wiring.backups.latest_backup(&wiring.config)? {
            Some(meta) => {
                println!("rollback would restore: {}", meta.id);
                println!("  created: {} by {}", meta.created_at, meta.created_by);
                for (instance, image) in &meta.images {
                    println!("  {instance}: {image}");
                }
                if meta.db_dump.is_some() {
                    println!("  database: dump included");
                }
            }
            None => println!("rollback would restore: (no backup available)"),
        }
    }

    Ok(())
}

fn print_record(record: &DeploymentRecord, indent: &str) {
    for (unit, image) in &record.images {
        println!("{indent}{unit}: {image}");
    }
    println!(
        "{indent}deployed_at: {} by {}",
        record.deployed_at, record.operator
    );
    if let Some(revision) = &record.source_revision {
        println!("{indent}revision: {revision}");
    }
    if let Some(backup_id) = &record.backup_id {
        println!("{indent}backup: {backup_id}");
    }
}
