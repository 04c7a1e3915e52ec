use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "gangway",
    about = "Gangway — gated release orchestrator for multi-container applications",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a new version through the gated pipeline.
    ///
    /// Validates preconditions, snapshots recoverable state, deploys the
    /// new units, gates them behind health and smoke checks, and only then
    /// cuts traffic over. Any gate failure restores the most recent backup.
    Deploy {
        /// Path to the target's gangway.toml
        config: PathBuf,
        /// Image tag to deploy
        #[arg(long)]
        tag: String,
        /// Skip the backup stage (rollback then depends on older backups)
        #[arg(long)]
        skip_backup: bool,
        /// Proceed past validation failures, logging them as warnings
        #[arg(long)]
        force: bool,
        /// Operator identity recorded in the manifest (default: $USER)
        #[arg(long)]
        operator: Option<String>,
        /// Source revision the images were built from
        #[arg(long)]
        revision: Option<String>,
    },
    /// Restore a previous backup.
    Rollback {
        /// Path to the target's gangway.toml
        config: PathBuf,
        /// Backup id to restore (default: the most recent)
        #[arg(long)]
        backup: Option<String>,
    },
    /// Show the current deployment for a target.
    Status {
        /// Path to the target's gangway.toml
        config: PathBuf,
        /// Also list the deployment history
        #[arg(long)]
        history: bool,
        /// Show what a rollback would restore
        #[arg(long)]
        rollback: bool,
    },
    /// Manage backups for a target.
    Backup {
        /// Path to the target's gangway.toml
        config: PathBuf,
        #[command(subcommand)]
        action: BackupAction,
    },
}

#[derive(Subcommand)]
enum BackupAction {
    /// List complete backups, newest first
    List,
    /// Take a backup outside a deploy run
    Create,
    /// Remove backups older than the retention window
    Cleanup {
        /// Retention window in days
        #[arg(long, default_value = "7")]
        retention_days: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gangway=debug".parse().unwrap()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Deploy {
            config,
            tag,
            skip_backup,
            force,
            operator,
            revision,
        } => commands::deploy::run(&config, &tag, skip_backup, force, operator, revision).await,
        Commands::Rollback { config, backup } => {
            commands::rollback::run(&config, backup.as_deref()).await
        }
        Commands::Status {
            config,
            history,
            rollback,
        } => commands::status::run(&config, history, rollback),
        Commands::Backup { config, action } => match action {
            BackupAction::List => commands::backup::list(&config),
            BackupAction::Create => commands::backup::create(&config).await,
            BackupAction::Cleanup { retention_days } => {
                commands::backup::cleanup(&config, retention_days).await
            }
        },
    }
}
