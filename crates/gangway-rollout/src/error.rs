//! Failure taxonomy for the release pipeline.
//!
//! The classes matter: precondition and backup failures abort before any
//! mutation (nothing to roll back); deploy, gate, and cutover failures
//! enter the rollback branch; cleanup failures are logged and never
//! surface here at all.

use thiserror::Error;

use crate::validate::Violation;

/// Result type alias for pipeline operations.
pub type RolloutResult<T> = Result<T, RolloutError>;

/// Errors raised by pipeline stages.
#[derive(Debug, Error)]
pub enum RolloutError {
    /// Pre-flight validation failed. Fatal, nothing was mutated.
    #[error("pre-flight validation failed: {}", format_violations(.0))]
    Precondition(Vec<Violation>),

    /// A deploy is already in flight for this target.
    #[error("deploy already in flight: {0}")]
    AlreadyInFlight(String),

    /// Backup could not be taken. Fatal before any mutation; safe abort.
    #[error("backup failed: {0}")]
    Backup(#[from] gangway_backup::BackupError),

    /// The runtime could not start the new units.
    #[error("deploy failed: {0}")]
    Deploy(String),

    /// The migration command failed.
    #[error("migration failed: {0}")]
    Migration(String),

    /// A unit never became healthy. Infra-class failure.
    #[error("health gate failed: {instance}: {outcome}")]
    HealthGate { instance: String, outcome: String },

    /// Units answered probes but failed functionally. Distinct from the
    /// health gate — it points at the code, not the infrastructure.
    #[error("smoke gate failed: {}", .instances.join(", "))]
    SmokeGate { instances: Vec<String> },

    /// Failure at the traffic switch — the most severe class, closest to
    /// live traffic.
    #[error("cutover failed: {0}")]
    Cutover(String),

    /// A gate failed and there is no backup to restore. Surfaced instead
    /// of attempting a restore that cannot exist.
    #[error("no backup available for rollback")]
    NoBackupAvailable,

    /// The deploy failed *and* the rollback failed. Operator intervention
    /// required; nothing is retried automatically.
    #[error("rollback failed after deploy failure: deploy: {deploy}; rollback: {rollback}")]
    DoubleFailure {
        deploy: Box<RolloutError>,
        rollback: Box<RolloutError>,
    },

    /// Pipeline aborted by the operator at a stage boundary.
    #[error("deploy aborted")]
    Aborted,

    #[error("state error: {0}")]
    State(#[from] gangway_state::StateError),

    #[error("collaborator call failed: {0}")]
    Exec(#[from] gangway_exec::ExecError),
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
