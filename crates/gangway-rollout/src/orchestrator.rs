//! Release orchestrator — sequences the gated pipeline.
//!
//! One deploy is strictly sequential: each stage's postcondition is the
//! next stage's precondition. Failures from `BackingUp` onward enter the
//! rollback branch, which always restores the *most recent* backup on
//! disk rather than whatever this run produced. Cutover success is the
//! irrevocable commit point; cleanup failures after it are logged and
//! never flip the outcome.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use gangway_backup::{BackupManager, BackupMeta};
use gangway_core::{Strategy, TargetConfig};
use gangway_exec::{ContainerRuntime, ReverseProxy, StartSpec, UnitState};
use gangway_health::prober::{BLUE_GREEN_DEADLINE, DIRECT_DEADLINE};
use gangway_health::{HealthOutcome, HealthProber, SmokeTarget, SmokeTester};
use gangway_state::{DeploymentRecord, StateStore};

use crate::cutover::CutoverController;
use crate::error::{RolloutError, RolloutResult};
use crate::plan::{UnitPlan, instance_name, plan_units};
use crate::recorder::ManifestRecorder;
use crate::stage::Stage;
use crate::validate::Validator;

/// Parameters for one deploy run.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Image tag to deploy.
    pub tag: String,
    pub operator: String,
    pub source_revision: Option<String>,
    pub skip_backup: bool,
    /// Proceed past validation violations, logging them as warnings.
    pub force: bool,
}

/// What the rollback branch did (or could not do).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackAction {
    /// Failure before any mutation, or past the commit point — nothing to
    /// roll back.
    NotAttempted,
    /// The most recent backup was restored.
    Restored { backup_id: String },
    /// Blue-green cutover failure: the slot pointer was flipped back.
    PointerReverted,
    /// A rollback was needed but no backup exists.
    NoBackupAvailable,
    /// The rollback itself failed. Operator intervention required.
    Failed,
}

/// Successful pipeline outcome.
#[derive(Debug)]
pub struct DeploySummary {
    pub record: DeploymentRecord,
    pub backup_id: Option<String>,
    pub duration: Duration,
    /// Deferred old-slot teardown (blue-green only). Awaiting it keeps the
    /// instant-revert window open for the drain grace period.
    pub teardown: Option<JoinHandle<()>>,
}

/// Failed pipeline outcome: where it failed, why, and what the rollback
/// branch did about it.
#[derive(Debug)]
pub struct DeployFailure {
    pub stage: Stage,
    pub error: RolloutError,
    pub rollback: RollbackAction,
}

impl fmt::Display for DeployFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deploy failed at {}: {}", self.stage, self.error)?;
        match &self.rollback {
            RollbackAction::NotAttempted => Ok(()),
            RollbackAction::Restored { backup_id } => {
                write!(f, " (rolled back to backup {backup_id})")
            }
            RollbackAction::PointerReverted => write!(f, " (slot pointer reverted)"),
            RollbackAction::NoBackupAvailable => write!(f, " (no backup available for rollback)"),
            RollbackAction::Failed => write!(f, " (rollback FAILED)"),
        }
    }
}

impl std::error::Error for DeployFailure {}

type StageResult<T> = Result<T, (Stage, RolloutError)>;

/// Drives the release pipeline for one target.
pub struct Orchestrator {
    config: TargetConfig,
    runtime: Arc<dyn ContainerRuntime>,
    proxy: Option<Arc<dyn ReverseProxy>>,
    backups: Arc<BackupManager>,
    state: StateStore,
    validator: Validator,
    prober: HealthProber,
    smoke: SmokeTester,
    abort: Arc<AtomicBool>,
}

impl Orchestrator {
    pub fn new(
        config: TargetConfig,
        runtime: Arc<dyn ContainerRuntime>,
        proxy: Option<Arc<dyn ReverseProxy>>,
        backups: Arc<BackupManager>,
        state: StateStore,
    ) -> Self {
        let prober = HealthProber::new(runtime.clone());
        Self {
            config,
            runtime,
            proxy,
            backups,
            state,
            validator: Validator::new(),
            prober,
            smoke: SmokeTester::new(),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_prober(mut self, prober: HealthProber) -> Self {
        self.prober = prober;
        self
    }

    pub fn with_smoke(mut self, smoke: SmokeTester) -> Self {
        self.smoke = smoke;
        self
    }

    /// Flag checked at stage boundaries; setting it makes the next stage
    /// fail fast into the rollback branch. Mid-stage work is never
    /// preempted.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        self.abort.clone()
    }

    // ── Pipeline ───────────────────────────────────────────────────

    /// Run the full pipeline. Exactly one of the two outcomes is reported;
    /// a successful rollback of a failed deploy is still a failed deploy.
    pub async fn deploy(&self, request: &DeployRequest) -> Result<DeploySummary, DeployFailure> {
        let started = Instant::now();
        info!(target = %self.config.key(), tag = %request.tag, "deploy starting");

        let _lock = match self.state.acquire_lock() {
            Ok(lock) => lock,
            Err(gangway_state::StateError::LockHeld(detail)) => {
                return Err(no_rollback(
                    Stage::Validating,
                    RolloutError::AlreadyInFlight(detail),
                ));
            }
            Err(e) => return Err(no_rollback(Stage::Validating, e.into())),
        };

        // ── Validating ── nothing has been mutated; failures are final.
        info!(stage = %Stage::Validating, "pre-flight checks");
        let report = self
            .validator
            .validate(&self.config, self.proxy.as_deref())
            .await;
        if !report.passed() {
            if request.force {
                for violation in &report.violations {
                    warn!(%violation, "validation violation overridden by --force");
                }
            } else {
                return Err(no_rollback(
                    Stage::Validating,
                    RolloutError::Precondition(report.violations),
                ));
            }
        }

        // ── BackingUp ── still nothing mutated; failure is a safe abort.
        let mut backup: Option<BackupMeta> = None;
        if request.skip_backup {
            info!(stage = %Stage::BackingUp, "backup skipped by request");
        } else {
            info!(stage = %Stage::BackingUp, "snapshotting recoverable state");
            match self.backups.create_backup(&self.config, &request.operator).await {
                Ok(meta) => backup = Some(meta),
                Err(e) => return Err(no_rollback(Stage::BackingUp, e.into())),
            }
        }

        match self.run_gated(request, &backup, started).await {
            Ok(summary) => {
                info!(
                    target = %self.config.key(),
                    tag = %request.tag,
                    duration_secs = summary.duration.as_secs(),
                    "deploy complete"
                );
                Ok(summary)
            }
            Err((stage, error)) => Err(self.enter_rollback(stage, error).await),
        }
    }

    /// The mutation stages: everything from image pulls through cleanup.
    async fn run_gated(
        &self,
        request: &DeployRequest,
        backup: &Option<BackupMeta>,
        started: Instant,
    ) -> StageResult<DeploySummary> {
        let strategy = self.config.target.strategy;

        let observed = match strategy {
            Strategy::BlueGreen => Some(
                self.state
                    .read_slot()
                    .map_err(|e| (Stage::Deploying, e.into()))?,
            ),
            Strategy::Direct => None,
        };
        let slot = observed.map(|p| p.slot.other());
        let plans = plan_units(&self.config, slot, &request.tag);

        // ── PullingImages ──
        self.stage_boundary(Stage::PullingImages)?;
        for plan in &plans {
            self.runtime
                .pull_image(&plan.image)
                .await
                .map_err(|e| (Stage::PullingImages, e.into()))?;
        }

        // ── Deploying ──
        self.stage_boundary(Stage::Deploying)?;
        match strategy {
            Strategy::Direct => self
                .deploy_direct(&plans)
                .await
                .map_err(|e| (Stage::Deploying, e))?,
            Strategy::BlueGreen => self
                .deploy_slot(&plans)
                .await
                .map_err(|e| (Stage::Deploying, e))?,
        }

        // ── Migrating ──
        self.stage_boundary(Stage::Migrating)?;
        if let Some(migration) = &self.config.migration {
            let instance = plans
                .iter()
                .find(|p| p.unit.name == migration.container)
                .map(|p| p.instance.clone())
                .ok_or_else(|| {
                    (
                        Stage::Migrating,
                        RolloutError::Migration(format!(
                            "no unit named {}",
                            migration.container
                        )),
                    )
                })?;
            info!(stage = %Stage::Migrating, %instance, "running migrations");
            self.runtime
                .exec_in(&instance, &migration.command, migration.timeout())
                .await
                .map_err(|e| (Stage::Migrating, RolloutError::Migration(e.to_string())))?;
        }

        // ── HealthChecking ──
        self.stage_boundary(Stage::HealthChecking)?;
        let deadline = match strategy {
            Strategy::Direct => DIRECT_DEADLINE,
            Strategy::BlueGreen => BLUE_GREEN_DEADLINE,
        };
        let policy = self.config.strictness.units_without_healthcheck;
        for plan in &plans {
            let outcome = self
                .prober
                .await_healthy(&plan.instance, plan.port, &plan.unit, policy, deadline)
                .await;
            match outcome {
                HealthOutcome::Healthy => {}
                HealthOutcome::Unhealthy { reason } => {
                    return Err((
                        Stage::HealthChecking,
                        RolloutError::HealthGate {
                            instance: plan.instance.clone(),
                            outcome: reason,
                        },
                    ));
                }
                HealthOutcome::TimedOut => {
                    return Err((
                        Stage::HealthChecking,
                        RolloutError::HealthGate {
                            instance: plan.instance.clone(),
                            outcome: "timed out".to_string(),
                        },
                    ));
                }
            }
        }

        // ── SmokeTesting ── still before any traffic change.
        self.stage_boundary(Stage::SmokeTesting)?;
        let targets: Vec<SmokeTarget> = plans
            .iter()
            .map(|p| SmokeTarget {
                instance: p.instance.clone(),
                port: p.port,
                role: p.unit.role,
            })
            .collect();
        let smoke_report = self.smoke.run(&targets).await;
        if !smoke_report.passed() {
            return Err((
                Stage::SmokeTesting,
                RolloutError::SmokeGate {
                    instances: smoke_report
                        .failures
                        .iter()
                        .map(|f| f.instance.clone())
                        .collect(),
                },
            ));
        }

        // ── CuttingOver ── the commit point.
        self.stage_boundary(Stage::CuttingOver)?;
        let cutover =
            CutoverController::new(self.runtime.clone(), self.proxy.clone(), self.state.clone());
        let old_slot = match (strategy, observed) {
            (Strategy::BlueGreen, Some(observed)) => {
                cutover
                    .cutover_blue_green(observed)
                    .await
                    .map_err(|e| (Stage::CuttingOver, e))?;
                Some(observed.slot)
            }
            _ => {
                cutover
                    .cutover_direct()
                    .await
                    .map_err(|e| (Stage::CuttingOver, e))?;
                None
            }
        };

        // Manifest: recorded immediately after the commit point. A write
        // failure here is surfaced but must not trigger a restore — the
        // new version is already live.
        let recorder = ManifestRecorder::new(self.state.clone());
        let record = recorder
            .record(
                &plans,
                &request.operator,
                request.source_revision.clone(),
                backup.as_ref().map(|b| b.id.clone()),
                backup.as_ref().and_then(|b| b.db_dump.clone()),
            )
            .map_err(|e| (Stage::CleaningUp, e.into()))?;

        // ── CleaningUp ── best-effort; never flips the outcome.
        let teardown = match (strategy, old_slot) {
            (Strategy::BlueGreen, Some(old)) => Some(cutover.schedule_slot_teardown(
                &self.config,
                old,
                self.config.drain_grace(),
            )),
            _ => {
                for plan in &plans {
                    let prev = format!("{}-prev", plan.instance);
                    if let Err(e) = self.runtime.remove_unit(&prev).await {
                        warn!(unit = %prev, error = %e, "superseded unit removal failed");
                    }
                }
                None
            }
        };

        Ok(DeploySummary {
            record,
            backup_id: backup.as_ref().map(|b| b.id.clone()),
            duration: started.elapsed(),
            teardown,
        })
    }

    /// Direct strategy: the new unit takes over the old unit's identity.
    /// The old unit is stopped and kept aside (renamed), creating the
    /// short unavoidable gap this strategy accepts.
    async fn deploy_direct(&self, plans: &[UnitPlan]) -> RolloutResult<()> {
        for plan in plans {
            if self.runtime.unit_state(&plan.instance).await? != UnitState::Missing {
                self.runtime.stop_unit(&plan.instance).await?;
                let prev = format!("{}-prev", plan.instance);
                // Clear a leftover from an earlier run before renaming.
                let _ = self.runtime.remove_unit(&prev).await;
                self.runtime.rename_unit(&plan.instance, &prev).await?;
            }
            self.runtime
                .start_unit(&StartSpec {
                    name: plan.instance.clone(),
                    image: plan.image.clone(),
                    port: plan.port,
                })
                .await
                .map_err(|e| RolloutError::Deploy(e.to_string()))?;
        }
        Ok(())
    }

    /// Blue-green: deploy into the inactive slot while the active slot
    /// keeps serving.
    async fn deploy_slot(&self, plans: &[UnitPlan]) -> RolloutResult<()> {
        for plan in plans {
            // A stale instance from a previous failed attempt may occupy
            // the inactive slot.
            self.runtime.remove_unit(&plan.instance).await?;
            self.runtime
                .start_unit(&StartSpec {
                    name: plan.instance.clone(),
                    image: plan.image.clone(),
                    port: plan.port,
                })
                .await
                .map_err(|e| RolloutError::Deploy(e.to_string()))?;
        }
        Ok(())
    }

    // ── Rollback branch ────────────────────────────────────────────

    /// Decide and execute the rollback for a stage failure.
    async fn enter_rollback(&self, stage: Stage, error: RolloutError) -> DeployFailure {
        error!(%stage, %error, "pipeline failed");

        // Blue-green cutover failures already reverted the pointer inside
        // the controller; the old slot never stopped serving.
        if stage == Stage::CuttingOver && self.config.target.strategy == Strategy::BlueGreen {
            return DeployFailure {
                stage,
                error,
                rollback: RollbackAction::PointerReverted,
            };
        }

        // Past the commit point there is nothing safe to restore.
        if stage == Stage::CleaningUp {
            return DeployFailure {
                stage,
                error,
                rollback: RollbackAction::NotAttempted,
            };
        }

        info!(stage = %Stage::RollingBack, "restoring most recent backup");
        match self.restore_latest().await {
            Ok(backup_id) => DeployFailure {
                stage,
                error,
                rollback: RollbackAction::Restored { backup_id },
            },
            Err(RolloutError::NoBackupAvailable) => {
                error!("no backup available; nothing restored");
                DeployFailure {
                    stage,
                    error,
                    rollback: RollbackAction::NoBackupAvailable,
                }
            }
            Err(rollback_error) => {
                error!(error = %rollback_error, "rollback failed; operator intervention required");
                DeployFailure {
                    stage,
                    error: RolloutError::DoubleFailure {
                        deploy: Box::new(error),
                        rollback: Box::new(rollback_error),
                    },
                    rollback: RollbackAction::Failed,
                }
            }
        }
    }

    /// Restore the most recent backup on disk — deliberately not the one
    /// this run produced, though they usually coincide.
    async fn restore_latest(&self) -> RolloutResult<String> {
        if self.config.target.strategy == Strategy::BlueGreen {
            // Quiesce the failed new-slot units; they were never routed to.
            if let Ok(pointer) = self.state.read_slot() {
                for unit in &self.config.units {
                    let instance = instance_name(unit, Some(pointer.slot.other()));
                    let _ = self.runtime.stop_unit(&instance).await;
                }
            }
        }

        let latest = self
            .backups
            .latest_backup(&self.config)
            .map_err(RolloutError::Backup)?;
        let Some(meta) = latest else {
            return Err(RolloutError::NoBackupAvailable);
        };

        self.backups
            .restore_backup(&self.config, &meta.id)
            .await
            .map_err(RolloutError::Backup)?;

        for unit in &self.config.units {
            let prev = format!("{}-prev", unit.name);
            let _ = self.runtime.remove_unit(&prev).await;
        }

        if let Some(proxy) = &self.proxy {
            if let Err(e) = proxy.reload().await {
                warn!(error = %e, "proxy reload after restore failed");
            }
        }
        Ok(meta.id)
    }

    // ── Operator rollback ──────────────────────────────────────────

    /// Restore a named backup (or the latest) outside a deploy run.
    pub async fn rollback(&self, backup_id: Option<&str>) -> RolloutResult<String> {
        let _lock = self.state.acquire_lock().map_err(|e| match e {
            gangway_state::StateError::LockHeld(detail) => RolloutError::AlreadyInFlight(detail),
            e => e.into(),
        })?;

        let id = match backup_id {
            Some(id) => id.to_string(),
            None => self
                .backups
                .latest_backup(&self.config)
                .map_err(RolloutError::Backup)?
                .ok_or(RolloutError::NoBackupAvailable)?
                .id,
        };

        info!(backup_id = %id, "operator rollback");
        self.backups
            .restore_backup(&self.config, &id)
            .await
            .map_err(RolloutError::Backup)?;

        if let Some(proxy) = &self.proxy {
            if let Err(e) = proxy.reload().await {
                warn!(error = %e, "proxy reload after restore failed");
            }
        }
        Ok(id)
    }

    fn stage_boundary(&self, stage: Stage) -> StageResult<()> {
        if self.abort.load(Ordering::Relaxed) {
            return Err((stage, RolloutError::Aborted));
        }
        info!(%stage, "entering stage");
        Ok(())
    }
}

fn no_rollback(stage: Stage, error: RolloutError) -> DeployFailure {
    DeployFailure {
        stage,
        error,
        rollback: RollbackAction::NotAttempted,
    }
}
