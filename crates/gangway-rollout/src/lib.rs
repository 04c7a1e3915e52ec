//! gangway-rollout — the gated release pipeline.
//!
//! The [`Orchestrator`] sequences a deploy through a linear state machine
//! with a single failure branch:
//!
//! ```text
//! Validating → BackingUp → PullingImages → Deploying → Migrating →
//! HealthChecking → SmokeTesting → CuttingOver → CleaningUp → Done
//!                      ↘ (any failure from BackingUp on) RollingBack → Failed
//! ```
//!
//! The ordering is the core safety property: new units are health-checked
//! and smoke-tested *before* the traffic cutover, so broken code never
//! serves live traffic. Any gate failure restores the most recent backup;
//! a failure during cutover of a blue-green target reverts the slot
//! pointer instead.
//!
//! # Components
//!
//! - **`validate`** — pre-flight checks (disk floor, config drift, proxy
//!   syntax, required env)
//! - **`plan`** — per-unit instance names, ports, and image references
//! - **`cutover`** — direct and blue-green traffic switches
//! - **`recorder`** — manifest bookkeeping after a successful cutover
//! - **`orchestrator`** — the pipeline itself

pub mod cutover;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod recorder;
pub mod stage;
pub mod validate;

pub use cutover::CutoverController;
pub use error::{RolloutError, RolloutResult};
pub use orchestrator::{DeployFailure, DeployRequest, DeploySummary, Orchestrator, RollbackAction};
pub use plan::{UnitPlan, plan_units};
pub use recorder::ManifestRecorder;
pub use stage::Stage;
pub use validate::{Check, ValidationReport, Validator, Violation};
