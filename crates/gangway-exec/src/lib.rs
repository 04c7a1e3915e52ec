//! gangway-exec — narrow typed clients for the external collaborators.
//!
//! The orchestrator never formats ad hoc command strings. Everything it
//! needs from the outside world goes through three seams:
//!
//! - [`ContainerRuntime`] — list/tag/stop/start/inspect workload units
//!   (implemented by [`DockerRuntime`]).
//! - [`ReverseProxy`] — validate config and reload routing (implemented by
//!   [`NginxProxy`]).
//! - [`DatabaseEngine`] — logical dump/drop/create/restore (implemented by
//!   [`PostgresEngine`]).
//!
//! Every call spawns a process and carries an explicit timeout; there is no
//! fire-and-forget operation. The [`fake`] module provides in-memory
//! implementations that record call sequences, so the pipeline's ordering
//! guarantees are unit-testable.

pub mod database;
pub mod error;
pub mod fake;
pub mod process;
pub mod proxy;
pub mod runtime;

pub use database::{DatabaseEngine, PostgresEngine};
pub use error::{ExecError, ExecResult};
pub use proxy::{NginxProxy, ReverseProxy};
pub use runtime::{ContainerRuntime, DockerRuntime, StartSpec, UnitInstance, UnitState};
