//! gangway-health — the two gates between "deployed" and "serving traffic".
//!
//! - [`HealthProber`] polls a workload unit's liveness until it converges:
//!   `Healthy`, `Unhealthy`, or `TimedOut`. Callers treat the latter two
//!   identically; they differ only in logs.
//! - [`SmokeTester`] runs a handful of direct in-process HTTP requests
//!   against freshly deployed units — after health, before cutover, never
//!   through the reverse proxy. A smoke failure means production traffic
//!   was never at risk, because routing has not been touched yet.

pub mod probe;
pub mod prober;
pub mod smoke;

#[cfg(test)]
pub(crate) mod testutil;

pub use probe::{ProbeResponse, http_probe};
pub use prober::{HealthOutcome, HealthProber};
pub use smoke::{SmokeReport, SmokeTarget, SmokeTester};
