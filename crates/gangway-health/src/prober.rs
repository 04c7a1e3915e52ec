//! Health prober — polls a deployed unit until it converges.
//!
//! State machine per unit: `Starting → Healthy`, `Starting → Unhealthy`,
//! or `Starting → TimedOut`. Unhealthy is terminal — there are no retries
//! at this layer beyond the descriptor's own retry count; gate policy
//! belongs to the orchestrator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use gangway_core::{HealthPolicy, UnitConfig};
use gangway_exec::{ContainerRuntime, UnitState};

use crate::probe::{ProbeResponse, http_probe};

/// Overall deadline for direct-strategy deploys.
pub const DIRECT_DEADLINE: Duration = Duration::from_secs(60);

/// Overall deadline for blue-green deploys — migrations need longer warmup.
pub const BLUE_GREEN_DEADLINE: Duration = Duration::from_secs(120);

/// Terminal outcome of probing one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthOutcome {
    Healthy,
    /// Definitive refusal: wrong status past the grace period, retries
    /// exhausted — or a policy violation.
    Unhealthy { reason: String },
    /// The deadline passed without convergence. Treated like Unhealthy by
    /// callers; distinguished only in logs.
    TimedOut,
}

impl HealthOutcome {
    pub fn is_healthy(&self) -> bool {
        *self == HealthOutcome::Healthy
    }
}

/// Polls unit liveness until healthy, unhealthy, or out of time.
pub struct HealthProber {
    runtime: Arc<dyn ContainerRuntime>,
    poll_interval: Duration,
}

impl HealthProber {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self {
            runtime,
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Override the poll interval (tests use a tight loop).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Probe `instance` (listening on `port`) until it converges.
    ///
    /// A unit without a health descriptor converges by policy: under
    /// `RunningIsHealthy` it is healthy once the runtime reports it
    /// running; under `RequireHealthcheck` it is immediately unhealthy.
    pub async fn await_healthy(
        &self,
        instance: &str,
        port: u16,
        unit: &UnitConfig,
        policy: HealthPolicy,
        deadline: Duration,
    ) -> HealthOutcome {
        let Some(health) = &unit.health else {
            return match policy {
                HealthPolicy::RunningIsHealthy => self.await_running(instance, deadline).await,
                HealthPolicy::RequireHealthcheck => {
                    warn!(%instance, "unit has no health check under strict policy");
                    HealthOutcome::Unhealthy {
                        reason: "no health check declared".to_string(),
                    }
                }
            };
        };

        let address = format!("127.0.0.1:{port}");
        let started = Instant::now();
        let grace = health.start_grace();
        let mut refusals: u32 = 0;

        loop {
            if started.elapsed() >= deadline {
                warn!(%instance, deadline_secs = deadline.as_secs(), "health probe deadline passed");
                return HealthOutcome::TimedOut;
            }

            let response = http_probe(&address, &health.path, health.timeout()).await;
            match response {
                _ if response.matches(health.expect_status) => {
                    info!(%instance, elapsed_ms = started.elapsed().as_millis() as u64, "unit healthy");
                    return HealthOutcome::Healthy;
                }
                ProbeResponse::Status(status) if started.elapsed() >= grace => {
                    refusals += 1;
                    debug!(%instance, status, refusals, "unexpected health status");
                    if refusals >= health.retries {
                        return HealthOutcome::Unhealthy {
                            reason: format!(
                                "status {status}, expected {} at {}",
                                health.expect_status, health.path
                            ),
                        };
                    }
                }
                _ => {
                    // Not listening yet, or still within the start grace
                    // period — neither is a definitive refusal.
                    refusals = 0;
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Convergence for units without a health check: observed running.
    async fn await_running(&self, instance: &str, deadline: Duration) -> HealthOutcome {
        let started = Instant::now();
        loop {
            match self.runtime.unit_state(instance).await {
                Ok(UnitState::Running) => {
                    info!(%instance, "unit running (no health check declared)");
                    return HealthOutcome::Healthy;
                }
                Ok(state) => {
                    debug!(%instance, ?state, "unit not running yet");
                }
                Err(e) => {
                    debug!(%instance, error = %e, "runtime state query failed");
                }
            }
            if started.elapsed() >= deadline {
                return HealthOutcome::TimedOut;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{port_of, serve_status};
    use gangway_core::{UnitHealth, UnitRole};
    use gangway_exec::fake::FakeRuntime;

    fn unit_with_health(port: u16, retries: u32) -> UnitConfig {
        UnitConfig {
            name: "api".to_string(),
            image: "registry.local/api".to_string(),
            port,
            role: UnitRole::Api,
            health: Some(UnitHealth {
                path: "/healthz".to_string(),
                expect_status: 200,
                timeout: "1s".to_string(),
                retries,
                start_grace: "0s".to_string(),
            }),
        }
    }

    fn unit_without_health() -> UnitConfig {
        UnitConfig {
            name: "worker".to_string(),
            image: "registry.local/worker".to_string(),
            port: 9000,
            role: UnitRole::None,
            health: None,
        }
    }

    fn prober(runtime: Arc<FakeRuntime>) -> HealthProber {
        HealthProber::new(runtime).with_poll_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn healthy_endpoint_converges() {
        let address = serve_status(200).await;
        let unit = unit_with_health(port_of(&address), 3);
        let outcome = prober(Arc::new(FakeRuntime::new()))
            .await_healthy(
                "api",
                unit.port,
                &unit,
                HealthPolicy::RunningIsHealthy,
                Duration::from_secs(5),
            )
            .await;
        assert!(outcome.is_healthy());
    }

    #[tokio::test]
    async fn wrong_status_is_unhealthy_after_retries() {
        let address = serve_status(500).await;
        let unit = unit_with_health(port_of(&address), 2);
        let outcome = prober(Arc::new(FakeRuntime::new()))
            .await_healthy(
                "api",
                unit.port,
                &unit,
                HealthPolicy::RunningIsHealthy,
                Duration::from_secs(5),
            )
            .await;
        match outcome {
            HealthOutcome::Unhealthy { reason } => assert!(reason.contains("500")),
            other => panic!("expected Unhealthy, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn never_listening_times_out() {
        let unit = unit_with_health(1, 3); // Port 1: nothing listens there.
        let outcome = prober(Arc::new(FakeRuntime::new()))
            .await_healthy(
                "api",
                unit.port,
                &unit,
                HealthPolicy::RunningIsHealthy,
                Duration::from_millis(300),
            )
            .await;
        assert_eq!(outcome, HealthOutcome::TimedOut);
    }

    #[tokio::test]
    async fn no_healthcheck_running_is_healthy() {
        let runtime = Arc::new(FakeRuntime::new().with_unit("worker", "registry.local/worker:v1", true));
        let outcome = prober(runtime)
            .await_healthy(
                "worker",
                9000,
                &unit_without_health(),
                HealthPolicy::RunningIsHealthy,
                Duration::from_secs(1),
            )
            .await;
        assert!(outcome.is_healthy());
    }

    #[tokio::test]
    async fn no_healthcheck_not_running_times_out() {
        let runtime = Arc::new(FakeRuntime::new().with_unit("worker", "registry.local/worker:v1", false));
        let outcome = prober(runtime)
            .await_healthy(
                "worker",
                9000,
                &unit_without_health(),
                HealthPolicy::RunningIsHealthy,
                Duration::from_millis(200),
            )
            .await;
        assert_eq!(outcome, HealthOutcome::TimedOut);
    }

    #[tokio::test]
    async fn strict_policy_rejects_missing_healthcheck() {
        let runtime = Arc::new(FakeRuntime::new().with_unit("worker", "registry.local/worker:v1", true));
        let outcome = prober(runtime)
            .await_healthy(
                "worker",
                9000,
                &unit_without_health(),
                HealthPolicy::RequireHealthcheck,
                Duration::from_secs(1),
            )
            .await;
        assert!(matches!(outcome, HealthOutcome::Unhealthy { .. }));
    }
}
