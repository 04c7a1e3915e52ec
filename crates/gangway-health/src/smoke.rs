//! Smoke tester — lightweight functional probes before cutover.
//!
//! Runs after units report healthy and before any traffic change. Each
//! unit with a recognizable role gets a primary and a fallback path; a
//! unit fails only when every probed path fails every attempt.

use std::time::Duration;

use tracing::{info, warn};

use gangway_core::UnitRole;

use crate::probe::http_probe;

/// One unit to smoke-test.
#[derive(Debug, Clone)]
pub struct SmokeTarget {
    /// Instance (container) name, for reporting.
    pub instance: String,
    /// Port the new instance listens on.
    pub port: u16,
    pub role: UnitRole,
}

/// A unit that failed all its probed paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeFailure {
    pub instance: String,
    /// Paths attempted, for the failure report.
    pub attempted: Vec<String>,
}

/// Result of a smoke run.
#[derive(Debug, Clone, Default)]
pub struct SmokeReport {
    /// Number of units actually probed (role != none).
    pub probed: usize,
    pub failures: Vec<SmokeFailure>,
}

impl SmokeReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Probe paths for a role: primary first, then fallback.
fn paths_for(role: UnitRole) -> &'static [&'static str] {
    match role {
        UnitRole::Api => &["/api/health", "/api/status"],
        UnitRole::Content => &["/", "/index.html"],
        UnitRole::None => &[],
    }
}

/// Runs direct in-process HTTP probes against new units.
pub struct SmokeTester {
    attempts: u32,
    request_timeout: Duration,
}

impl Default for SmokeTester {
    fn default() -> Self {
        Self {
            attempts: 2,
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl SmokeTester {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Smoke-test every target. Units with no role are skipped.
    pub async fn run(&self, targets: &[SmokeTarget]) -> SmokeReport {
        let mut report = SmokeReport::default();

        for target in targets {
            let paths = paths_for(target.role);
            if paths.is_empty() {
                continue;
            }
            report.probed += 1;

            let address = format!("127.0.0.1:{}", target.port);
            let mut passed = false;
            'paths: for path in paths {
                for _ in 0..self.attempts {
                    let response = http_probe(&address, path, self.request_timeout).await;
                    if response.is_success() {
                        info!(instance = %target.instance, path, "smoke probe passed");
                        passed = true;
                        break 'paths;
                    }
                }
            }

            if !passed {
                warn!(instance = %target.instance, "smoke test failed on all paths");
                report.failures.push(SmokeFailure {
                    instance: target.instance.clone(),
                    attempted: paths.iter().map(|p| p.to_string()).collect(),
                });
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{port_of, serve_status};

    fn tester() -> SmokeTester {
        SmokeTester::new().with_request_timeout(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn healthy_api_unit_passes() {
        let address = serve_status(200).await;
        let report = tester()
            .run(&[SmokeTarget {
                instance: "api-green".to_string(),
                port: port_of(&address),
                role: UnitRole::Api,
            }])
            .await;
        assert!(report.passed());
        assert_eq!(report.probed, 1);
    }

    #[tokio::test]
    async fn failing_unit_reports_all_paths() {
        let address = serve_status(500).await;
        let report = tester()
            .run(&[SmokeTarget {
                instance: "api-green".to_string(),
                port: port_of(&address),
                role: UnitRole::Api,
            }])
            .await;
        assert!(!report.passed());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].attempted,
            vec!["/api/health".to_string(), "/api/status".to_string()]
        );
    }

    #[tokio::test]
    async fn roleless_units_are_skipped() {
        // Nothing listens on port 1; the unit must still be skipped, not failed.
        let report = tester()
            .run(&[SmokeTarget {
                instance: "worker".to_string(),
                port: 1,
                role: UnitRole::None,
            }])
            .await;
        assert!(report.passed());
        assert_eq!(report.probed, 0);
    }

    #[tokio::test]
    async fn content_unit_uses_root_paths() {
        let address = serve_status(200).await;
        let report = tester()
            .run(&[SmokeTarget {
                instance: "web-green".to_string(),
                port: port_of(&address),
                role: UnitRole::Content,
            }])
            .await;
        assert!(report.passed());
    }

    #[tokio::test]
    async fn unreachable_unit_fails() {
        let report = tester()
            .run(&[SmokeTarget {
                instance: "api-green".to_string(),
                port: 1,
                role: UnitRole::Api,
            }])
            .await;
        assert!(!report.passed());
    }
}
