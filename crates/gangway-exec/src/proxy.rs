//! Reverse proxy client.
//!
//! The pipeline drives the proxy through exactly two operations: validate
//! the configuration syntax and reload routing. Reload is idempotent — it
//! re-reads whatever routing is current, no new state is passed.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::ExecResult;
use crate::process::run_with_timeout;

/// Synchronous request/response surface over the reverse proxy.
#[async_trait]
pub trait ReverseProxy: Send + Sync {
    /// Check the proxy's configuration syntax without touching live routing.
    async fn validate_config(&self) -> ExecResult<()>;

    /// Reload routing. Returns only after the proxy reports the result.
    async fn reload(&self) -> ExecResult<()>;
}

/// Nginx implementation.
///
/// When `container` is set, commands run via `docker exec` inside that
/// container (nginx deployed as a workload unit); otherwise nginx is
/// invoked directly on the host.
#[derive(Debug, Clone)]
pub struct NginxProxy {
    config_path: PathBuf,
    container: Option<String>,
    docker_binary: String,
    timeout: Duration,
}

impl NginxProxy {
    pub fn new(config_path: PathBuf, container: Option<String>) -> Self {
        Self {
            config_path,
            container,
            docker_binary: "docker".to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    async fn nginx(&self, nginx_args: &[&str]) -> ExecResult<()> {
        match &self.container {
            Some(container) => {
                let mut args = vec!["exec", container.as_str(), "nginx"];
                args.extend_from_slice(nginx_args);
                run_with_timeout(&self.docker_binary, &args, None, self.timeout).await?;
            }
            None => {
                run_with_timeout("nginx", nginx_args, None, self.timeout).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReverseProxy for NginxProxy {
    async fn validate_config(&self) -> ExecResult<()> {
        let path = self.config_path.display().to_string();
        self.nginx(&["-t", "-c", &path]).await
    }

    async fn reload(&self) -> ExecResult<()> {
        info!(config = %self.config_path.display(), "reloading reverse proxy");
        self.nginx(&["-s", "reload"]).await
    }
}
