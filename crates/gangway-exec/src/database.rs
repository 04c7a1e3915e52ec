//! Database engine client.
//!
//! Backups use the engine's logical dump format, never raw file copies; a
//! restore drops and recreates the logical database before loading the
//! dump. All four operations fail loudly rather than partially succeed.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{ExecError, ExecResult};
use crate::process::run_with_timeout;

/// Synchronous request/response surface over the database engine.
#[async_trait]
pub trait DatabaseEngine: Send + Sync {
    /// Write a logical dump of the database to `path`. Returns dump size.
    async fn dump_to(&self, path: &Path) -> ExecResult<u64>;

    /// Drop the logical database if it exists.
    async fn drop_database(&self) -> ExecResult<()>;

    /// Create the logical database.
    async fn create_database(&self) -> ExecResult<()>;

    /// Load a logical dump from `path` into the database.
    async fn restore_from(&self, path: &Path) -> ExecResult<()>;
}

/// Postgres implementation — pg_dump / psql / pg_restore inside the
/// database's own container.
#[derive(Debug, Clone)]
pub struct PostgresEngine {
    container: String,
    database: String,
    user: String,
    docker_binary: String,
    timeout: Duration,
}

impl PostgresEngine {
    pub fn new(container: &str, database: &str, user: &str) -> Self {
        Self {
            container: container.to_string(),
            database: database.to_string(),
            user: user.to_string(),
            docker_binary: "docker".to_string(),
            timeout: Duration::from_secs(600),
        }
    }

    /// Run psql against the maintenance database (you cannot drop the
    /// database you are connected to).
    async fn psql_admin(&self, sql: &str) -> ExecResult<()> {
        run_with_timeout(
            &self.docker_binary,
            &[
                "exec",
                &self.container,
                "psql",
                "-U",
                &self.user,
                "-d",
                "postgres",
                "-v",
                "ON_ERROR_STOP=1",
                "-c",
                sql,
            ],
            None,
            self.timeout,
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl DatabaseEngine for PostgresEngine {
    async fn dump_to(&self, path: &Path) -> ExecResult<u64> {
        info!(database = %self.database, dest = %path.display(), "dumping database");
        let out = run_with_timeout(
            &self.docker_binary,
            &[
                "exec",
                &self.container,
                "pg_dump",
                "-U",
                &self.user,
                "--format=custom",
                &self.database,
            ],
            None,
            self.timeout,
        )
        .await?;

        std::fs::write(path, &out.stdout).map_err(|source| ExecError::Io {
            command: format!("write dump {}", path.display()),
            source,
        })?;
        Ok(out.stdout.len() as u64)
    }

    async fn drop_database(&self) -> ExecResult<()> {
        info!(database = %self.database, "dropping database");
        self.psql_admin(&format!("DROP DATABASE IF EXISTS \"{}\"", self.database))
            .await
    }

    async fn create_database(&self) -> ExecResult<()> {
        info!(database = %self.database, "creating database");
        self.psql_admin(&format!(
            "CREATE DATABASE \"{}\" OWNER \"{}\"",
            self.database, self.user
        ))
        .await
    }

    async fn restore_from(&self, path: &Path) -> ExecResult<()> {
        info!(database = %self.database, src = %path.display(), "restoring database");
        let dump = std::fs::read(path).map_err(|source| ExecError::Io {
            command: format!("read dump {}", path.display()),
            source,
        })?;

        run_with_timeout(
            &self.docker_binary,
            &[
                "exec",
                "-i",
                &self.container,
                "pg_restore",
                "-U",
                &self.user,
                "-d",
                &self.database,
                "--no-owner",
            ],
            Some(&dump),
            self.timeout,
        )
        .await?;
        Ok(())
    }
}
