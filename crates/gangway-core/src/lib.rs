//! gangway-core — target configuration and shared domain types.
//!
//! A *target* is one logical application + environment pair under
//! orchestration (e.g. "shopfront, production"), described by a
//! `gangway.toml` file. Everything downstream — validation, backups,
//! health gates, cutover — is driven from the parsed [`TargetConfig`].

pub mod config;
pub mod duration;

pub use config::{
    ConfigError, DatabaseConfig, HealthPolicy, MigrationConfig, ProxyConfig, Strategy, Strictness,
    TargetConfig, TargetSection, UnitConfig, UnitHealth, UnitRole,
};
pub use duration::parse_duration;
