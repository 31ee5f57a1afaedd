//! Configuration settings structures for jobmill
//!
//! This module defines all configuration structures that can be loaded from
//! TOML files and environment variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;
use crate::logger::LoggerConfig;
use crate::notify::WebhookSinkConfig;

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "jobmill".to_string()
}

fn default_app_version() -> String {
    crate::pkg_version().to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_worker_count() -> usize {
    4
}

fn default_scheduler_tick_secs() -> u64 {
    5
}

fn default_watchdog_period_secs() -> u64 {
    300
}

fn default_stuck_timeout_secs() -> u64 {
    3600
}

fn default_sweeper_period_secs() -> u64 {
    86_400
}

fn default_retention_days() -> i64 {
    30
}

fn default_max_retries() -> i32 {
    3
}

fn default_shutdown_grace_secs() -> u64 {
    30
}

// ============================================================================
// Application Configuration
// ============================================================================

/// Application basic information configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Application version
    #[serde(default = "default_app_version")]
    pub version: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

// ============================================================================
// Database Configuration
// ============================================================================

/// Diesel database connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[serde(default)]
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Whether to automatically run pending migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout: default_connection_timeout(),
            auto_migrate: false,
        }
    }
}

// ============================================================================
// Engine Configuration
// ============================================================================

/// Job engine tuning knobs: pool size, loop periods, timeouts, retention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent worker slots
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Scheduler polling period in seconds
    #[serde(default = "default_scheduler_tick_secs")]
    pub scheduler_tick_secs: u64,

    /// Watchdog scan period in seconds
    #[serde(default = "default_watchdog_period_secs")]
    pub watchdog_period_secs: u64,

    /// How long a job may sit in RUNNING before the watchdog fails it
    #[serde(default = "default_stuck_timeout_secs")]
    pub stuck_timeout_secs: u64,

    /// Retention sweeper period in seconds
    #[serde(default = "default_sweeper_period_secs")]
    pub sweeper_period_secs: u64,

    /// Days a terminal job is kept before deletion
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Default max_retries applied at submission
    #[serde(default = "default_max_retries")]
    pub default_max_retries: i32,

    /// Grace period for draining in-flight jobs on shutdown
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl EngineConfig {
    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_secs)
    }

    pub fn watchdog_period(&self) -> Duration {
        Duration::from_secs(self.watchdog_period_secs)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_secs)
    }

    pub fn sweeper_period(&self) -> Duration {
        Duration::from_secs(self.sweeper_period_secs)
    }

    pub fn retention_age(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            scheduler_tick_secs: default_scheduler_tick_secs(),
            watchdog_period_secs: default_watchdog_period_secs(),
            stuck_timeout_secs: default_stuck_timeout_secs(),
            sweeper_period_secs: default_sweeper_period_secs(),
            retention_days: default_retention_days(),
            default_max_retries: default_max_retries(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

// ============================================================================
// Notifications Configuration
// ============================================================================

/// Status sink configuration. With no webhook configured the engine uses
/// the no-op sink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Optional webhook destination for status pushes
    #[serde(default)]
    pub webhook: Option<WebhookSinkConfig>,
}

// ============================================================================
// Root Settings
// ============================================================================

/// Root configuration aggregating all sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub notifications: NotificationsConfig,

    #[serde(default)]
    pub logging: LoggerConfig,
}

impl Settings {
    /// Validate the loaded configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.worker_count == 0 {
            return Err(ConfigError::invalid(
                "engine.worker_count",
                "must be at least 1",
            ));
        }

        if self.engine.scheduler_tick_secs == 0 {
            return Err(ConfigError::invalid(
                "engine.scheduler_tick_secs",
                "must be greater than zero",
            ));
        }

        if self.engine.watchdog_period_secs == 0 {
            return Err(ConfigError::invalid(
                "engine.watchdog_period_secs",
                "must be greater than zero",
            ));
        }

        if self.engine.stuck_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "engine.stuck_timeout_secs",
                "must be greater than zero",
            ));
        }

        if self.engine.sweeper_period_secs == 0 {
            return Err(ConfigError::invalid(
                "engine.sweeper_period_secs",
                "must be greater than zero",
            ));
        }

        if self.engine.retention_days <= 0 {
            return Err(ConfigError::invalid(
                "engine.retention_days",
                "must be at least 1",
            ));
        }

        if self.engine.default_max_retries < 0 {
            return Err(ConfigError::invalid(
                "engine.default_max_retries",
                "must not be negative",
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::invalid(
                "database.min_connections",
                "must not exceed database.max_connections",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn zero_workers_is_rejected() {
        let mut settings = Settings::default();
        settings.engine.worker_count = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn deserializes_partial_toml() {
        let settings: Settings = toml::from_str(
            r#"
            [engine]
            worker_count = 8
            scheduler_tick_secs = 1

            [database]
            url = "postgres://localhost/jobs"
            "#,
        )
        .unwrap();

        assert_eq!(settings.engine.worker_count, 8);
        assert_eq!(settings.engine.scheduler_tick_secs, 1);
        assert_eq!(settings.engine.default_max_retries, 3);
        assert_eq!(settings.database.url, "postgres://localhost/jobs");
    }
}
