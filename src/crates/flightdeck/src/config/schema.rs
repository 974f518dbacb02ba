//! Configuration schema

use crate::error::{FlightdeckError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Directory under the home directory holding user config and the default database
pub const HOME_DIR_NAME: &str = ".flightdeck";

/// Main flightdeck configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct FlightdeckConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub execution: ExecutionConfig,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file path (relative to ~/.flightdeck or absolute).
    /// `${VAR}` is expanded from the environment.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "flightdeck.db".to_string(),
        }
    }
}

/// Execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Pool size for parallel tasks that do not request one
    pub default_concurrency: usize,

    /// Deadline for a single work unit in seconds; 0 disables it
    pub unit_timeout_secs: u64,

    /// Fail live rows left by a previous process when the scheduler opens
    pub reap_orphans_on_start: bool,

    /// Default page size for recent-task listings
    pub recent_limit: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 3,
            unit_timeout_secs: 300,
            reap_orphans_on_start: true,
            recent_limit: 20,
        }
    }
}

impl ExecutionConfig {
    pub fn unit_timeout(&self) -> Option<Duration> {
        (self.unit_timeout_secs > 0).then(|| Duration::from_secs(self.unit_timeout_secs))
    }
}

/// Retention of finished tasks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    /// Terminal tasks older than this many days are removed by `cleanup`
    pub max_age_days: u32,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { max_age_days: 7 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence when set.
    pub level: String,

    /// Log format: "compact", "pretty", "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

impl FlightdeckConfig {
    /// Expand `${VAR}` references in string settings
    pub fn resolve_env_vars(&mut self) {
        self.database.path = Self::expand_env_var(&self.database.path);
    }

    fn expand_env_var(value: &str) -> String {
        match value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
            Some(var_name) => std::env::var(var_name).unwrap_or_else(|_| value.to_string()),
            None => value.to_string(),
        }
    }

    /// Check settings the engine cannot work around
    pub fn validate(&self) -> Result<()> {
        if self.execution.default_concurrency == 0 {
            return Err(FlightdeckError::Config(
                "execution.default_concurrency must be at least 1".to_string(),
            ));
        }
        if self.database.path.trim().is_empty() {
            return Err(FlightdeckError::Config("database.path is empty".to_string()));
        }
        if !matches!(self.logging.format.as_str(), "compact" | "pretty" | "json") {
            return Err(FlightdeckError::Config(format!(
                "unknown logging.format '{}'",
                self.logging.format
            )));
        }
        Ok(())
    }

    /// Resolved database path. Relative paths live under ~/.flightdeck
    /// (or ./.flightdeck when there is no home directory).
    pub fn database_path(&self) -> PathBuf {
        let path = PathBuf::from(&self.database.path);
        if path.is_absolute() {
            return path;
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(HOME_DIR_NAME)
            .join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FlightdeckConfig::default();
        assert_eq!(config.database.path, "flightdeck.db");
        assert_eq!(config.execution.default_concurrency, 3);
        assert_eq!(config.execution.unit_timeout(), Some(Duration::from_secs(300)));
        assert!(config.execution.reap_orphans_on_start);
        assert_eq!(config.retention.max_age_days, 7);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let execution = ExecutionConfig {
            unit_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(execution.unit_timeout(), None);
    }

    #[test]
    fn test_partial_section_keeps_field_defaults() {
        let config: FlightdeckConfig = toml::from_str(
            r#"
[execution]
unit_timeout_secs = 60
"#,
        )
        .unwrap();

        assert_eq!(config.execution.unit_timeout_secs, 60);
        assert_eq!(config.execution.default_concurrency, 3);
        assert_eq!(config.logging.format, "compact");
    }

    #[test]
    fn test_env_var_expansion() {
        let mut config = FlightdeckConfig::default();
        config.database.path = "${FLIGHTDECK_TEST_DB_PATH}".to_string();

        std::env::set_var("FLIGHTDECK_TEST_DB_PATH", "/tmp/flightdeck-env.db");
        config.resolve_env_vars();
        std::env::remove_var("FLIGHTDECK_TEST_DB_PATH");

        assert_eq!(config.database.path, "/tmp/flightdeck-env.db");
    }

    #[test]
    fn test_unset_env_var_left_verbatim() {
        let mut config = FlightdeckConfig::default();
        config.database.path = "${FLIGHTDECK_DEFINITELY_UNSET}".to_string();
        config.resolve_env_vars();
        assert_eq!(config.database.path, "${FLIGHTDECK_DEFINITELY_UNSET}");
    }

    #[test]
    fn test_database_path_resolution() {
        let config = FlightdeckConfig::default();
        let path = config.database_path();
        assert!(path.ends_with(".flightdeck/flightdeck.db"));

        let mut config = FlightdeckConfig::default();
        config.database.path = "/tmp/tasks.db".to_string();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/tasks.db"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = FlightdeckConfig::default();
        config.execution.default_concurrency = 0;
        assert!(matches!(config.validate(), Err(FlightdeckError::Config(_))));

        let mut config = FlightdeckConfig::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }
}
