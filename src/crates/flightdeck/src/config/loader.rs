//! Configuration loader with dual-location support
//!
//! Loads configuration from:
//! 1. Default values
//! 2. User-level config: ~/.flightdeck/flightdeck.toml
//! 3. Project-level config: ./.flightdeck/flightdeck.toml
//!
//! Later configs override earlier ones, section by section: a section present
//! in the project file replaces the whole user section.

use crate::config::schema::{FlightdeckConfig, HOME_DIR_NAME};
use crate::error::{FlightdeckError, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use toml::Table;
use tracing::debug;

const CONFIG_FILE_NAME: &str = "flightdeck.toml";

/// Configuration loader that handles both user and project configs
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_config_path: PathBuf,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            user_config_path: dirs::home_dir()
                .map(|home| home.join(HOME_DIR_NAME).join(CONFIG_FILE_NAME)),
            project_config_path: std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(HOME_DIR_NAME)
                .join(CONFIG_FILE_NAME),
        }
    }

    /// Loader reading from explicit paths
    pub fn with_paths(user_config_path: Option<PathBuf>, project_config_path: PathBuf) -> Self {
        Self {
            user_config_path,
            project_config_path,
        }
    }

    /// Load configuration with project config taking precedence.
    ///
    /// Missing files are skipped; files that exist but do not parse are errors.
    pub async fn load(&self) -> Result<FlightdeckConfig> {
        let mut merged = Table::new();

        if let Some(user_path) = &self.user_config_path {
            if let Some(user_table) = Self::load_optional(user_path).await? {
                debug!(path = %user_path.display(), "Loaded user-level config");
                merge_sections(&mut merged, user_table);
            }
        }

        if let Some(project_table) = Self::load_optional(&self.project_config_path).await? {
            debug!(path = %self.project_config_path.display(), "Loaded project-level config");
            merge_sections(&mut merged, project_table);
        }

        let mut config: FlightdeckConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e| FlightdeckError::Config(format!("Invalid configuration: {}", e)))?;
        config.resolve_env_vars();
        config.validate()?;
        Ok(config)
    }

    /// Load a single file, failing if it is missing
    pub async fn load_from_path(path: &Path) -> Result<FlightdeckConfig> {
        let table = Self::load_optional(path).await?.ok_or_else(|| {
            FlightdeckError::Config(format!("Config file not found: {}", path.display()))
        })?;
        let mut config: FlightdeckConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e| FlightdeckError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.resolve_env_vars();
        config.validate()?;
        Ok(config)
    }

    async fn load_optional(path: &Path) -> Result<Option<Table>> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            debug!(path = %path.display(), "Config file not present");
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .await
            .map_err(|e| FlightdeckError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let table = toml::from_str::<Table>(&content)
            .map_err(|e| FlightdeckError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

        Ok(Some(table))
    }

    pub fn user_config_path(&self) -> Option<&Path> {
        self.user_config_path.as_deref()
    }

    pub fn project_config_path(&self) -> &Path {
        &self.project_config_path
    }
}

/// Top-level sections in `overlay` replace the same sections in `base`
fn merge_sections(base: &mut Table, overlay: Table) {
    for (section, value) in overlay {
        base.insert(section, value);
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
