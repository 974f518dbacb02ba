//! Configuration management for flightdeck
//!
//! Supports dual-location configuration:
//! - User-level: ~/.flightdeck/flightdeck.toml
//! - Project-level: ./.flightdeck/flightdeck.toml
//!
//! Project-level config overrides user-level config.

mod loader;
mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    DatabaseConfig, ExecutionConfig, FlightdeckConfig, LoggingConfig, RetentionConfig,
};

use crate::Result;

/// Load configuration: defaults, then the user file, then the project file
pub async fn load_config() -> Result<FlightdeckConfig> {
    ConfigLoader::new().load().await
}
