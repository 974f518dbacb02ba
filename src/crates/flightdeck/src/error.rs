//! Error types for flightdeck
//!
//! Business outcomes (a busy category, a failed work unit, a cancelled task)
//! are reported as data. `FlightdeckError` covers the infrastructure faults
//! underneath them: storage, configuration, and I/O.

use thiserror::Error;

/// Result type alias for flightdeck operations
pub type Result<T> = std::result::Result<T, FlightdeckError>;

#[derive(Debug, Error)]
pub enum FlightdeckError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// A persisted row could not be decoded back into a task or history record
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("SQL error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    Other(String),
}

impl From<String> for FlightdeckError {
    fn from(s: String) -> Self {
        Self::Other(s)
    }
}

impl From<&str> for FlightdeckError {
    fn from(s: &str) -> Self {
        Self::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = FlightdeckError::Database("pool closed".to_string());
        assert_eq!(err.to_string(), "Database error: pool closed");

        let err = FlightdeckError::NotFound("task abc".to_string());
        assert_eq!(err.to_string(), "Not found: task abc");

        let err: FlightdeckError = "plain message".into();
        assert_eq!(err.to_string(), "plain message");
    }

    #[test]
    fn test_from_serde_error() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: FlightdeckError = parse.into();
        assert!(matches!(err, FlightdeckError::Serde(_)));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: FlightdeckError = io.into();
        assert!(err.to_string().starts_with("IO error"));
    }
}
