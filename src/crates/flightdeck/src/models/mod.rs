//! Domain models for flightdeck
//!
//! Background task records and the run history kept for completed batches.

pub mod run_history;
pub mod task;

pub use run_history::{NewRunRecord, RunRecord, RunStatistics};
pub use task::{ExecutionMode, ProgressUpdate, Task, TaskParams, TaskProgress, TaskStatus};

use crate::error::{FlightdeckError, Result};
use chrono::{DateTime, Utc};

/// Current time in Unix milliseconds, the storage format for all timestamps
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| FlightdeckError::InvalidRecord(format!("timestamp out of range: {}", millis)))
}

pub(crate) fn from_millis_opt(millis: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    millis.map(from_millis).transpose()
}
