//! Background task model

use crate::error::{FlightdeckError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Opaque caller-supplied key/value configuration, stored verbatim
pub type TaskParams = serde_json::Map<String, serde_json::Value>;

/// Task lifecycle status
///
/// `Pending` and `Running` are live; the other three are terminal and final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Accepted, worker not yet started
    Pending,
    /// Worker is processing units
    Running,
    /// Every unit ran (some may have failed individually)
    Completed,
    /// A fault outside any single unit stopped the task
    Failed,
    /// Stopped at a cancellation checkpoint
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = FlightdeckError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(FlightdeckError::InvalidRecord(format!(
                "unknown task status '{}'",
                other
            ))),
        }
    }
}

/// How a task's units are driven
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum ExecutionMode {
    /// One unit at a time, in subject order
    Sequential,
    /// Up to `concurrency` units at once, recorded in completion order
    Parallel { concurrency: usize },
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel { .. } => "parallel",
        }
    }

    pub fn concurrency(&self) -> usize {
        match self {
            Self::Sequential => 1,
            Self::Parallel { concurrency } => (*concurrency).max(1),
        }
    }

    /// Rebuild from the stored `mode` and `concurrency` columns
    pub fn from_parts(mode: &str, concurrency: i64) -> Result<Self> {
        match mode {
            "sequential" => Ok(Self::Sequential),
            "parallel" => Ok(Self::Parallel {
                concurrency: usize::try_from(concurrency).unwrap_or(1).max(1),
            }),
            other => Err(FlightdeckError::InvalidRecord(format!(
                "unknown execution mode '{}'",
                other
            ))),
        }
    }
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Sequential
    }
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel { concurrency } => write!(f, "parallel({})", concurrency),
        }
    }
}

/// Progress counters as last reported by the task's worker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub total_count: usize,
    pub completed_count: usize,
    pub success_count: usize,
    pub failed_count: usize,
    /// 0.0 to 100.0
    pub percent: f64,
    pub current_subject: Option<String>,
    /// Free-text stage label, e.g. `processing AAPL`
    pub current_step: Option<String>,
}

/// Partial progress write; `None` fields keep their stored value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressUpdate {
    pub current_subject: Option<String>,
    pub current_step: Option<String>,
    pub completed_count: Option<usize>,
    pub percent: Option<f64>,
    pub success_count: Option<usize>,
    pub failed_count: Option<usize>,
}

impl ProgressUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.current_subject = Some(subject.into());
        self
    }

    pub fn step(mut self, step: impl Into<String>) -> Self {
        self.current_step = Some(step.into());
        self
    }

    /// Set `completed_count` and derive `percent` from it
    pub fn completed(mut self, completed: usize, total: usize) -> Self {
        self.completed_count = Some(completed);
        self.percent = Some(percent_of(completed, total));
        self
    }

    pub fn outcomes(mut self, success: usize, failed: usize) -> Self {
        self.success_count = Some(success);
        self.failed_count = Some(failed);
        self
    }
}

/// Share of `total` that `done` represents, in percent, clamped to 0..=100
pub fn percent_of(done: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let pct = done as f64 / total as f64 * 100.0;
    (pct * 100.0).round() / 100.0
}

/// Durable record of one background task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub category: String,
    pub status: TaskStatus,
    pub mode: ExecutionMode,
    pub params: TaskParams,
    pub subjects: Vec<String>,
    pub progress: TaskProgress,
    /// Normalized output, written once when the task finishes
    pub results: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub history_record_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn total_count(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Wall time between start and completion (or now, if still running)
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some(end - started)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_and_terminality() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = "paused".parse::<TaskStatus>().unwrap_err();
        assert!(matches!(err, FlightdeckError::InvalidRecord(_)));
    }

    #[test]
    fn test_status_serde_lowercase() {
        assert_eq!(serde_json::to_string(&TaskStatus::Cancelled).unwrap(), "\"cancelled\"");
    }

    #[test]
    fn test_execution_mode_parts() {
        assert_eq!(ExecutionMode::from_parts("sequential", 1).unwrap(), ExecutionMode::Sequential);
        assert_eq!(
            ExecutionMode::from_parts("parallel", 4).unwrap(),
            ExecutionMode::Parallel { concurrency: 4 }
        );
        assert_eq!(ExecutionMode::from_parts("parallel", 0).unwrap().concurrency(), 1);
        assert!(ExecutionMode::from_parts("round_robin", 2).is_err());
        assert_eq!(ExecutionMode::Parallel { concurrency: 0 }.concurrency(), 1);
    }

    #[test]
    fn test_percent_of() {
        assert_eq!(percent_of(0, 5), 0.0);
        assert_eq!(percent_of(2, 5), 40.0);
        assert_eq!(percent_of(1, 3), 33.33);
        assert_eq!(percent_of(5, 5), 100.0);
        assert_eq!(percent_of(0, 0), 100.0);
    }

    #[test]
    fn test_progress_update_builder() {
        let update = ProgressUpdate::new()
            .subject("MSFT")
            .step("processing MSFT")
            .completed(3, 4)
            .outcomes(2, 1);

        assert_eq!(update.current_subject.as_deref(), Some("MSFT"));
        assert_eq!(update.completed_count, Some(3));
        assert_eq!(update.percent, Some(75.0));
        assert_eq!(update.success_count, Some(2));
        assert_eq!(update.failed_count, Some(1));
    }
}
