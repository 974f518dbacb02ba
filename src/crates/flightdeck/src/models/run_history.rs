//! Run history model
//!
//! One record per completed multi-unit task, kept independently of the task
//! row so retention cleanup of tasks does not erase the summary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A persisted run summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: i64,
    pub task_id: String,
    pub category: String,
    pub subject_count: usize,
    pub mode: String,
    pub success_count: usize,
    pub failed_count: usize,
    pub elapsed_secs: f64,
    pub results: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for [`RunRecord`]
#[derive(Debug, Clone)]
pub struct NewRunRecord {
    pub task_id: String,
    pub category: String,
    pub subject_count: usize,
    pub mode: String,
    pub success_count: usize,
    pub failed_count: usize,
    pub elapsed_secs: f64,
    pub results: serde_json::Value,
}

/// Aggregates over the whole history table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total_records: usize,
    pub total_subjects: usize,
    pub total_success: usize,
    pub total_failed: usize,
    /// Rounded to two decimals
    pub average_elapsed_secs: f64,
    /// `total_success / total_subjects` in percent, rounded to two decimals
    pub success_rate: f64,
}

impl RunStatistics {
    pub(crate) fn from_totals(
        total_records: usize,
        total_subjects: usize,
        total_success: usize,
        total_failed: usize,
        average_elapsed_secs: f64,
    ) -> Self {
        let success_rate = if total_subjects > 0 {
            round2(total_success as f64 / total_subjects as f64 * 100.0)
        } else {
            0.0
        };

        Self {
            total_records,
            total_subjects,
            total_success,
            total_failed,
            average_elapsed_secs: round2(average_elapsed_secs),
            success_rate,
        }
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
