//! Run history repository

use crate::db::Database;
use crate::error::{FlightdeckError, Result};
use crate::models::{from_millis, now_millis, NewRunRecord, RunRecord, RunStatistics};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;

/// Default page size for [`RunHistoryRepository::list`]
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Clone, Debug)]
pub struct RunHistoryRepository {
    db: Arc<Database>,
}

impl RunHistoryRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a run summary and return its id
    pub async fn record(&self, run: &NewRunRecord) -> Result<i64> {
        let results = serde_json::to_string(&run.results)?;

        let result = sqlx::query(
            "INSERT INTO run_history
                (task_id, category, subject_count, mode, success_count, failed_count, elapsed_secs, results, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&run.task_id)
        .bind(&run.category)
        .bind(run.subject_count as i64)
        .bind(&run.mode)
        .bind(run.success_count as i64)
        .bind(run.failed_count as i64)
        .bind(run.elapsed_secs)
        .bind(results)
        .bind(now_millis())
        .execute(self.db.pool())
        .await
        .map_err(|e| FlightdeckError::Database(format!("Failed to record run history: {}", e)))?;

        Ok(result.last_insert_rowid())
    }

    /// Newest records first
    pub async fn list(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let rows = sqlx::query(
            "SELECT id, task_id, category, subject_count, mode, success_count, failed_count,
                    elapsed_secs, results, created_at
             FROM run_history
             ORDER BY created_at DESC, id DESC
             LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| FlightdeckError::Database(format!("Failed to list run history: {}", e)))?;

        rows.iter().map(row_to_record).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Option<RunRecord>> {
        let row = sqlx::query(
            "SELECT id, task_id, category, subject_count, mode, success_count, failed_count,
                    elapsed_secs, results, created_at
             FROM run_history WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| FlightdeckError::Database(format!("Failed to load run history: {}", e)))?;

        row.as_ref().map(row_to_record).transpose()
    }

    pub async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM run_history WHERE id = ?")
            .bind(id)
            .execute(self.db.pool())
            .await
            .map_err(|e| FlightdeckError::Database(format!("Failed to delete run history: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn statistics(&self) -> Result<RunStatistics> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS records,
                    COALESCE(SUM(subject_count), 0) AS subjects,
                    COALESCE(SUM(success_count), 0) AS success,
                    COALESCE(SUM(failed_count), 0) AS failed,
                    COALESCE(AVG(elapsed_secs), 0.0) AS avg_elapsed
             FROM run_history",
        )
        .fetch_one(self.db.pool())
        .await
        .map_err(|e| FlightdeckError::Database(format!("Failed to compute run statistics: {}", e)))?;

        Ok(RunStatistics::from_totals(
            count(&row, "records")?,
            count(&row, "subjects")?,
            count(&row, "success")?,
            count(&row, "failed")?,
            row.try_get("avg_elapsed")?,
        ))
    }
}

fn count(row: &SqliteRow, column: &str) -> Result<usize> {
    let value: i64 = row.try_get(column)?;
    usize::try_from(value)
        .map_err(|_| FlightdeckError::InvalidRecord(format!("negative {}: {}", column, value)))
}

fn row_to_record(row: &SqliteRow) -> Result<RunRecord> {
    let results: String = row.try_get("results")?;

    Ok(RunRecord {
        id: row.try_get("id")?,
        task_id: row.try_get("task_id")?,
        category: row.try_get("category")?,
        subject_count: count(row, "subject_count")?,
        mode: row.try_get("mode")?,
        success_count: count(row, "success_count")?,
        failed_count: count(row, "failed_count")?,
        elapsed_secs: row.try_get("elapsed_secs")?,
        results: serde_json::from_str(&results)?,
        created_at: from_millis(row.try_get("created_at")?)?,
    })
}
