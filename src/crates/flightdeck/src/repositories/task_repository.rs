//! Task store: durable CRUD over background task rows
//!
//! No scheduling decisions are made here. Every method is a single atomic
//! statement; the guards that keep terminal rows final live in the SQL.

use crate::db::Database;
use crate::error::{FlightdeckError, Result};
use crate::models::{from_millis, from_millis_opt, now_millis};
use crate::models::{ExecutionMode, ProgressUpdate, Task, TaskParams, TaskProgress, TaskStatus};
use crate::normalize::ResultValue;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;
use tracing::debug;

const TASK_COLUMNS: &str = "task_id, category, status, mode, concurrency, params, subjects, \
     total_count, completed_count, success_count, failed_count, current_subject, current_step, \
     progress_percent, results, error_message, history_record_id, created_at, started_at, completed_at";

const LIVE_STATUSES: &str = "('pending', 'running')";
const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled')";

const MILLIS_PER_DAY: i64 = 86_400_000;

/// Repository for background task rows
#[derive(Clone, Debug)]
pub struct TaskRepository {
    db: Arc<Database>,
}

impl TaskRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new `pending` task
    pub async fn create(
        &self,
        task_id: &str,
        category: &str,
        subjects: &[String],
        params: &TaskParams,
        mode: ExecutionMode,
    ) -> Result<()> {
        self.insert(task_id, category, subjects, params, mode, false)
            .await
            .map(|_| ())
    }

    /// Insert a new `pending` task unless the category already has a live one.
    ///
    /// The existence check and the insert are one statement, so two writers
    /// sharing the database cannot both get a live row in the same category.
    /// Returns `false` when a live row blocked the insert.
    pub async fn create_if_idle(
        &self,
        task_id: &str,
        category: &str,
        subjects: &[String],
        params: &TaskParams,
        mode: ExecutionMode,
    ) -> Result<bool> {
        self.insert(task_id, category, subjects, params, mode, true).await
    }

    async fn insert(
        &self,
        task_id: &str,
        category: &str,
        subjects: &[String],
        params: &TaskParams,
        mode: ExecutionMode,
        exclusive: bool,
    ) -> Result<bool> {
        let params_json = serde_json::to_string(params)?;
        let subjects_json = serde_json::to_string(subjects)?;

        let mut sql = String::from(
            "INSERT INTO background_tasks
                (task_id, category, status, mode, concurrency, params, subjects, total_count, created_at)
             SELECT ?, ?, 'pending', ?, ?, ?, ?, ?, ?",
        );
        if exclusive {
            sql.push_str(&format!(
                " WHERE NOT EXISTS (SELECT 1 FROM background_tasks WHERE category = ? AND status IN {})",
                LIVE_STATUSES
            ));
        }

        let mut query = sqlx::query(&sql)
            .bind(task_id)
            .bind(category)
            .bind(mode.as_str())
            .bind(mode.concurrency() as i64)
            .bind(params_json)
            .bind(subjects_json)
            .bind(subjects.len() as i64)
            .bind(now_millis());
        if exclusive {
            query = query.bind(category);
        }

        let result = query
            .execute(self.db.pool())
            .await
            .map_err(|e| FlightdeckError::Database(format!("Failed to create task: {}", e)))?;

        let created = result.rows_affected() > 0;
        if created {
            debug!(task_id, category, total = subjects.len(), "Task row created");
        } else {
            debug!(task_id, category, "Live task in category, row not created");
        }
        Ok(created)
    }

    /// Move a live task to `status`.
    ///
    /// `running` stamps `started_at`; terminal statuses stamp `completed_at`.
    /// Returns `false` when the task does not exist or is already terminal.
    /// Moving back to `pending` is never applied.
    pub async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        error_message: Option<&str>,
    ) -> Result<bool> {
        if status == TaskStatus::Pending {
            return Ok(false);
        }

        let now = now_millis();
        let started_at = (status == TaskStatus::Running).then_some(now);
        let completed_at = status.is_terminal().then_some(now);

        let sql = format!(
            "UPDATE background_tasks
             SET status = ?,
                 error_message = COALESCE(?, error_message),
                 started_at = COALESCE(started_at, ?),
                 completed_at = COALESCE(?, completed_at)
             WHERE task_id = ? AND status IN {}",
            LIVE_STATUSES
        );

        let result = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(error_message)
            .bind(started_at)
            .bind(completed_at)
            .bind(task_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| FlightdeckError::Database(format!("Failed to update task status: {}", e)))?;

        let applied = result.rows_affected() > 0;
        debug!(task_id, status = %status, applied, "Status update");
        Ok(applied)
    }

    /// Apply a partial progress update to a live task.
    ///
    /// `completed_count` and `percent` never move backwards and the count is
    /// capped at `total_count`.
    pub async fn update_progress(&self, task_id: &str, update: &ProgressUpdate) -> Result<bool> {
        let sql = format!(
            "UPDATE background_tasks
             SET current_subject = COALESCE(?, current_subject),
                 current_step = COALESCE(?, current_step),
                 completed_count = MIN(total_count, MAX(completed_count, COALESCE(?, completed_count))),
                 progress_percent = MIN(100.0, MAX(progress_percent, COALESCE(?, progress_percent))),
                 success_count = COALESCE(?, success_count),
                 failed_count = COALESCE(?, failed_count)
             WHERE task_id = ? AND status IN {}",
            LIVE_STATUSES
        );

        let result = sqlx::query(&sql)
            .bind(update.current_subject.as_deref())
            .bind(update.current_step.as_deref())
            .bind(update.completed_count.map(|n| n as i64))
            .bind(update.percent)
            .bind(update.success_count.map(|n| n as i64))
            .bind(update.failed_count.map(|n| n as i64))
            .bind(task_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| FlightdeckError::Database(format!("Failed to update task progress: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Normalize and store the results of a live task. Results are write-once:
    /// returns `false` if they were already written, the task is terminal, or
    /// it is missing.
    pub async fn save_results(&self, task_id: &str, results: &ResultValue) -> Result<bool> {
        let payload = serde_json::to_string(&results.to_json())?;
        let sql = format!(
            "UPDATE background_tasks SET results = ?
             WHERE task_id = ? AND results IS NULL AND status IN {}",
            LIVE_STATUSES
        );

        let result = sqlx::query(&sql)
            .bind(payload)
            .bind(task_id)
            .execute(self.db.pool())
            .await
            .map_err(|e| FlightdeckError::Database(format!("Failed to save task results: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// Link a task to its run history record
    pub async fn set_history_record(&self, task_id: &str, record_id: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE background_tasks SET history_record_id = ? WHERE task_id = ? AND history_record_id IS NULL",
        )
        .bind(record_id)
        .bind(task_id)
        .execute(self.db.pool())
        .await
        .map_err(|e| FlightdeckError::Database(format!("Failed to link history record: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let sql = format!("SELECT {} FROM background_tasks WHERE task_id = ?", TASK_COLUMNS);

        let row = sqlx::query(&sql)
            .bind(task_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| FlightdeckError::Database(format!("Failed to load task: {}", e)))?;

        row.as_ref().map(row_to_task).transpose()
    }

    /// All `pending` or `running` tasks, oldest first
    pub async fn list_running(&self, category: Option<&str>) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM background_tasks
             WHERE status IN {} AND (? IS NULL OR category = ?)
             ORDER BY created_at ASC, rowid ASC",
            TASK_COLUMNS, LIVE_STATUSES
        );

        let rows = sqlx::query(&sql)
            .bind(category)
            .bind(category)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| FlightdeckError::Database(format!("Failed to list running tasks: {}", e)))?;

        rows.iter().map(row_to_task).collect()
    }

    /// Most recently created tasks first
    pub async fn list_recent(&self, category: Option<&str>, limit: usize) -> Result<Vec<Task>> {
        let sql = format!(
            "SELECT {} FROM background_tasks
             WHERE (? IS NULL OR category = ?)
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?",
            TASK_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(category)
            .bind(category)
            .bind(limit as i64)
            .fetch_all(self.db.pool())
            .await
            .map_err(|e| FlightdeckError::Database(format!("Failed to list recent tasks: {}", e)))?;

        rows.iter().map(row_to_task).collect()
    }

    /// The newest `completed` task of a category
    pub async fn latest_completed(&self, category: &str) -> Result<Option<Task>> {
        let sql = format!(
            "SELECT {} FROM background_tasks
             WHERE category = ? AND status = 'completed'
             ORDER BY completed_at DESC, rowid DESC
             LIMIT 1",
            TASK_COLUMNS
        );

        let row = sqlx::query(&sql)
            .bind(category)
            .fetch_optional(self.db.pool())
            .await
            .map_err(|e| FlightdeckError::Database(format!("Failed to load latest task: {}", e)))?;

        row.as_ref().map(row_to_task).transpose()
    }

    /// Whether the category has a live task
    pub async fn is_running(&self, category: &str) -> Result<bool> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM background_tasks WHERE category = ? AND status IN {}",
            LIVE_STATUSES
        );

        let row = sqlx::query(&sql)
            .bind(category)
            .fetch_one(self.db.pool())
            .await
            .map_err(|e| FlightdeckError::Database(format!("Failed to query running state: {}", e)))?;

        Ok(row.try_get::<i64, _>("n")? > 0)
    }

    /// Delete terminal tasks created more than `older_than_days` ago
    pub async fn cleanup(&self, older_than_days: u32) -> Result<u64> {
        let cutoff = now_millis() - i64::from(older_than_days) * MILLIS_PER_DAY;
        let sql = format!(
            "DELETE FROM background_tasks WHERE status IN {} AND created_at < ?",
            TERMINAL_STATUSES
        );

        let result = sqlx::query(&sql)
            .bind(cutoff)
            .execute(self.db.pool())
            .await
            .map_err(|e| FlightdeckError::Database(format!("Failed to clean up tasks: {}", e)))?;

        Ok(result.rows_affected())
    }

    /// Fail live rows whose worker is gone, skipping the ids in `keep`
    /// (tasks this process is still driving).
    pub async fn reap_orphaned(&self, reason: &str, keep: &[String]) -> Result<u64> {
        let mut sql = format!(
            "UPDATE background_tasks
             SET status = 'failed', error_message = ?, completed_at = ?
             WHERE status IN {}",
            LIVE_STATUSES
        );
        if !keep.is_empty() {
            let placeholders = vec!["?"; keep.len()].join(", ");
            sql.push_str(&format!(" AND task_id NOT IN ({})", placeholders));
        }

        let mut query = sqlx::query(&sql).bind(reason).bind(now_millis());
        for task_id in keep {
            query = query.bind(task_id);
        }

        let result = query
            .execute(self.db.pool())
            .await
            .map_err(|e| FlightdeckError::Database(format!("Failed to reap orphaned tasks: {}", e)))?;

        Ok(result.rows_affected())
    }

    /// Row counts per status; statuses with no rows are omitted
    pub async fn count_by_status(&self) -> Result<Vec<(TaskStatus, i64)>> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM background_tasks GROUP BY status ORDER BY status",
        )
        .fetch_all(self.db.pool())
        .await
        .map_err(|e| FlightdeckError::Database(format!("Failed to count tasks: {}", e)))?;

        rows.iter()
            .map(|row| -> Result<(TaskStatus, i64)> {
                let status: String = row.try_get("status")?;
                Ok((status.parse()?, row.try_get("n")?))
            })
            .collect()
    }
}

fn count(row: &SqliteRow, column: &str) -> Result<usize> {
    let value: i64 = row.try_get(column)?;
    usize::try_from(value)
        .map_err(|_| FlightdeckError::InvalidRecord(format!("negative {}: {}", column, value)))
}

fn row_to_task(row: &SqliteRow) -> Result<Task> {
    let status: String = row.try_get("status")?;
    let mode: String = row.try_get("mode")?;
    let params: String = row.try_get("params")?;
    let subjects: String = row.try_get("subjects")?;
    let results: Option<String> = row.try_get("results")?;

    Ok(Task {
        task_id: row.try_get("task_id")?,
        category: row.try_get("category")?,
        status: status.parse()?,
        mode: ExecutionMode::from_parts(&mode, row.try_get("concurrency")?)?,
        params: serde_json::from_str(&params)?,
        subjects: serde_json::from_str(&subjects)?,
        progress: TaskProgress {
            total_count: count(row, "total_count")?,
            completed_count: count(row, "completed_count")?,
            success_count: count(row, "success_count")?,
            failed_count: count(row, "failed_count")?,
            percent: row.try_get("progress_percent")?,
            current_subject: row.try_get("current_subject")?,
            current_step: row.try_get("current_step")?,
        },
        results: results.as_deref().map(serde_json::from_str).transpose()?,
        error_message: row.try_get("error_message")?,
        history_record_id: row.try_get("history_record_id")?,
        created_at: from_millis(row.try_get("created_at")?)?,
        started_at: from_millis_opt(row.try_get("started_at")?)?,
        completed_at: from_millis_opt(row.try_get("completed_at")?)?,
    })
}
