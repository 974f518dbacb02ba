//! Scheduler facade
//!
//! The public entry point. Combines the admission gate, the execution engine
//! and the task store:
//!
//! - `start` admits at most one live task per category and hands it to a
//!   detached worker without waiting for any work to happen
//! - `get_status`, `list_running` and `list_recent` read the store
//! - `cancel` signals a worker owned by this process, or marks an orphaned
//!   live row `cancelled`
//!
//! Business outcomes are returned as values; `Err` only reports storage faults.

use crate::admission::AdmissionGate;
use crate::config::{ExecutionConfig, FlightdeckConfig, RetentionConfig};
use crate::db::Database;
use crate::engine::{CompletionHook, ExecutionEngine, Submission, TaskJob};
use crate::error::{FlightdeckError, Result};
use crate::models::{ExecutionMode, RunRecord, RunStatistics, Task, TaskParams, TaskStatus};
use crate::registry::TaskRegistry;
use crate::repositories::{RunHistoryRepository, TaskRepository};
use crate::work::SharedWorkFn;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Error message written to rows reaped by [`Scheduler::recover_orphans`]
pub const ORPHANED_MESSAGE: &str = "orphaned: worker lost before completion";

/// Why `start` refused a task. No task row exists for a rejected start.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("category '{category}' is busy")]
    CategoryBusy { category: String },

    #[error("category '{category}' already has live task {task_id}")]
    ActiveTask { category: String, task_id: String },

    #[error("task has no subjects to process")]
    NoSubjects,

    #[error("could not record task: {0}")]
    Storage(String),
}

/// Result of [`Scheduler::start`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Accepted { task_id: String },
    Rejected(AdmissionError),
}

impl StartOutcome {
    pub fn accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::Accepted { task_id } => Some(task_id),
            Self::Rejected(_) => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Accepted { .. } => "task started".to_string(),
            Self::Rejected(reason) => reason.to_string(),
        }
    }
}

/// Result of [`Scheduler::cancel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The worker will stop at its next checkpoint
    Signalled,
    /// No worker in this process owns the task; only the row was changed
    MarkedCancelled,
    /// Unknown task, or already terminal
    NotCancellable,
}

impl CancelOutcome {
    pub fn accepted(&self) -> bool {
        !matches!(self, Self::NotCancellable)
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::Signalled => "cancellation requested",
            Self::MarkedCancelled => "task marked cancelled (no live worker in this process)",
            Self::NotCancellable => "task not found or already finished",
        }
    }
}

/// What to run: the subjects, the opaque params, and how to drive them
#[derive(Clone, Default)]
pub struct TaskRequest {
    subjects: Vec<String>,
    params: TaskParams,
    mode: ExecutionMode,
    on_complete: Option<CompletionHook>,
}

impl std::fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRequest")
            .field("subjects", &self.subjects)
            .field("params", &self.params)
            .field("mode", &self.mode)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl TaskRequest {
    /// Batch over `subjects`, processed sequentially unless changed
    pub fn new<I, S>(subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subjects: subjects.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Non-batch task with a single unit
    pub fn single(subject: impl Into<String>) -> Self {
        Self::new([subject.into()])
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: TaskParams) -> Self {
        self.params.extend(params);
        self
    }

    pub fn sequential(mut self) -> Self {
        self.mode = ExecutionMode::Sequential;
        self
    }

    /// Bounded-parallel execution; `0` uses the configured default pool size
    pub fn parallel(mut self, concurrency: usize) -> Self {
        self.mode = ExecutionMode::Parallel { concurrency };
        self
    }

    pub fn on_complete<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Task) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    pub fn subjects(&self) -> &[String] {
        &self.subjects
    }

    pub fn params(&self) -> &TaskParams {
        &self.params
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }
}

/// Background task scheduler
#[derive(Clone)]
pub struct Scheduler {
    tasks: TaskRepository,
    history: RunHistoryRepository,
    gate: Arc<AdmissionGate>,
    registry: Arc<TaskRegistry>,
    engine: ExecutionEngine,
    execution: ExecutionConfig,
    retention: RetentionConfig,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("held_categories", &self.gate.held_categories())
            .field("tracked_tasks", &self.registry.len())
            .field("execution", &self.execution)
            .finish()
    }
}

impl Scheduler {
    /// Build a scheduler over an open database without touching existing rows
    pub fn new(db: Arc<Database>, config: &FlightdeckConfig) -> Self {
        let tasks = TaskRepository::new(db.clone());
        let history = RunHistoryRepository::new(db);
        let registry = Arc::new(TaskRegistry::new());
        let engine = ExecutionEngine::new(
            tasks.clone(),
            history.clone(),
            registry.clone(),
            config.execution.unit_timeout(),
        );

        Self {
            tasks,
            history,
            gate: AdmissionGate::new(),
            registry,
            engine,
            execution: config.execution.clone(),
            retention: config.retention.clone(),
        }
    }

    /// Build a scheduler and, if configured, reap rows orphaned by a previous process
    pub async fn open(db: Arc<Database>, config: &FlightdeckConfig) -> Result<Self> {
        let scheduler = Self::new(db, config);
        if config.execution.reap_orphans_on_start {
            scheduler.recover_orphans().await?;
        }
        Ok(scheduler)
    }

    /// Open the configured database and build a scheduler over it
    pub async fn from_config(config: &FlightdeckConfig) -> Result<Self> {
        let db = Database::new(config.database_path()).await?;
        Self::open(Arc::new(db), config).await
    }

    /// Admit a task and hand it to a background worker.
    ///
    /// Returns as soon as the task row exists; never waits on another task.
    /// The row is written by the worker itself, so an accepted task runs to
    /// completion even if this future is dropped while waiting.
    pub async fn start(&self, category: &str, work: SharedWorkFn, request: TaskRequest) -> StartOutcome {
        if request.subjects.is_empty() {
            return StartOutcome::Rejected(AdmissionError::NoSubjects);
        }

        let Some(permit) = self.gate.try_acquire(category) else {
            info!(category, "Start rejected: category busy");
            return StartOutcome::Rejected(AdmissionError::CategoryBusy {
                category: category.to_string(),
            });
        };

        let task_id = Uuid::new_v4().to_string();
        let mode = self.resolve_mode(request.mode);

        // Registered before the row exists so orphan sweeps always skip it
        let job = TaskJob {
            task_id: task_id.clone(),
            category: category.to_string(),
            subjects: request.subjects,
            params: Arc::new(request.params),
            mode,
            work,
            signal: self.registry.register(&task_id),
            on_complete: request.on_complete,
        };

        match self.engine.submit(job, permit).await {
            Ok(Ok(Submission::Created)) => {
                info!(task_id = %task_id, category, mode = %mode, "Task accepted");
                StartOutcome::Accepted { task_id }
            }
            // A live row with no permit holder here belongs to another process
            Ok(Ok(Submission::Blocked { live_task: Some(existing) })) => {
                warn!(category, task_id = %existing, "Start rejected: live task in store");
                StartOutcome::Rejected(AdmissionError::ActiveTask {
                    category: category.to_string(),
                    task_id: existing,
                })
            }
            Ok(Ok(Submission::Blocked { live_task: None })) => {
                info!(category, "Start rejected: live task finished during admission");
                StartOutcome::Rejected(AdmissionError::CategoryBusy {
                    category: category.to_string(),
                })
            }
            Ok(Err(e)) => {
                error!(category, error = %e, "Start rejected: could not create task");
                StartOutcome::Rejected(AdmissionError::Storage(e.to_string()))
            }
            Err(_) => {
                error!(category, "Start rejected: worker exited before recording the task");
                StartOutcome::Rejected(AdmissionError::Storage(
                    "worker exited before recording the task".to_string(),
                ))
            }
        }
    }

    fn resolve_mode(&self, mode: ExecutionMode) -> ExecutionMode {
        match mode {
            ExecutionMode::Parallel { concurrency: 0 } => ExecutionMode::Parallel {
                concurrency: self.execution.default_concurrency.max(1),
            },
            other => other,
        }
    }

    pub async fn get_status(&self, task_id: &str) -> Result<Option<Task>> {
        self.tasks.get(task_id).await
    }

    pub async fn list_running(&self, category: Option<&str>) -> Result<Vec<Task>> {
        self.tasks.list_running(category).await
    }

    pub async fn list_recent(&self, category: Option<&str>, limit: usize) -> Result<Vec<Task>> {
        self.tasks.list_recent(category, limit).await
    }

    /// Request cooperative cancellation.
    ///
    /// A running unit is never interrupted; the worker stops at its next
    /// checkpoint. A live row with no worker here is marked `cancelled`
    /// directly; whatever was executing it (if anything) is not stopped.
    pub async fn cancel(&self, task_id: &str) -> Result<CancelOutcome> {
        if let Some(signal) = self.registry.signal(task_id) {
            signal.request();
            info!(task_id, "Cancellation requested");
            return Ok(CancelOutcome::Signalled);
        }

        match self.tasks.get(task_id).await? {
            Some(task) if task.is_active() => {
                if self.tasks.update_status(task_id, TaskStatus::Cancelled, None).await? {
                    warn!(task_id, "No worker owns this task here; marked cancelled in store only");
                    Ok(CancelOutcome::MarkedCancelled)
                } else {
                    Ok(CancelOutcome::NotCancellable)
                }
            }
            _ => Ok(CancelOutcome::NotCancellable),
        }
    }

    /// Poll until the task is terminal
    pub async fn wait_for(&self, task_id: &str, poll_interval: Duration) -> Result<Task> {
        loop {
            let task = self
                .tasks
                .get(task_id)
                .await?
                .ok_or_else(|| FlightdeckError::NotFound(format!("task {}", task_id)))?;
            if task.is_terminal() {
                return Ok(task);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn latest_completed(&self, category: &str) -> Result<Option<Task>> {
        self.tasks.latest_completed(category).await
    }

    /// Whether the category has a live task, in this process or in the store
    pub async fn is_running(&self, category: &str) -> Result<bool> {
        if self.gate.is_held(category) {
            return Ok(true);
        }
        self.tasks.is_running(category).await
    }

    /// Remove terminal tasks older than `days`, or the configured retention
    pub async fn cleanup(&self, days: Option<u32>) -> Result<u64> {
        let days = days.unwrap_or(self.retention.max_age_days);
        let removed = self.tasks.cleanup(days).await?;
        info!(days, removed, "Retention sweep finished");
        Ok(removed)
    }

    /// Fail live rows not owned by a worker in this process
    pub async fn recover_orphans(&self) -> Result<u64> {
        let _sweep = self.registry.sweeping().await;
        let owned = self.registry.task_ids();
        let reaped = self.tasks.reap_orphaned(ORPHANED_MESSAGE, &owned).await?;
        if reaped > 0 {
            warn!(reaped, "Marked orphaned tasks as failed");
        }
        Ok(reaped)
    }

    pub async fn count_by_status(&self) -> Result<Vec<(TaskStatus, i64)>> {
        self.tasks.count_by_status().await
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.history.list(limit).await
    }

    pub async fn history_record(&self, id: i64) -> Result<Option<RunRecord>> {
        self.history.get(id).await
    }

    pub async fn delete_history_record(&self, id: i64) -> Result<bool> {
        self.history.delete(id).await
    }

    pub async fn statistics(&self) -> Result<RunStatistics> {
        self.history.statistics().await
    }

    /// Default page size for recent listings
    pub fn recent_limit(&self) -> usize {
        self.execution.recent_limit
    }

    pub fn execution_config(&self) -> &ExecutionConfig {
        &self.execution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::ResultValue;
    use crate::work::work_fn;
    use serde_json::json;

    async fn scheduler() -> Scheduler {
        let db = Arc::new(Database::in_memory().await.unwrap());
        Scheduler::open(db, &FlightdeckConfig::default()).await.unwrap()
    }

    fn noop() -> SharedWorkFn {
        work_fn(|subject, _| async move { Ok(ResultValue::from(subject)) })
    }

    #[test]
    fn test_outcome_messages() {
        let accepted = StartOutcome::Accepted { task_id: "t".to_string() };
        assert!(accepted.accepted());
        assert_eq!(accepted.task_id(), Some("t"));

        let busy = StartOutcome::Rejected(AdmissionError::CategoryBusy {
            category: "sel".to_string(),
        });
        assert!(!busy.accepted());
        assert!(busy.task_id().is_none());
        assert_eq!(busy.message(), "category 'sel' is busy");

        assert!(CancelOutcome::Signalled.accepted());
        assert!(CancelOutcome::MarkedCancelled.accepted());
        assert!(!CancelOutcome::NotCancellable.accepted());
    }

    #[test]
    fn test_request_builder() {
        let request = TaskRequest::new(["A", "B"])
            .param("top_n", 5)
            .param("market", "US")
            .parallel(4);

        assert_eq!(request.subjects(), &["A".to_string(), "B".to_string()]);
        assert_eq!(request.params().get("top_n"), Some(&json!(5)));
        assert_eq!(request.mode(), ExecutionMode::Parallel { concurrency: 4 });
        assert_eq!(TaskRequest::single("X").subjects().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_request_rejected() {
        let scheduler = scheduler().await;
        let outcome = scheduler
            .start("sel", noop(), TaskRequest::new(Vec::<String>::new()))
            .await;
        assert_eq!(outcome, StartOutcome::Rejected(AdmissionError::NoSubjects));
        assert!(scheduler.list_recent(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_default_parallelism_is_resolved() {
        let scheduler = scheduler().await;
        let outcome = scheduler
            .start("sel", noop(), TaskRequest::new(["A", "B"]).parallel(0))
            .await;

        let task = scheduler
            .wait_for(outcome.task_id().unwrap(), Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(task.mode, ExecutionMode::Parallel { concurrency: 3 });
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let scheduler = scheduler().await;
        let outcome = scheduler.cancel("missing").await.unwrap();
        assert_eq!(outcome, CancelOutcome::NotCancellable);
        assert_eq!(outcome.message(), "task not found or already finished");
    }

    #[tokio::test]
    async fn test_wait_for_unknown_task() {
        let scheduler = scheduler().await;
        let err = scheduler
            .wait_for("missing", Duration::from_millis(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FlightdeckError::NotFound(_)));
    }
}
