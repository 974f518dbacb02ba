//! Execution engine
//!
//! Owns the life of an admitted task. Each task gets one detached worker that:
//!
//! 1. inserts the `pending` row, unless the category already has a live one
//! 2. marks the row `running`
//! 3. drives the units, sequentially or through a bounded pool
//! 4. reports progress after every unit
//! 5. checks the cancellation signal at unit boundaries
//! 6. writes results and the terminal status
//!
//! Unit faults (errors, panics, timeouts) are recorded against the unit and
//! never abort the batch. Anything else that goes wrong fails the task. On
//! every path the worker drops its registry entry and category permit.

use crate::admission::CategoryPermit;
use crate::error::Result;
use crate::models::{ExecutionMode, NewRunRecord, ProgressUpdate, Task, TaskParams, TaskStatus};
use crate::normalize::ResultValue;
use crate::registry::TaskRegistry;
use crate::repositories::{RunHistoryRepository, TaskRepository};
use crate::signal::CancelSignal;
use crate::work::{SharedWorkFn, UnitError, UnitResult};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Called with the final task record once a worker has finished.
/// Errors are logged and otherwise ignored.
pub type CompletionHook = Arc<dyn Fn(&Task) -> anyhow::Result<()> + Send + Sync>;

/// Everything a worker needs to run one task
pub struct TaskJob {
    pub task_id: String,
    pub category: String,
    pub subjects: Vec<String>,
    pub params: Arc<TaskParams>,
    pub mode: ExecutionMode,
    pub work: SharedWorkFn,
    pub signal: CancelSignal,
    pub on_complete: Option<CompletionHook>,
}

impl std::fmt::Debug for TaskJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskJob")
            .field("task_id", &self.task_id)
            .field("category", &self.category)
            .field("subjects", &self.subjects.len())
            .field("mode", &self.mode)
            .field("signal", &self.signal)
            .finish()
    }
}

/// Result of one work unit
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub subject: String,
    pub result: UnitResult,
    pub elapsed: Duration,
}

impl UnitOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// `{subject, success, data | error, elapsed_ms}`
    pub fn to_entry(&self) -> ResultValue {
        let mut entry = vec![
            ("subject", ResultValue::from(self.subject.as_str())),
            ("success", ResultValue::from(self.is_success())),
            ("elapsed_ms", ResultValue::from(self.elapsed.as_millis() as i64)),
        ];
        match &self.result {
            Ok(data) => entry.push(("data", data.clone())),
            Err(e) => entry.push(("error", ResultValue::from(e.message()))),
        }
        ResultValue::map(entry)
    }
}

/// Whether a submitted task got its row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Created,
    /// The category already had a live row, owned by `live_task` if it still exists
    Blocked { live_task: Option<String> },
}

/// How a worker finished, for logging and tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finish {
    Completed { success: usize, failed: usize },
    Cancelled { completed: usize },
    /// The row was already terminal when the worker started
    Superseded,
}

/// Outcomes collected so far in one run
#[derive(Debug, Default)]
struct BatchRun {
    outcomes: Vec<UnitOutcome>,
    success: usize,
    failed: usize,
    cancelled: bool,
}

impl BatchRun {
    fn record(&mut self, outcome: UnitOutcome) {
        if outcome.is_success() {
            self.success += 1;
        } else {
            self.failed += 1;
        }
        self.outcomes.push(outcome);
    }

    fn completed(&self) -> usize {
        self.outcomes.len()
    }

    fn results(&self) -> ResultValue {
        ResultValue::List(self.outcomes.iter().map(UnitOutcome::to_entry).collect())
    }
}

/// Drives admitted tasks to a terminal state
#[derive(Clone)]
pub struct ExecutionEngine {
    tasks: TaskRepository,
    history: RunHistoryRepository,
    registry: Arc<TaskRegistry>,
    unit_timeout: Option<Duration>,
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("tracked_tasks", &self.registry.len())
            .field("unit_timeout", &self.unit_timeout)
            .finish()
    }
}

impl ExecutionEngine {
    pub fn new(
        tasks: TaskRepository,
        history: RunHistoryRepository,
        registry: Arc<TaskRegistry>,
        unit_timeout: Option<Duration>,
    ) -> Self {
        Self {
            tasks,
            history,
            registry,
            unit_timeout,
        }
    }

    pub fn unit_timeout(&self) -> Option<Duration> {
        self.unit_timeout
    }

    /// Record the task and run it on a detached tokio task.
    ///
    /// The receiver reports whether the row was created. The worker does not
    /// depend on anyone listening: once the row exists it runs to a terminal
    /// state even if the submitter has gone away.
    pub fn submit(&self, job: TaskJob, permit: CategoryPermit) -> oneshot::Receiver<Result<Submission>> {
        let engine = self.clone();
        let (created_tx, created_rx) = oneshot::channel();
        let span = info_span!("task", task_id = %job.task_id, category = %job.category);

        tokio::spawn(
            async move {
                let submission = engine.insert(&job).await;
                if !matches!(submission, Ok(Submission::Created)) {
                    // Release before reporting so the submitter sees a free category
                    engine.registry.remove(&job.task_id);
                    drop(permit);
                    let _ = created_tx.send(submission);
                    return;
                }

                if created_tx.send(submission).is_err() {
                    debug!(task_id = %job.task_id, "Submitter went away, running anyway");
                }
                engine.run(job, permit).await;
            }
            .instrument(span),
        );

        created_rx
    }

    async fn insert(&self, job: &TaskJob) -> Result<Submission> {
        let _inserting = self.registry.inserting().await;

        let created = self
            .tasks
            .create_if_idle(&job.task_id, &job.category, &job.subjects, &job.params, job.mode)
            .await?;
        if created {
            return Ok(Submission::Created);
        }

        let live_task = self
            .tasks
            .list_running(Some(job.category.as_str()))
            .await?
            .into_iter()
            .next()
            .map(|task| task.task_id);
        Ok(Submission::Blocked { live_task })
    }

    /// Run the job to completion on the current task.
    ///
    /// Never fails: faults end up in the task row as `failed`.
    pub async fn run(&self, job: TaskJob, permit: CategoryPermit) -> Option<Finish> {
        let task_id = job.task_id.clone();

        let finish = match AssertUnwindSafe(self.drive(&job)).catch_unwind().await {
            Ok(Ok(finish)) => {
                info!(task_id = %task_id, outcome = ?finish, "Worker finished");
                Some(finish)
            }
            Ok(Err(e)) => {
                self.fail(&task_id, &e.to_string()).await;
                None
            }
            Err(panic) => {
                let message = format!("worker panicked: {}", panic_message(panic.as_ref()));
                self.fail(&task_id, &message).await;
                None
            }
        };

        self.registry.remove(&task_id);
        drop(permit);
        debug!(task_id = %task_id, "Worker released category");

        if let Some(hook) = &job.on_complete {
            self.run_hook(hook, &task_id).await;
        }

        finish
    }

    async fn drive(&self, job: &TaskJob) -> Result<Finish> {
        let started = Instant::now();
        let id = job.task_id.as_str();

        if !self.tasks.update_status(id, TaskStatus::Running, None).await? {
            warn!(task_id = %id, "Task is no longer live, worker exiting");
            return Ok(Finish::Superseded);
        }

        if job.signal.is_requested() {
            self.tasks
                .update_progress(id, &ProgressUpdate::new().step("cancelled"))
                .await?;
            self.tasks.update_status(id, TaskStatus::Cancelled, None).await?;
            info!(task_id = %id, "Task cancelled before any unit ran");
            return Ok(Finish::Cancelled { completed: 0 });
        }

        info!(
            task_id = %id,
            units = job.subjects.len(),
            mode = %job.mode,
            "Task running"
        );
        self.tasks
            .update_progress(id, &ProgressUpdate::new().step("starting"))
            .await?;

        let run = match job.mode {
            ExecutionMode::Sequential => self.run_sequential(job).await?,
            ExecutionMode::Parallel { .. } => self.run_parallel(job).await?,
        };

        self.finalize(job, run, started.elapsed()).await
    }

    async fn run_sequential(&self, job: &TaskJob) -> Result<BatchRun> {
        let mut run = BatchRun::default();

        for subject in &job.subjects {
            if job.signal.is_requested() {
                run.cancelled = true;
                break;
            }

            self.tasks
                .update_progress(
                    &job.task_id,
                    &ProgressUpdate::new()
                        .subject(subject.as_str())
                        .step(format!("processing {}", subject)),
                )
                .await?;

            let outcome = run_unit(
                job.work.clone(),
                subject.clone(),
                job.params.clone(),
                self.unit_timeout,
            )
            .await;
            run.record(outcome);
            self.report(job, &run, subject).await?;
        }

        Ok(run)
    }

    async fn run_parallel(&self, job: &TaskJob) -> Result<BatchRun> {
        let concurrency = job.mode.concurrency();
        let pool = Arc::new(Semaphore::new(concurrency));
        let mut units = JoinSet::new();

        self.tasks
            .update_progress(
                &job.task_id,
                &ProgressUpdate::new().step(format!(
                    "processing {} units with {} workers",
                    job.subjects.len(),
                    concurrency
                )),
            )
            .await?;

        for subject in job.subjects.iter().cloned() {
            let pool = pool.clone();
            let signal = job.signal.clone();
            let work = job.work.clone();
            let params = job.params.clone();
            let limit = self.unit_timeout;

            units.spawn(async move {
                // A closed pool means the task was cancelled while this unit waited
                let _permit = match pool.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return None,
                };
                if signal.is_requested() {
                    return None;
                }
                Some(run_unit(work, subject, params, limit).await)
            });
        }

        let mut run = BatchRun::default();
        while let Some(joined) = units.join_next().await {
            if job.signal.is_requested() {
                pool.close();
                // In-flight units finish on their own; nothing waits for them
                units.detach_all();
                run.cancelled = true;
                break;
            }

            match joined {
                Ok(Some(outcome)) => {
                    let subject = outcome.subject.clone();
                    run.record(outcome);
                    self.report(job, &run, &subject).await?;
                }
                Ok(None) => {}
                Err(e) => {
                    error!(task_id = %job.task_id, error = %e, "Work unit was lost");
                    run.record(UnitOutcome {
                        subject: "<unknown>".to_string(),
                        result: Err(UnitError::new(format!("unit lost: {}", e))),
                        elapsed: Duration::ZERO,
                    });
                    self.report(job, &run, "<unknown>").await?;
                }
            }
        }

        Ok(run)
    }

    async fn report(&self, job: &TaskJob, run: &BatchRun, subject: &str) -> Result<()> {
        let update = ProgressUpdate::new()
            .subject(subject)
            .completed(run.completed(), job.subjects.len())
            .outcomes(run.success, run.failed);
        self.tasks.update_progress(&job.task_id, &update).await?;

        debug!(
            task_id = %job.task_id,
            completed = run.completed(),
            total = job.subjects.len(),
            "Progress"
        );
        Ok(())
    }

    async fn finalize(&self, job: &TaskJob, run: BatchRun, elapsed: Duration) -> Result<Finish> {
        let id = job.task_id.as_str();
        let total = job.subjects.len();

        if run.cancelled {
            self.tasks
                .update_progress(id, &ProgressUpdate::new().step("cancelled"))
                .await?;
            if !run.outcomes.is_empty() {
                self.tasks.save_results(id, &run.results()).await?;
            }
            self.tasks.update_status(id, TaskStatus::Cancelled, None).await?;
            info!(task_id = %id, completed = run.completed(), total, "Task cancelled");
            return Ok(Finish::Cancelled {
                completed: run.completed(),
            });
        }

        self.tasks
            .update_progress(
                id,
                &ProgressUpdate::new()
                    .step("saving results")
                    .completed(run.completed(), total)
                    .outcomes(run.success, run.failed),
            )
            .await?;

        let results = run.results();
        if !self.tasks.save_results(id, &results).await? {
            warn!(task_id = %id, "Results were already stored, keeping the existing copy");
        }

        if total > 1 {
            let record = NewRunRecord {
                task_id: id.to_string(),
                category: job.category.clone(),
                subject_count: total,
                mode: job.mode.as_str().to_string(),
                success_count: run.success,
                failed_count: run.failed,
                elapsed_secs: elapsed.as_secs_f64(),
                results: results.to_json(),
            };
            let record_id = self.history.record(&record).await?;
            self.tasks.set_history_record(id, record_id).await?;
        }

        self.tasks
            .update_progress(id, &ProgressUpdate::new().step("finished"))
            .await?;

        let summary = (run.failed > 0)
            .then(|| format!("{} succeeded, {} failed", run.success, run.failed));
        if !self
            .tasks
            .update_status(id, TaskStatus::Completed, summary.as_deref())
            .await?
        {
            warn!(task_id = %id, "Task left the live state before completion was recorded");
        }

        info!(
            task_id = %id,
            success = run.success,
            failed = run.failed,
            elapsed_ms = elapsed.as_millis() as u64,
            "Task completed"
        );
        Ok(Finish::Completed {
            success: run.success,
            failed: run.failed,
        })
    }

    async fn fail(&self, task_id: &str, message: &str) {
        error!(task_id = %task_id, error = %message, "Task failed");

        match self
            .tasks
            .update_status(task_id, TaskStatus::Failed, Some(message))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!(task_id = %task_id, "Task was already terminal, failure not recorded"),
            Err(e) => error!(task_id = %task_id, error = %e, "Could not record task failure"),
        }
    }

    async fn run_hook(&self, hook: &CompletionHook, task_id: &str) {
        let task = match self.tasks.get(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(task_id = %task_id, "Task vanished before completion hook ran");
                return;
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Could not load task for completion hook");
                return;
            }
        };

        match std::panic::catch_unwind(AssertUnwindSafe(|| hook(&task))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(task_id = %task_id, error = %e, "Completion hook failed"),
            Err(panic) => warn!(
                task_id = %task_id,
                error = %panic_message(panic.as_ref()),
                "Completion hook panicked"
            ),
        }
    }
}

/// Run one unit with panic isolation and the optional deadline.
/// On timeout the unit's future is dropped.
async fn run_unit(
    work: SharedWorkFn,
    subject: String,
    params: Arc<TaskParams>,
    limit: Option<Duration>,
) -> UnitOutcome {
    let started = Instant::now();

    let caught = {
        let call = AssertUnwindSafe(work.run(&subject, &params)).catch_unwind();
        match limit {
            Some(limit) => tokio::time::timeout(limit, call).await.unwrap_or_else(|_| {
                Ok(Err(UnitError::new(format!(
                    "unit timed out after {}s",
                    limit.as_secs_f64()
                ))))
            }),
            None => call.await,
        }
    };

    let result = caught.unwrap_or_else(|panic| {
        Err(UnitError::new(format!(
            "unit panicked: {}",
            panic_message(panic.as_ref())
        )))
    });

    if let Err(e) = &result {
        warn!(subject = %subject, error = %e, "Work unit failed");
    }

    UnitOutcome {
        subject,
        result,
        elapsed: started.elapsed(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
