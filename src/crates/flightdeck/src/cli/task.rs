//! Task command handlers

use crate::cli::command::CommandWork;
use crate::error::{FlightdeckError, Result};
use crate::models::{Task, TaskParams, TaskStatus};
use crate::scheduler::{CancelOutcome, Scheduler, StartOutcome, TaskRequest};
use crate::signal::CancelSignal;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Arguments of `flightdeck run`
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub category: String,
    pub subjects: Vec<String>,
    pub parallel: Option<usize>,
    pub params: Vec<String>,
    pub command: Vec<String>,
    pub json: bool,
}

/// Parse `key=value` pairs; values that are valid JSON keep their JSON type
pub fn parse_params(pairs: &[String]) -> Result<TaskParams> {
    let mut params = TaskParams::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| FlightdeckError::Config(format!("invalid param '{}', expected key=value", pair)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(FlightdeckError::Config(format!("invalid param '{}', empty key", pair)));
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

/// Handle run command: start the task, follow it, cancel on Ctrl-C
pub async fn handle_run(scheduler: &Scheduler, args: RunArgs) -> Result<()> {
    let work = CommandWork::from_argv(&args.command)
        .ok_or_else(|| FlightdeckError::Config("no program given after '--'".to_string()))?;

    let mut request = TaskRequest::new(args.subjects).with_params(parse_params(&args.params)?);
    request = match args.parallel {
        Some(n) => request.parallel(n),
        None => request.sequential(),
    };

    let task_id = match scheduler.start(&args.category, Arc::new(work), request).await {
        StartOutcome::Accepted { task_id } => task_id,
        StartOutcome::Rejected(reason) => {
            println!("{}", format!("✗ Task not started: {}", reason).red().bold());
            return Err(FlightdeckError::Execution(reason.to_string()));
        }
    };

    println!("{}", "✓ Task started".green().bold());
    println!("  ID: {}", task_id);
    println!("  Category: {}", args.category);
    println!();

    let interrupt = CancelSignal::new();
    let _signal_handler = interrupt.install_signal_handlers();

    let task = follow(scheduler, &task_id, &interrupt).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        print_task(&task);
    }

    match task.status {
        TaskStatus::Completed => Ok(()),
        status => Err(FlightdeckError::Execution(format!("task finished as {}", status))),
    }
}

/// Poll the task until it is terminal, drawing a progress bar
async fn follow(scheduler: &Scheduler, task_id: &str, interrupt: &CancelSignal) -> Result<Task> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let mut cancel_sent = false;
    loop {
        let task = scheduler
            .get_status(task_id)
            .await?
            .ok_or_else(|| FlightdeckError::NotFound(format!("task {}", task_id)))?;

        bar.set_length(task.progress.total_count as u64);
        bar.set_position(task.progress.completed_count as u64);
        bar.set_message(task.progress.current_step.clone().unwrap_or_default());

        if task.is_terminal() {
            bar.finish_and_clear();
            return Ok(task);
        }

        if cancel_sent {
            tokio::time::sleep(POLL_INTERVAL).await;
            continue;
        }

        tokio::select! {
            _ = interrupt.cancelled() => {
                cancel_sent = true;
                bar.println("Cancelling: waiting for the current unit to finish...");
                info!(task_id, "Interrupt received, cancelling task");
                scheduler.cancel(task_id).await?;
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

/// Handle status command
pub async fn handle_status(scheduler: &Scheduler, id: String, json: bool) -> Result<()> {
    let task = scheduler
        .get_status(&id)
        .await?
        .ok_or_else(|| FlightdeckError::NotFound(format!("task {}", id)))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        print_task(&task);
    }
    Ok(())
}

/// Handle list command
pub async fn handle_list(
    scheduler: &Scheduler,
    category: Option<String>,
    running: bool,
    limit: Option<usize>,
) -> Result<()> {
    let tasks = if running {
        scheduler.list_running(category.as_deref()).await?
    } else {
        let limit = limit.unwrap_or_else(|| scheduler.recent_limit());
        scheduler.list_recent(category.as_deref(), limit).await?
    };

    if tasks.is_empty() {
        println!("{}", "No tasks found".yellow());
        return Ok(());
    }

    println!("{:<38} {:<16} {:<10} {:>9} {:<20}", "ID", "Category", "Status", "Progress", "Created");
    println!("{}", "-".repeat(97));

    for task in tasks {
        let progress = format!("{}/{}", task.progress.completed_count, task.progress.total_count);
        println!(
            "{:<38} {:<16} {:<10} {:>9} {:<20}",
            task.task_id,
            truncate(&task.category, 16),
            colored_status(task.status),
            progress,
            task.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }

    Ok(())
}

/// Handle cancel command
pub async fn handle_cancel(scheduler: &Scheduler, id: String) -> Result<()> {
    let outcome = scheduler.cancel(&id).await?;
    match outcome {
        CancelOutcome::Signalled | CancelOutcome::MarkedCancelled => {
            println!("{}", format!("✓ {}", outcome.message()).green().bold());
            println!("  Task ID: {}", id);
            Ok(())
        }
        CancelOutcome::NotCancellable => {
            println!("{}", format!("✗ {}", outcome.message()).red());
            Err(FlightdeckError::NotFound(format!("task {}", id)))
        }
    }
}

/// Handle cleanup command
pub async fn handle_cleanup(scheduler: &Scheduler, days: Option<u32>) -> Result<()> {
    let removed = scheduler.cleanup(days).await?;
    println!("{}", format!("✓ Removed {} finished task(s)", removed).green());
    Ok(())
}

/// Handle recover command
pub async fn handle_recover(scheduler: &Scheduler) -> Result<()> {
    let reaped = scheduler.recover_orphans().await?;
    if reaped == 0 {
        println!("{}", "No orphaned tasks found".yellow());
    } else {
        println!("{}", format!("✓ Marked {} orphaned task(s) as failed", reaped).green());
    }
    Ok(())
}

fn print_task(task: &Task) {
    println!("Task: {}", task.task_id);
    println!("  Category: {}", task.category);
    println!("  Status: {}", colored_status(task.status));
    println!("  Mode: {}", task.mode);
    println!(
        "  Progress: {}/{} ({:.2}%), {} succeeded, {} failed",
        task.progress.completed_count,
        task.progress.total_count,
        task.progress.percent,
        task.progress.success_count,
        task.progress.failed_count
    );
    if let Some(step) = &task.progress.current_step {
        println!("  Step: {}", step);
    }
    if let Some(error) = &task.error_message {
        println!("  Message: {}", error.yellow());
    }
    if let Some(elapsed) = task.elapsed() {
        println!("  Elapsed: {:.2}s", elapsed.num_milliseconds() as f64 / 1000.0);
    }
    if let Some(id) = task.history_record_id {
        println!("  History record: {}", id);
    }
    if let Some(results) = &task.results {
        match serde_json::to_string_pretty(results) {
            Ok(text) => println!("  Results:\n{}", text),
            Err(_) => println!("  Results: <unprintable>"),
        }
    }
}

pub(crate) fn colored_status(status: TaskStatus) -> colored::ColoredString {
    match status {
        TaskStatus::Pending => status.as_str().normal(),
        TaskStatus::Running => status.as_str().cyan(),
        TaskStatus::Completed => status.as_str().green(),
        TaskStatus::Failed => status.as_str().red(),
        TaskStatus::Cancelled => status.as_str().yellow(),
    }
}

pub(crate) fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let kept: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_params() {
        let params = parse_params(&[
            "top_n=5".to_string(),
            "market=US".to_string(),
            "flags=[1,2]".to_string(),
            "expr=a=b".to_string(),
        ])
        .unwrap();

        assert_eq!(params.get("top_n"), Some(&json!(5)));
        assert_eq!(params.get("market"), Some(&json!("US")));
        assert_eq!(params.get("flags"), Some(&json!([1, 2])));
        assert_eq!(params.get("expr"), Some(&json!("a=b")));
    }

    #[test]
    fn test_parse_params_rejects_malformed() {
        assert!(parse_params(&["novalue".to_string()]).is_err());
        assert!(parse_params(&["=5".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_follow_cancels_on_interrupt() {
        let db = Arc::new(crate::db::Database::in_memory().await.unwrap());
        let scheduler = Scheduler::new(db, &crate::config::FlightdeckConfig::default());
        let work = crate::work::work_fn(|subject, _| async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(crate::normalize::ResultValue::from(subject))
        });

        let outcome = scheduler
            .start("sel", work, TaskRequest::new((1..=10).map(|i| format!("S{}", i))))
            .await;
        let task_id = outcome.task_id().unwrap().to_string();

        let interrupt = CancelSignal::new();
        interrupt.request();

        let task = tokio::time::timeout(Duration::from_secs(5), follow(&scheduler, &task_id, &interrupt))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.progress.completed_count < 10);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 16), "short");
        assert_eq!(truncate("a-very-long-category-name", 10), "a-very-...");
    }
}
