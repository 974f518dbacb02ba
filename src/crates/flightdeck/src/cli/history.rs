//! Run history command handlers

use crate::cli::task::{colored_status, truncate};
use crate::error::{FlightdeckError, Result};
use crate::repositories::DEFAULT_HISTORY_LIMIT;
use crate::scheduler::Scheduler;
use colored::Colorize;

/// Handle history command
pub async fn handle_history(scheduler: &Scheduler, limit: Option<usize>) -> Result<()> {
    let records = scheduler.history(limit.unwrap_or(DEFAULT_HISTORY_LIMIT)).await?;

    if records.is_empty() {
        println!("{}", "No run history found".yellow());
        return Ok(());
    }

    println!(
        "{:<6} {:<16} {:<10} {:>8} {:>8} {:>7} {:>10} {:<20}",
        "ID", "Category", "Mode", "Subjects", "Success", "Failed", "Elapsed", "Recorded"
    );
    println!("{}", "-".repeat(92));

    for record in records {
        let failed = if record.failed_count > 0 {
            record.failed_count.to_string().red()
        } else {
            record.failed_count.to_string().normal()
        };
        println!(
            "{:<6} {:<16} {:<10} {:>8} {:>8} {:>7} {:>9.2}s {:<20}",
            record.id,
            truncate(&record.category, 16),
            record.mode,
            record.subject_count,
            record.success_count,
            failed,
            record.elapsed_secs,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }

    Ok(())
}

/// Handle history show command
pub async fn handle_show(scheduler: &Scheduler, id: i64) -> Result<()> {
    let record = scheduler
        .history_record(id)
        .await?
        .ok_or_else(|| FlightdeckError::NotFound(format!("history record {}", id)))?;

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

/// Handle history delete command
pub async fn handle_delete(scheduler: &Scheduler, id: i64) -> Result<()> {
    if scheduler.delete_history_record(id).await? {
        println!("{}", format!("✓ History record {} deleted", id).green());
        Ok(())
    } else {
        Err(FlightdeckError::NotFound(format!("history record {}", id)))
    }
}

/// Handle stats command
pub async fn handle_stats(scheduler: &Scheduler, json: bool) -> Result<()> {
    let stats = scheduler.statistics().await?;
    let counts = scheduler.count_by_status().await?;

    if json {
        let by_status: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(status, count)| (status.as_str().to_string(), (*count).into()))
            .collect();
        let report = serde_json::json!({ "history": stats, "tasks": by_status });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Run History");
    println!("===========");
    println!("  Records: {}", stats.total_records);
    println!("  Subjects: {}", stats.total_subjects);
    println!("  Succeeded: {}", stats.total_success);
    println!("  Failed: {}", stats.total_failed);
    println!("  Average elapsed: {:.2}s", stats.average_elapsed_secs);
    println!("  Success rate: {:.2}%", stats.success_rate);
    println!();
    println!("Tasks by Status");
    println!("===============");
    if counts.is_empty() {
        println!("  {}", "No tasks".yellow());
    }
    for (status, count) in counts {
        println!("  {:<10} {}", colored_status(status), count);
    }

    Ok(())
}
