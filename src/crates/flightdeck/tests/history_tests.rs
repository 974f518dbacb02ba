//! Run history, statistics and completion hooks

mod common;

use common::{echo_work, setup_scheduler, subjects, wait_for_terminal, wait_until_idle};
use flightdeck::{work_fn, ResultValue, Task, TaskRequest, TaskStatus, UnitError};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_batches_are_recorded_in_history() {
    let env = setup_scheduler().await;
    let work = work_fn(|subject, _params| async move {
        if subject == "S3" {
            return Err(UnitError::new("quote unavailable"));
        }
        Ok(ResultValue::from(subject))
    });

    let outcome = env
        .scheduler
        .start("analysis", work, TaskRequest::new(subjects(4)).parallel(2))
        .await;
    let task = wait_for_terminal(&env.scheduler, outcome.task_id().unwrap()).await;
    let record_id = task.history_record_id.expect("batch should be recorded");

    let record = env.scheduler.history_record(record_id).await.unwrap().unwrap();
    assert_eq!(record.task_id, task.task_id);
    assert_eq!(record.category, "analysis");
    assert_eq!(record.subject_count, 4);
    assert_eq!(record.mode, "parallel");
    assert_eq!(record.success_count, 3);
    assert_eq!(record.failed_count, 1);
    assert_eq!(record.results.as_array().unwrap().len(), 4);
    assert_eq!(Some(&record.results), task.results.as_ref());

    let stats = env.scheduler.statistics().await.unwrap();
    assert_eq!(stats.total_records, 1);
    assert_eq!(stats.total_subjects, 4);
    assert_eq!(stats.total_success, 3);
    assert_eq!(stats.total_failed, 1);
    assert_eq!(stats.success_rate, 75.0);
}

#[tokio::test]
async fn test_single_subject_tasks_skip_history() {
    let env = setup_scheduler().await;
    let outcome = env.scheduler.start("quote", echo_work(), TaskRequest::single("AAPL")).await;
    let task = wait_for_terminal(&env.scheduler, outcome.task_id().unwrap()).await;

    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.history_record_id.is_none());
    assert!(env.scheduler.history(10).await.unwrap().is_empty());
    assert_eq!(env.scheduler.statistics().await.unwrap().total_records, 0);
}

#[tokio::test]
async fn test_history_delete_and_latest_completed() {
    let env = setup_scheduler().await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        let outcome = env.scheduler.start("sel", echo_work(), TaskRequest::new(subjects(2))).await;
        let task = wait_for_terminal(&env.scheduler, outcome.task_id().unwrap()).await;
        ids.push(task.task_id);
        wait_until_idle(&env.scheduler, "sel").await;
    }

    let latest = env.scheduler.latest_completed("sel").await.unwrap().unwrap();
    assert_eq!(latest.task_id, ids[1]);
    assert!(env.scheduler.latest_completed("nothing").await.unwrap().is_none());

    let history = env.scheduler.history(10).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].task_id, ids[1]);

    assert!(env.scheduler.delete_history_record(history[0].id).await.unwrap());
    assert!(!env.scheduler.delete_history_record(history[0].id).await.unwrap());
    assert_eq!(env.scheduler.history(10).await.unwrap().len(), 1);

    let recent = env.scheduler.list_recent(Some("sel"), 1).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].task_id, ids[1]);

    let counts = env.scheduler.count_by_status().await.unwrap();
    assert_eq!(counts, vec![(TaskStatus::Completed, 2)]);
}

#[tokio::test]
async fn test_completion_hook_sees_final_record() {
    let env = setup_scheduler().await;
    let seen: Arc<Mutex<Option<Task>>> = Arc::new(Mutex::new(None));

    let request = {
        let seen = seen.clone();
        TaskRequest::new(subjects(2)).on_complete(move |task| {
            *seen.lock() = Some(task.clone());
            Ok(())
        })
    };

    let outcome = env.scheduler.start("sel", echo_work(), request).await;
    let task_id = outcome.task_id().unwrap().to_string();
    wait_for_terminal(&env.scheduler, &task_id).await;
    wait_until_idle(&env.scheduler, "sel").await;

    // The hook runs after the category is released
    let observed = tokio::time::timeout(std::time::Duration::from_secs(5), async {
        loop {
            if let Some(task) = seen.lock().clone() {
                return task;
            }
            tokio::time::sleep(common::POLL).await;
        }
    })
    .await
    .expect("hook was not called");

    assert_eq!(observed.task_id, task_id);
    assert_eq!(observed.status, TaskStatus::Completed);
    assert_eq!(observed.results.unwrap()[1]["data"], json!({"symbol": "S2"}));
}

#[tokio::test]
async fn test_failing_hook_does_not_touch_task() {
    let env = setup_scheduler().await;
    let request = TaskRequest::single("X")
        .on_complete(|_task: &Task| -> anyhow::Result<()> { anyhow::bail!("webhook down") });

    let outcome = env.scheduler.start("sel", echo_work(), request).await;
    let task = wait_for_terminal(&env.scheduler, outcome.task_id().unwrap()).await;
    wait_until_idle(&env.scheduler, "sel").await;

    let after = env.scheduler.get_status(&task.task_id).await.unwrap().unwrap();
    assert_eq!(after.status, TaskStatus::Completed);
    assert!(after.error_message.is_none());
}
