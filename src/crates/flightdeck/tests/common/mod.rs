//! Common test utilities and setup

#![allow(dead_code)]

use flightdeck::{
    work_fn, Database, FlightdeckConfig, ResultValue, Scheduler, SharedWorkFn, Task,
    TaskRepository,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

static TEST_DB_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub const POLL: Duration = Duration::from_millis(5);

/// Test fixture: the scheduler plus direct store access
pub struct TestEnv {
    pub _temp_dir: TempDir,
    pub db: Arc<Database>,
    pub scheduler: Scheduler,
}

impl TestEnv {
    pub fn tasks(&self) -> TaskRepository {
        TaskRepository::new(self.db.clone())
    }
}

/// Create a test database with a unique name
pub async fn setup_test_db() -> (TempDir, Arc<Database>) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path = temp_dir.path().join(format!("test_{}.db", counter));

    let db = Database::new(&db_path)
        .await
        .expect("Failed to create test database");

    (temp_dir, Arc::new(db))
}

/// Scheduler over a fresh file database with default configuration
pub async fn setup_scheduler() -> TestEnv {
    setup_scheduler_with(FlightdeckConfig::default()).await
}

pub async fn setup_scheduler_with(config: FlightdeckConfig) -> TestEnv {
    let (temp_dir, db) = setup_test_db().await;
    let scheduler = Scheduler::open(db.clone(), &config)
        .await
        .expect("Failed to open scheduler");

    TestEnv {
        _temp_dir: temp_dir,
        db,
        scheduler,
    }
}

/// Poll until the task is terminal, failing the test after 10 seconds
pub async fn wait_for_terminal(scheduler: &Scheduler, task_id: &str) -> Task {
    tokio::time::timeout(Duration::from_secs(10), scheduler.wait_for(task_id, POLL))
        .await
        .expect("task did not finish in time")
        .expect("store error while waiting")
}

/// Wait until the worker has released the category
pub async fn wait_until_idle(scheduler: &Scheduler, category: &str) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while scheduler.is_running(category).await.expect("store error") {
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .expect("category was not released in time");
}

/// Work function returning `{"symbol": subject}`
pub fn echo_work() -> SharedWorkFn {
    work_fn(|subject, _params| async move {
        Ok(ResultValue::map([("symbol", ResultValue::from(subject))]))
    })
}

/// Work function that sleeps before echoing the subject
pub fn slow_work(delay: Duration) -> SharedWorkFn {
    work_fn(move |subject, _params| async move {
        tokio::time::sleep(delay).await;
        Ok(ResultValue::from(subject))
    })
}

/// `count` subjects named S1, S2, ...
pub fn subjects(count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("S{}", i)).collect()
}
