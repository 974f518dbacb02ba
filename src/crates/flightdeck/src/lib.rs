//! # flightdeck - Single-Flight Background Task Engine
//!
//! Runs long batch jobs off the caller's path while keeping their progress,
//! outcome and results durable in SQLite. At most one task per category is
//! live at a time; a caller that arrives while one is running is told so
//! instead of queueing behind it.
//!
//! ## Features
//!
//! - **Single-Flight Admission** - One live task per category, checked in-process and in the store
//! - **Detached Workers** - `start` returns as soon as the task row exists
//! - **Sequential or Bounded-Parallel** - Units run one at a time or through a fixed-size pool
//! - **Fault Isolation** - Errors, panics and timeouts fail a unit, never the batch
//! - **Cooperative Cancellation** - Workers stop at unit boundaries and keep partial results
//! - **Durable Progress** - Counters only move forward; results are written once
//! - **Run History** - Summaries of completed batches with aggregate statistics
//! - **Dual-Location Config** - User-level and project-level TOML configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flightdeck::{work_fn, FlightdeckConfig, ResultValue, Scheduler, TaskRequest};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let scheduler = Scheduler::from_config(&FlightdeckConfig::default()).await?;
//!
//! let work = work_fn(|subject, _params| async move {
//!     Ok(ResultValue::from(format!("screened {}", subject)))
//! });
//!
//! let outcome = scheduler
//!     .start("screening", work, TaskRequest::new(["AAPL", "MSFT"]).parallel(2))
//!     .await;
//!
//! if let Some(task_id) = outcome.task_id() {
//!     let task = scheduler.wait_for(task_id, Duration::from_millis(100)).await?;
//!     println!("{}: {:?}", task.status, task.results);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The [`Scheduler`] facade owns an admission gate, a registry of cancellation
//! signals and an execution engine. Every state change goes through the task
//! store, whose SQL guards keep terminal rows immutable. Readers only ever
//! see the store, so any process sharing the database can observe a task.

pub mod admission;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod registry;
pub mod repositories;
pub mod scheduler;
pub mod signal;
pub mod version;
pub mod work;

// Error types and utilities
mod error;

// Re-export key types for convenience
pub use admission::{AdmissionGate, CategoryPermit};
pub use config::{load_config, ConfigLoader, FlightdeckConfig};
pub use db::Database;
pub use engine::{CompletionHook, ExecutionEngine, Finish, Submission, UnitOutcome};
pub use models::{
    ExecutionMode, ProgressUpdate, RunRecord, RunStatistics, Task, TaskParams, TaskProgress,
    TaskStatus,
};
pub use normalize::{normalize, ResultValue, Table, MAX_TABLE_ROWS};
pub use registry::TaskRegistry;
pub use repositories::{RunHistoryRepository, TaskRepository};
pub use scheduler::{AdmissionError, CancelOutcome, Scheduler, StartOutcome, TaskRequest};
pub use signal::CancelSignal;
pub use version::VersionInfo;
pub use work::{work_fn, SharedWorkFn, UnitError, UnitResult, WorkFn};

// Error types
pub use error::{FlightdeckError, Result};
