//! Database repositories
//!
//! Background task rows and the run history written for completed batches.

pub mod run_history_repository;
pub mod task_repository;

pub use run_history_repository::{RunHistoryRepository, DEFAULT_HISTORY_LIMIT};
pub use task_repository::TaskRepository;
