//! CLI command implementations
//!
//! Provides command handlers for the flightdeck CLI binary.

pub mod command;
pub mod history;
pub mod task;

pub use command::CommandWork;
pub use task::{parse_params, RunArgs};
