//! Work function contract
//!
//! The engine knows nothing about what a unit of work does. Callers supply a
//! [`WorkFn`] that processes one subject at a time and reports either a result
//! payload or a unit-level error.

use crate::models::TaskParams;
use crate::normalize::ResultValue;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Outcome of processing one subject
pub type UnitResult = std::result::Result<ResultValue, UnitError>;

/// Failure of a single work unit. Recorded against that unit only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitError(String);

impl UnitError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for UnitError {}

impl From<String> for UnitError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UnitError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<anyhow::Error> for UnitError {
    fn from(e: anyhow::Error) -> Self {
        Self(format!("{:#}", e))
    }
}

impl From<std::io::Error> for UnitError {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}

/// Processes one subject of a task
#[async_trait]
pub trait WorkFn: Send + Sync {
    async fn run(&self, subject: &str, params: &TaskParams) -> UnitResult;
}

/// Shared handle to a work function
pub type SharedWorkFn = Arc<dyn WorkFn>;

/// Adapter turning an async closure into a [`WorkFn`]
pub struct FnWork<F>(F);

#[async_trait]
impl<F, Fut> WorkFn for FnWork<F>
where
    F: Fn(String, TaskParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = UnitResult> + Send + 'static,
{
    async fn run(&self, subject: &str, params: &TaskParams) -> UnitResult {
        (self.0)(subject.to_string(), params.clone()).await
    }
}

/// Wrap an async closure as a shared work function
///
/// ```
/// use flightdeck::{work_fn, ResultValue};
///
/// let work = work_fn(|subject, _params| async move {
///     Ok(ResultValue::from(format!("processed {}", subject)))
/// });
/// # let _ = work;
/// ```
pub fn work_fn<F, Fut>(f: F) -> SharedWorkFn
where
    F: Fn(String, TaskParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = UnitResult> + Send + 'static,
{
    Arc::new(FnWork(f))
}
