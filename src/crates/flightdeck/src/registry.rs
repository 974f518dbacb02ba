//! Registry of cancellation handles for tasks owned by this process
//!
//! Entries are inserted when a task is admitted and removed when its worker
//! finalizes. A task absent from the registry either finished or belongs to
//! a worker this process no longer has.
//!
//! Tasks are registered before their row is inserted. Row inserts and orphan
//! sweeps exclude each other, so a sweep never sees a row whose owner it
//! missed.

use crate::signal::CancelSignal;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct TaskRegistry {
    signals: Mutex<HashMap<String, CancelSignal>>,
    inserts: RwLock<()>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a task and hand back its (fresh) cancellation signal
    pub fn register(&self, task_id: &str) -> CancelSignal {
        let signal = CancelSignal::new();
        self.signals
            .lock()
            .insert(task_id.to_string(), signal.clone());
        signal
    }

    pub fn signal(&self, task_id: &str) -> Option<CancelSignal> {
        self.signals.lock().get(task_id).cloned()
    }

    pub fn remove(&self, task_id: &str) -> Option<CancelSignal> {
        self.signals.lock().remove(task_id)
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.signals.lock().contains_key(task_id)
    }

    /// Ids of all tracked tasks
    pub fn task_ids(&self) -> Vec<String> {
        self.signals.lock().keys().cloned().collect()
    }

    /// Held while a registered task's row is being inserted
    pub async fn inserting(&self) -> RwLockReadGuard<'_, ()> {
        self.inserts.read().await
    }

    /// Held across an orphan sweep: no row is inserted until it drops
    pub async fn sweeping(&self) -> RwLockWriteGuard<'_, ()> {
        self.inserts.write().await
    }

    pub fn len(&self) -> usize {
        self.signals.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.lock().is_empty()
    }
}
