//! Single-flight admission gate
//!
//! At most one task per category may hold a permit. Acquisition never blocks:
//! a busy category is reported immediately. The permit is released when the
//! [`CategoryPermit`] is dropped, so a worker that exits on any path (normal
//! completion, failure, or panic) frees its category.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Per-category mutual exclusion
#[derive(Debug, Default)]
pub struct AdmissionGate {
    held: Mutex<HashSet<String>>,
}

impl AdmissionGate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Try to take the category's permit without waiting
    pub fn try_acquire(self: &Arc<Self>, category: &str) -> Option<CategoryPermit> {
        let mut held = self.held.lock();
        if !held.insert(category.to_string()) {
            debug!(category, "Category permit already held");
            return None;
        }

        Some(CategoryPermit {
            gate: Arc::clone(self),
            category: category.to_string(),
        })
    }

    pub fn is_held(&self, category: &str) -> bool {
        self.held.lock().contains(category)
    }

    /// Categories currently holding a permit
    pub fn held_categories(&self) -> Vec<String> {
        let mut categories: Vec<_> = self.held.lock().iter().cloned().collect();
        categories.sort();
        categories
    }

    fn release(&self, category: &str) {
        self.held.lock().remove(category);
        debug!(category, "Category permit released");
    }
}

/// Proof of exclusive admission for one category; releases on drop
#[derive(Debug)]
pub struct CategoryPermit {
    gate: Arc<AdmissionGate>,
    category: String,
}

impl CategoryPermit {
    pub fn category(&self) -> &str {
        &self.category
    }
}

impl Drop for CategoryPermit {
    fn drop(&mut self) {
        self.gate.release(&self.category);
    }
}
