//! Process-wide concurrency primitives shared by all workers.
//!
//! Owned by the orchestrator and injected into every worker at construction;
//! there are no global singletons, which keeps tests deterministic.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock, Semaphore};

/// The lock table for one migration run.
pub struct MigrationLocks {
    run_alone: RwLock<()>,
    named: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl MigrationLocks {
    pub fn new() -> Self {
        Self {
            run_alone: RwLock::new(()),
            named: Mutex::new(HashMap::new()),
        }
    }

    /// The fleet-wide exclusion lock: normal migrations hold it shared,
    /// `$run_alone` migrations hold it exclusively. tokio's RwLock is
    /// write-preferring, so a waiting run-alone migration blocks new readers.
    pub fn run_alone(&self) -> &RwLock<()> {
        &self.run_alone
    }

    /// Fetch or create the named semaphore for `key`.
    ///
    /// The capacity is fixed on first reference; every instance of a version
    /// carries the same directives, so later callers agree on it. `None`
    /// means unlimited.
    pub async fn named(&self, key: &str, capacity: Option<usize>) -> Arc<Semaphore> {
        let cap = capacity
            .unwrap_or(Semaphore::MAX_PERMITS)
            .clamp(1, Semaphore::MAX_PERMITS);
        Arc::clone(
            self.named
                .lock()
                .await
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(cap))),
        )
    }
}

impl Default for MigrationLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "locks_test.rs"]
mod tests;
