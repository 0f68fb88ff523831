//! Per-project mutation locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Async mutexes keyed by project ID.
///
/// Directory rename/move/merge rewrite file paths across a whole subtree.
/// Holding the project lock for the duration of such a transaction keeps two
/// overlapping rewrites in the same process from interleaving. Projects never
/// contend with each other.
///
/// An entry referenced by the map alone is dropped on the next `lock` call,
/// so the map holds the projects with a holder or waiter plus at most one
/// released entry.
#[derive(Debug, Default)]
pub struct ProjectLocks {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl ProjectLocks {
    /// Wait for and take the lock of a project.
    pub async fn lock(&self, project_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Clones are only made under this mutex, so a count of 1 means
            // no guard and no waiter exists.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(project_id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of projects with a live lock entry.
    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no project has a live lock entry.
    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
