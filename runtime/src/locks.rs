//! Per-sandbox mutual exclusion.
//!
//! Attach and detach for the same sandbox ID are serialized for the span
//! of plugin invocation plus store mutation. Entries are created on demand
//! and dropped once no caller holds or waits on them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock table keyed by sandbox ID.
#[derive(Default)]
pub struct SandboxLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SandboxLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn lock(&self, id: &str) -> SandboxGuard {
        let mutex = self
            .locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = mutex.lock_owned().await;
        SandboxGuard {
            id: id.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Number of sandbox IDs with a live lock entry.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one sandbox ID; released on drop.
pub struct SandboxGuard {
    id: String,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SandboxGuard {
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        // Release the mutex first so the map holds the only reference when
        // nobody else is waiting.
        self.guard.take();
        self.locks
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
