//! Per-item mutual exclusion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async lock per item id, created on first use.
///
/// Holding the guard for an item excludes every other holder of the same
/// item; different items never contend.
#[derive(Default)]
pub struct ItemLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `item_id`. Cancel-safe: dropping the
    /// future before it resolves leaves the lock untouched.
    pub async fn acquire(&self, item_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Entries only referenced by the map are idle.
            locks.retain(|id, lock| id == item_id || Arc::strong_count(lock) > 1);
            locks.entry(item_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Whether some task currently holds or waits for the item's lock.
    pub fn is_busy(&self, item_id: &str) -> bool {
        let locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .get(item_id)
            .is_some_and(|lock| Arc::strong_count(lock) > 1)
    }
}
