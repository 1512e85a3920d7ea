//! Per-item mutual exclusion for the availability engine

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of one async mutex per equipment item.
///
/// The map lock is only held to look up or prune an entry, never while
/// waiting on an item, so items never block each other. Entries are
/// removed when the last guard for an item is dropped.
#[derive(Default)]
pub struct ItemLocks {
    entries: Mutex<HashMap<i32, Arc<AsyncMutex<()>>>>,
}

impl ItemLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to one item
    pub async fn acquire(&self, item_id: i32) -> ItemGuard<'_> {
        let entry = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.entry(item_id).or_default().clone()
        };
        let guard = entry.lock_owned().await;
        ItemGuard {
            guard: Some(guard),
            item_id,
            locks: self,
        }
    }

    /// Number of items with a tracked lock
    pub fn tracked(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Exclusive access to one item, released on drop
pub struct ItemGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    item_id: i32,
    locks: &'a ItemLocks,
}

impl ItemGuard<'_> {
    pub fn item_id(&self) -> i32 {
        self.item_id
    }
}

impl Drop for ItemGuard<'_> {
    fn drop(&mut self) {
        // Release first so our clone of the entry no longer counts
        self.guard.take();
        let mut entries = self.locks.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let idle = entries
            .get(&self.item_id)
            .map_or(false, |entry| Arc::strong_count(entry) == 1);
        if idle {
            entries.remove(&self.item_id);
        }
    }
}
