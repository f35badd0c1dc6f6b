//! Per-(record, view) single flight
//!
//! At most one request recomputes a given view of a given record at a time.
//! Later arrivals wait on the same lock and then re-check the archive.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;

type Key = (String, String);
type LockMap = HashMap<Key, Arc<tokio::sync::Mutex<()>>>;

#[derive(Debug, Default)]
pub struct InflightLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl InflightLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `view` of record `identifier`
    pub async fn acquire(&self, identifier: &str, view: &str) -> InflightGuard {
        let key = (identifier.to_string(), view.to_string());
        let lock = lock_map(&self.locks)
            .entry(key.clone())
            .or_default()
            .clone();

        let guard = lock.lock_owned().await;
        InflightGuard {
            key,
            locks: self.locks.clone(),
            _guard: guard,
        }
    }

    /// Keys currently locked or waited on
    pub fn len(&self) -> usize {
        lock_map(&self.locks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock_map(locks: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Held while a view is being recomputed
pub struct InflightGuard {
    key: Key,
    locks: Arc<Mutex<LockMap>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        let mut locks = lock_map(&self.locks);
        // One reference in the map, one held by our guard: nobody is waiting
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) <= 2)
        {
            locks.remove(&self.key);
        }
    }
}
