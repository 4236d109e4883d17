//! Per-key async locks for idempotency critical sections.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A lock table keyed by idempotency key (payment session id, payment id).
///
/// Entries are created on demand and removed once no task holds or waits on
/// them.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Holds every lock acquired by [`KeyedLocks::acquire`] until dropped.
pub struct KeyedGuard<'a> {
    table: &'a KeyedLocks,
    keys: Vec<String>,
    guards: Vec<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock all `keys`. Keys are sorted and deduplicated first so two callers
    /// sharing a subset of keys cannot deadlock.
    pub async fn acquire(&self, keys: &[&str]) -> KeyedGuard<'_> {
        let mut keys: Vec<String> = keys
            .iter()
            .filter(|k| !k.is_empty())
            .map(|k| k.to_string())
            .collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let lock = self.locks.entry(key.clone()).or_default().clone();
            guards.push(lock.lock_owned().await);
        }

        KeyedGuard {
            table: self,
            keys,
            guards,
        }
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.guards.clear();
        for key in &self.keys {
            self.table
                .locks
                .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}
