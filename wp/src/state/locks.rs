//! Keyed async lock table
//!
//! One `tokio::sync::Mutex` per key. Waiters on the same key are served in
//! FIFO order; different keys never contend beyond the brief table lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;

/// Table of per-key async mutexes
#[derive(Debug, Default)]
pub struct KeyLocks {
    table: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting behind earlier callers
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut table = self.table.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Drop entries nobody holds or waits on
            if table.len() > 1024 {
                table.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            table.entry(key.to_string()).or_default().clone()
        };
        entry.lock_owned().await
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or_else(|p| p.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
