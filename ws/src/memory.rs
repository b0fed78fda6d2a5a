//! In-memory RecordStore for tests and fault injection

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::frame;
use crate::key::{prefix_dir, validate_key};
use crate::store::{KeyListing, RecordStore};

/// RecordStore holding framed records in a map
///
/// Records are framed exactly like [`FileStore`](crate::FileStore) records, so
/// corruption injected with [`insert_raw`](MemoryStore::insert_raw) is caught
/// by the same validation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail as if the medium were gone
    pub fn set_unavailable(&self, unavailable: bool) {
        debug!(unavailable, "MemoryStore::set_unavailable: called");
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Store bytes verbatim, bypassing framing
    pub fn insert_raw(&self, key: &str, bytes: impl Into<Vec<u8>>) {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), bytes.into());
    }

    /// Raw framed bytes for a key
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if the store holds no records
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(
                PathBuf::from("memory"),
                std::io::Error::other("memory store marked unavailable"),
            ));
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        debug!(%key, len = bytes.len(), "MemoryStore::put: called");
        self.check_available()?;
        validate_key(key)?;
        self.insert_raw(key, frame::encode(bytes));
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        debug!(%key, "MemoryStore::get: called");
        self.check_available()?;
        validate_key(key)?;
        let framed = self.raw(key).ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        frame::decode(key, &framed)
    }

    fn list(&self, prefix: &str) -> StoreResult<KeyListing> {
        debug!(%prefix, "MemoryStore::list: called");
        self.check_available()?;
        let dir = prefix_dir(prefix);
        if !dir.is_empty() {
            validate_key(dir)?;
        }
        let keys = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        Ok(KeyListing::snapshot(prefix, keys))
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        debug!(%key, "MemoryStore::delete: called");
        self.check_available()?;
        validate_key(key)?;
        self.records.write().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        Ok(self.raw(key).is_some())
    }
}
