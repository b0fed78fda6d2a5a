//! The RecordStore trait, typed helpers and key listings

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{StoreError, StoreResult};
use crate::key::{path_to_key, prefix_dir};

/// Atomic storage of named byte records
///
/// Implementations must guarantee that a reader never observes a partially
/// written record, and that `get` fails with [`StoreError::Corrupted`] rather
/// than returning bytes that fail structural validation.
pub trait RecordStore: Send + Sync {
    /// Write the full record for `key`, replacing any previous value
    fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<()>;

    /// Read the record for `key`
    fn get(&self, key: &str) -> StoreResult<Vec<u8>>;

    /// List keys starting with `prefix`
    fn list(&self, prefix: &str) -> StoreResult<KeyListing>;

    /// Remove the record for `key`; removing a missing key is not an error
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Check whether a record exists without validating it
    fn exists(&self, key: &str) -> StoreResult<bool>;
}

/// Serde helpers on top of any [`RecordStore`]
pub trait RecordStoreExt: RecordStore {
    /// Serialize `value` as JSON and store it
    fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.put(key, &bytes)
    }

    /// Load and deserialize a JSON record
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<T> {
        let bytes = self.get(key)?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::corrupted(key, format!("invalid record body: {}", e)))
    }

    /// Like [`get_json`](Self::get_json) but maps a missing record to `None`
    fn get_json_opt<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get_json(key) {
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {}

/// A restartable listing of keys under a prefix
///
/// Each call to [`iter`](KeyListing::iter) starts a fresh, lazy walk.
#[derive(Debug, Clone)]
pub struct KeyListing {
    prefix: String,
    source: ListingSource,
}

#[derive(Debug, Clone)]
enum ListingSource {
    Dir(PathBuf),
    Snapshot(Vec<String>),
}

impl KeyListing {
    /// Listing backed by a directory walk under `root`
    pub(crate) fn dir(root: PathBuf, prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            source: ListingSource::Dir(root),
        }
    }

    /// Listing over an already materialized set of keys
    pub(crate) fn snapshot(prefix: &str, keys: Vec<String>) -> Self {
        Self {
            prefix: prefix.to_string(),
            source: ListingSource::Snapshot(keys),
        }
    }

    /// The prefix this listing was created for
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Start a new walk over the keys
    pub fn iter(&self) -> KeyIter<'_> {
        let inner = match &self.source {
            ListingSource::Dir(root) => {
                let dir = root.join(prefix_dir(&self.prefix));
                let walk = if dir.is_dir() {
                    Some(walkdir::WalkDir::new(dir).sort_by_file_name().into_iter())
                } else {
                    None
                };
                KeyIterInner::Walk { root, walk }
            }
            ListingSource::Snapshot(keys) => KeyIterInner::Snapshot(keys.iter()),
        };
        KeyIter {
            prefix: &self.prefix,
            inner,
        }
    }

    /// Collect every key, failing on the first walk error
    pub fn collect_keys(&self) -> StoreResult<Vec<String>> {
        self.iter().collect()
    }
}

/// Iterator produced by [`KeyListing::iter`]
pub struct KeyIter<'a> {
    prefix: &'a str,
    inner: KeyIterInner<'a>,
}

enum KeyIterInner<'a> {
    Walk {
        root: &'a Path,
        walk: Option<walkdir::IntoIter>,
    },
    Snapshot(std::slice::Iter<'a, String>),
}

impl Iterator for KeyIter<'_> {
    type Item = StoreResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            KeyIterInner::Snapshot(keys) => keys.next().cloned().map(Ok),
            KeyIterInner::Walk { root, walk } => {
                let walk = walk.as_mut()?;
                for entry in walk.by_ref() {
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(e) => {
                            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                            return Some(Err(StoreError::unavailable(path, e.into())));
                        }
                    };
                    if !entry.file_type().is_file() {
                        continue;
                    }
                    match path_to_key(root, entry.path()) {
                        Some(key) if key.starts_with(self.prefix) => return Some(Ok(key)),
                        _ => continue,
                    }
                }
                None
            }
        }
    }
}
