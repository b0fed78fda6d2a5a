//! File-backed RecordStore
//!
//! Writes go to a uniquely named temp file next to the destination, are
//! fsynced, then renamed into place. The directory is fsynced after the
//! rename so the new entry survives a power loss.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::frame;
use crate::key::{key_to_path, prefix_dir, validate_key};
use crate::store::{KeyListing, RecordStore};

const LOCK_FILE: &str = ".lock";
/// Contains `~`, which no key segment may, so a record file never matches
const TEMP_MARKER: &str = ".rec~tmp~";

/// Durable store rooted at a directory
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    /// Held for the store's lifetime; `None` when opened read-only
    lock: Option<File>,
}

impl FileStore {
    /// Open (creating if needed) a store and take the single-writer lock
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        debug!(root = %root.display(), "FileStore::open: called");
        fs::create_dir_all(&root).map_err(|e| StoreError::unavailable(&root, e))?;

        let lock_path = root.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| StoreError::unavailable(&lock_path, e))?;

        if let Err(e) = lock.try_lock_exclusive() {
            if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() || e.kind() == ErrorKind::WouldBlock {
                return Err(StoreError::Locked { path: root });
            }
            return Err(StoreError::unavailable(&lock_path, e));
        }

        let swept = sweep_temp_files(&root)?;
        if swept > 0 {
            warn!(swept, root = %root.display(), "Removed temp files left by interrupted writes");
        }

        info!(root = %root.display(), "Opened durable store");
        Ok(Self { root, lock: Some(lock) })
    }

    /// Open an existing store for inspection without taking the writer lock
    pub fn open_read_only(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        debug!(root = %root.display(), "FileStore::open_read_only: called");
        if !root.is_dir() {
            return Err(StoreError::unavailable(
                &root,
                std::io::Error::new(ErrorKind::NotFound, "store directory does not exist"),
            ));
        }
        Ok(Self { root, lock: None })
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_writable(&self) -> StoreResult<()> {
        if self.lock.is_none() {
            return Err(StoreError::ReadOnly {
                path: self.root.clone(),
            });
        }
        Ok(())
    }
}

impl RecordStore for FileStore {
    fn put(&self, key: &str, bytes: &[u8]) -> StoreResult<()> {
        debug!(%key, len = bytes.len(), "FileStore::put: called");
        self.ensure_writable()?;
        let path = key_to_path(&self.root, key)?;
        let dir = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::unavailable(&dir, e))?;

        let stem = path.file_stem().and_then(|n| n.to_str()).unwrap_or("record");
        let tmp_path = dir.join(format!("{}{}{}", stem, TEMP_MARKER, Uuid::now_v7().simple()));

        let framed = frame::encode(bytes);
        let written = File::create_new(&tmp_path).and_then(|mut tmp| {
            tmp.write_all(&framed)?;
            tmp.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::unavailable(&tmp_path, e));
        }

        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(StoreError::unavailable(&path, e));
        }

        sync_dir(&dir)?;
        debug!(%key, "FileStore::put: record renamed into place");
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        debug!(%key, "FileStore::get: called");
        let path = key_to_path(&self.root, key)?;
        let framed = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(%key, "FileStore::get: record missing");
                return Err(StoreError::NotFound(key.to_string()));
            }
            Err(e) => return Err(StoreError::unavailable(&path, e)),
        };
        frame::decode(key, &framed)
    }

    fn list(&self, prefix: &str) -> StoreResult<KeyListing> {
        debug!(%prefix, "FileStore::list: called");
        let dir = prefix_dir(prefix);
        if !dir.is_empty() {
            validate_key(dir)?;
        }
        if !self.root.is_dir() {
            return Err(StoreError::unavailable(
                &self.root,
                std::io::Error::new(ErrorKind::NotFound, "store directory vanished"),
            ));
        }
        Ok(KeyListing::dir(self.root.clone(), prefix))
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        debug!(%key, "FileStore::delete: called");
        self.ensure_writable()?;
        let path = key_to_path(&self.root, key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                if let Some(dir) = path.parent() {
                    sync_dir(dir)?;
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::unavailable(&path, e)),
        }
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        let path = key_to_path(&self.root, key)?;
        Ok(path.is_file())
    }
}

/// Remove temp files from writes that never reached their rename
fn sweep_temp_files(root: &Path) -> StoreResult<usize> {
    let mut swept = 0;
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.map_err(|e| StoreError::unavailable(root, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let is_temp = entry
            .file_name()
            .to_str()
            .map(|name| name.contains(TEMP_MARKER))
            .unwrap_or(false);
        if is_temp {
            debug!(path = %entry.path().display(), "sweep_temp_files: removing");
            fs::remove_file(entry.path()).map_err(|e| StoreError::unavailable(entry.path(), e))?;
            swept += 1;
        }
    }
    Ok(swept)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> StoreResult<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| StoreError::unavailable(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> StoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_put_get_round_trip() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();

        store.put("sessions/s1", b"{\"step\":\"plan\"}").unwrap();
        assert_eq!(store.get("sessions/s1").unwrap(), b"{\"step\":\"plan\"}");
        assert!(temp.path().join("sessions").join("s1.rec").is_file());
    }

    #[test]
    fn test_get_missing_is_not_found() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();

        let err = store.get("sessions/ghost").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(ref k) if k == "sessions/ghost"));
    }

    #[test]
    fn test_overwrite_same_bytes_is_identical_on_disk() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        let path = temp.path().join("index").join("active.rec");

        store.put("index/active", b"[\"a\",\"b\"]").unwrap();
        let first = fs::read(&path).unwrap();
        store.put("index/active", b"[\"a\",\"b\"]").unwrap();
        let second = fs::read(&path).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_truncated_file_is_corrupted() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        store.put("sessions/s1", b"{\"a\":\"long enough payload\"}").unwrap();

        let path = temp.path().join("sessions").join("s1.rec");
        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();

        let err = store.get("sessions/s1").unwrap_err();
        assert!(matches!(err, StoreError::Corrupted { .. }));
    }

    #[test]
    fn test_no_temp_files_left_after_put() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        store.put("sessions/s1", b"x").unwrap();

        let leftovers: Vec<_> = fs::read_dir(temp.path().join("sessions"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(TEMP_MARKER))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_open_sweeps_interrupted_writes() {
        let temp = tempdir().unwrap();
        {
            let store = FileStore::open(temp.path()).unwrap();
            store.put("sessions/s1", b"committed").unwrap();
        }
        let orphan = temp.path().join("sessions").join("s2.rec~tmp~0123abcd");
        fs::write(&orphan, b"WSR1 100 deadbeef\npartial").unwrap();

        let store = FileStore::open(temp.path()).unwrap();
        assert!(!orphan.exists());
        assert_eq!(store.list("sessions/").unwrap().collect_keys().unwrap(), vec!["sessions/s1"]);
        assert!(store.get("sessions/s2").unwrap_err().is_not_found());
    }

    #[test]
    fn test_reopen_keeps_dotted_tmp_keys() {
        let temp = tempdir().unwrap();
        {
            let store = FileStore::open(temp.path()).unwrap();
            store.put("sessions/run.tmp.1", b"live").unwrap();
            store.put("index/tasks/build.tmp.x", b"index").unwrap();
        }

        let store = FileStore::open(temp.path()).unwrap();
        assert_eq!(store.get("sessions/run.tmp.1").unwrap(), b"live");
        assert_eq!(store.get("index/tasks/build.tmp.x").unwrap(), b"index");
        assert_eq!(
            store.list("sessions/").unwrap().collect_keys().unwrap(),
            vec!["sessions/run.tmp.1"]
        );
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let temp = tempdir().unwrap();
        let _first = FileStore::open(temp.path()).unwrap();

        let err = FileStore::open(temp.path()).unwrap_err();
        assert!(matches!(err, StoreError::Locked { .. }));
    }

    #[test]
    fn test_lock_released_on_drop() {
        let temp = tempdir().unwrap();
        drop(FileStore::open(temp.path()).unwrap());
        assert!(FileStore::open(temp.path()).is_ok());
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let temp = tempdir().unwrap();
        let writer = FileStore::open(temp.path()).unwrap();
        writer.put("sessions/s1", b"x").unwrap();

        let reader = FileStore::open_read_only(temp.path()).unwrap();
        assert_eq!(reader.get("sessions/s1").unwrap(), b"x");
        assert!(matches!(reader.put("sessions/s2", b"y"), Err(StoreError::ReadOnly { .. })));
        assert!(matches!(reader.delete("sessions/s1"), Err(StoreError::ReadOnly { .. })));
    }

    #[test]
    fn test_list_is_sorted_and_restartable() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        for seq in [3, 1, 2] {
            store.put(&format!("checkpoints/t1/{:010}", seq), b"{}").unwrap();
        }
        store.put("checkpoints/t2/0000000001", b"{}").unwrap();

        let listing = store.list("checkpoints/t1/").unwrap();
        let first: Vec<String> = listing.collect_keys().unwrap();
        assert_eq!(
            first,
            vec![
                "checkpoints/t1/0000000001",
                "checkpoints/t1/0000000002",
                "checkpoints/t1/0000000003",
            ]
        );
        let second: Vec<String> = listing.collect_keys().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_list_missing_prefix_is_empty() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        assert!(store.list("sessions/").unwrap().collect_keys().unwrap().is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        store.put("checkpoints/t1/0000000001", b"{}").unwrap();

        store.delete("checkpoints/t1/0000000001").unwrap();
        store.delete("checkpoints/t1/0000000001").unwrap();
        assert!(!store.exists("checkpoints/t1/0000000001").unwrap());
    }

    #[test]
    fn test_invalid_key_rejected() {
        let temp = tempdir().unwrap();
        let store = FileStore::open(temp.path()).unwrap();
        assert!(matches!(
            store.put("../escape", b"x"),
            Err(StoreError::InvalidKey { .. })
        ));
    }
}
