//! Record key validation and path mapping
//!
//! Keys are `/`-separated segments, each made of `[A-Za-z0-9._-]`.
//! A key `sessions/abc` lives at `<root>/sessions/abc.rec`.

use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};

/// File extension for stored records
pub const RECORD_EXT: &str = "rec";

/// Check a single key segment (also used by callers to vet ids)
pub fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
}

/// Validate a full key
pub fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(invalid(key, "empty key"));
    }
    for segment in key.split('/') {
        if !is_valid_segment(segment) {
            return Err(invalid(key, format!("bad segment {:?}", segment)));
        }
    }
    Ok(())
}

/// Map a key to its record file under `root`
pub fn key_to_path(root: &Path, key: &str) -> StoreResult<PathBuf> {
    validate_key(key)?;
    let mut path = root.to_path_buf();
    let (dir, name) = key.rsplit_once('/').unwrap_or(("", key));
    if !dir.is_empty() {
        path.extend(dir.split('/'));
    }
    // set_extension would clobber dotted ids like `v1.2`
    path.push(format!("{}.{}", name, RECORD_EXT));
    Ok(path)
}

/// Map a record file back to its key, if it is a record under `root`
pub fn path_to_key(root: &Path, path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
        return None;
    }
    let rel = path.strip_prefix(root).ok()?.with_extension("");
    let segments: Vec<&str> = rel.components().map(|c| c.as_os_str().to_str()).collect::<Option<_>>()?;
    let key = segments.join("/");
    validate_key(&key).ok()?;
    Some(key)
}

/// Directory portion of a listing prefix (`checkpoints/t1/` -> `checkpoints/t1`)
pub(crate) fn prefix_dir(prefix: &str) -> &str {
    match prefix.rfind('/') {
        Some(idx) => &prefix[..idx],
        None => "",
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidKey {
        key: key.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert!(validate_key("sessions/019a-sess").is_ok());
        assert!(validate_key("checkpoints/task_1/0000000001").is_ok());
        assert!(validate_key("index/active").is_ok());
    }

    #[test]
    fn test_invalid_keys() {
        assert!(validate_key("").is_err());
        assert!(validate_key("sessions//x").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("sessions/a b").is_err());
        assert!(validate_key("sessions/").is_err());
    }

    #[test]
    fn test_path_round_trip() {
        let root = Path::new("/tmp/state");
        let path = key_to_path(root, "checkpoints/t1/0000000003").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/state/checkpoints/t1/0000000003.rec"));
        assert_eq!(path_to_key(root, &path).as_deref(), Some("checkpoints/t1/0000000003"));
    }

    #[test]
    fn test_dotted_segment_keeps_its_dots() {
        let root = Path::new("/tmp/state");
        let path = key_to_path(root, "sessions/v1.2").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/state/sessions/v1.2.rec"));
        assert_eq!(path_to_key(root, &path).as_deref(), Some("sessions/v1.2"));
    }

    #[test]
    fn test_path_to_key_ignores_temp_files() {
        let root = Path::new("/tmp/state");
        assert!(path_to_key(root, Path::new("/tmp/state/sessions/a.rec~tmp~123")).is_none());
        assert!(path_to_key(root, Path::new("/tmp/state/.lock")).is_none());
    }

    #[test]
    fn test_prefix_dir() {
        assert_eq!(prefix_dir("checkpoints/t1/"), "checkpoints/t1");
        assert_eq!(prefix_dir("sessions/ab"), "sessions");
        assert_eq!(prefix_dir("sess"), "");
    }
}
