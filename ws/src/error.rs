//! Store error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors from durable store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record {key} is corrupted: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("Invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Failed to encode record {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Store at {path} was opened read-only")]
    ReadOnly { path: PathBuf },

    #[error("Store at {path} is locked by another process")]
    Locked { path: PathBuf },

    #[error("Store unavailable at {path}: {source}")]
    Unavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn corrupted(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unavailable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Unavailable {
            path: path.into(),
            source,
        }
    }

    /// Check if this is a missing-record error
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Check if the storage medium itself is unusable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable { .. } | StoreError::Locked { .. })
    }
}

/// Result alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        assert!(StoreError::NotFound("sessions/a".to_string()).is_not_found());
        assert!(!StoreError::corrupted("sessions/a", "bad magic").is_not_found());
    }

    #[test]
    fn test_is_unavailable() {
        let err = StoreError::unavailable("/nope", std::io::Error::other("disk gone"));
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("disk gone"));

        let err = StoreError::Locked {
            path: PathBuf::from("/state"),
        };
        assert!(err.is_unavailable());

        assert!(!StoreError::NotFound("x".to_string()).is_unavailable());
    }
}
