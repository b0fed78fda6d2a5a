//! State error types

use std::time::Duration;
use thiserror::Error;
use waystore::StoreError;

use crate::collab::CollaboratorError;

/// Errors from state, checkpoint, tracker and recovery operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record {key} is corrupted: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Container cannot be resolved: {0}")]
    ContainerUnresolvable(String),

    #[error("{operation} timed out after {}ms", .timeout.as_millis())]
    ReconnectTimeout { operation: String, timeout: Duration },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

impl StateError {
    pub(crate) fn corrupted(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Errors that must abort recovery instead of being isolated to one session
    pub fn is_fatal(&self) -> bool {
        matches!(self, StateError::StoreUnavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }

    /// Short machine-readable name for structured logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            StateError::NotFound(_) => "not_found",
            StateError::Corrupted { .. } => "corrupted",
            StateError::PolicyViolation(_) => "policy_violation",
            StateError::ContainerUnresolvable(_) => "container_unresolvable",
            StateError::ReconnectTimeout { .. } => "reconnect_timeout",
            StateError::StoreUnavailable(_) => "store_unavailable",
            StateError::Collaborator(_) => "collaborator",
            StateError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => StateError::NotFound(key),
            StoreError::Corrupted { key, reason } => StateError::Corrupted { key, reason },
            StoreError::InvalidKey { key, reason } => {
                StateError::PolicyViolation(format!("invalid key {:?}: {}", key, reason))
            }
            StoreError::Encode { .. } => StateError::Internal(err.to_string()),
            StoreError::ReadOnly { .. } => StateError::PolicyViolation(err.to_string()),
            StoreError::Locked { .. } | StoreError::Unavailable { .. } => StateError::StoreUnavailable(err.to_string()),
        }
    }
}

impl From<CollaboratorError> for StateError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::NotFound(what) => StateError::ContainerUnresolvable(what),
            other => StateError::Collaborator(other.to_string()),
        }
    }
}
