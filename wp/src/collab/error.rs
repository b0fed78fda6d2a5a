//! Collaborator error types

use thiserror::Error;

/// Errors reported by external collaborators
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Internal collaborator error: {0}")]
    Internal(String),
}
