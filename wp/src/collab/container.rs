//! Container manager collaborator

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::domain::ContainerRef;

use super::CollaboratorError;

/// Last known status of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Exited,
    Removed,
    Unknown,
}

impl ContainerStatus {
    /// Whether a container in this status can be reattached
    pub fn is_resolvable(self) -> bool {
        matches!(self, ContainerStatus::Created | ContainerStatus::Running | ContainerStatus::Paused)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Exited => "exited",
            Self::Removed => "removed",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Result of asking whether a container still exists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerResolution {
    pub resolvable: bool,
    pub status: ContainerStatus,
}

impl ContainerResolution {
    pub fn from_status(status: ContainerStatus) -> Self {
        Self {
            resolvable: status.is_resolvable(),
            status,
        }
    }
}

/// A container reattached to a resumed session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    pub container_id: String,
    pub status: ContainerStatus,
}

/// Container manager as seen by recovery
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Report whether the referenced container can be resumed
    async fn resolve(&self, container: &ContainerRef) -> Result<ContainerResolution, CollaboratorError>;

    /// Reattach to the container, or fail with `NotFound`
    async fn reattach(&self, container: &ContainerRef) -> Result<ContainerHandle, CollaboratorError>;
}

/// Backend for processes with no container manager wired in
///
/// Nothing is resolvable, so sessions tied to a container are cleaned up.
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedContainers;

#[async_trait]
impl ContainerBackend for DetachedContainers {
    async fn resolve(&self, container: &ContainerRef) -> Result<ContainerResolution, CollaboratorError> {
        debug!(container_id = %container.container_id, "DetachedContainers::resolve: called");
        Ok(ContainerResolution::from_status(ContainerStatus::Unknown))
    }

    async fn reattach(&self, container: &ContainerRef) -> Result<ContainerHandle, CollaboratorError> {
        debug!(container_id = %container.container_id, "DetachedContainers::reattach: called");
        Err(CollaboratorError::NotFound(container.container_id.clone()))
    }
}

/// Container backend over a fixed table of container statuses
///
/// Containers missing from the table are reported as `removed`.
#[derive(Debug, Default)]
pub struct InMemoryContainers {
    statuses: RwLock<HashMap<String, ContainerStatus>>,
}

impl InMemoryContainers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status of a container
    pub fn set(&self, container_id: impl Into<String>, status: ContainerStatus) {
        self.statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(container_id.into(), status);
    }

    fn status_of(&self, container_id: &str) -> ContainerStatus {
        self.statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(container_id)
            .copied()
            .unwrap_or(ContainerStatus::Removed)
    }
}

#[async_trait]
impl ContainerBackend for InMemoryContainers {
    async fn resolve(&self, container: &ContainerRef) -> Result<ContainerResolution, CollaboratorError> {
        debug!(container_id = %container.container_id, "InMemoryContainers::resolve: called");
        Ok(ContainerResolution::from_status(self.status_of(&container.container_id)))
    }

    async fn reattach(&self, container: &ContainerRef) -> Result<ContainerHandle, CollaboratorError> {
        debug!(container_id = %container.container_id, "InMemoryContainers::reattach: called");
        let status = self.status_of(&container.container_id);
        if !status.is_resolvable() {
            return Err(CollaboratorError::NotFound(format!("{} is {}", container.container_id, status)));
        }
        Ok(ContainerHandle {
            container_id: container.container_id.clone(),
            status,
        })
    }
}
