//! External collaborators used during recovery
//!
//! The container manager and the LLM client are outside this crate; recovery
//! reaches them through these traits so callers can wire real clients and
//! tests can script their behavior.

mod container;
mod context;
mod error;

pub use container::{
    ContainerBackend, ContainerHandle, ContainerResolution, ContainerStatus, DetachedContainers, InMemoryContainers,
};
pub use context::{ContextRehydrator, Rehydrated, WindowedRehydrator};
pub use error::CollaboratorError;
