//! Waypoint - session state persistence and crash recovery
//!
//! Persists the state of long-running work sessions so that an interrupted
//! process can restart, find the sessions it was running, and either resume
//! each one from its last recoverable checkpoint or archive it.
//!
//! # Components
//!
//! - [`StateManager`]: session records, validated and saved atomically
//! - [`CheckpointManager`]: immutable per-task checkpoints with retention
//! - [`SessionTracker`]: the active-session index and stale cleanup
//! - [`RecoveryEngine`]: startup classification of interrupted sessions
//!
//! All of them share one [`waystore::RecordStore`].

pub mod app;
pub mod checkpoint;
pub mod cli;
pub mod collab;
pub mod config;
pub mod domain;
pub mod recovery;
pub mod state;
pub mod tracker;

pub use app::Waypoint;
pub use checkpoint::{CheckpointManager, CheckpointRole, TaskIndex};
pub use collab::{
    CollaboratorError, ContainerBackend, ContainerHandle, ContainerResolution, ContainerStatus, ContextRehydrator,
    DetachedContainers, InMemoryContainers, Rehydrated, WindowedRehydrator,
};
pub use config::Config;
pub use domain::{Checkpoint, CheckpointId, ContainerRef, ContextFragment, Session, SessionStatus};
pub use recovery::{RecoveryEngine, RecoveryOptions, RecoveryReport, RecoveryState, ResumedSession, SessionOutcome};
pub use state::{StateError, StateManager, StateResponse};
pub use tracker::{ActiveIndex, SessionTracker};
