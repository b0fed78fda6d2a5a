//! Component wiring
//!
//! Builds the state, checkpoint, tracker and recovery components over one
//! shared record store.

use std::sync::Arc;
use tracing::debug;
use waystore::{FileStore, RecordStore};

use crate::checkpoint::CheckpointManager;
use crate::collab::{ContainerBackend, ContextRehydrator, DetachedContainers, WindowedRehydrator};
use crate::config::Config;
use crate::recovery::RecoveryEngine;
use crate::state::{StateManager, StateResponse};
use crate::tracker::{ActiveIndex, SessionTracker};

/// All components over one store
#[derive(Clone)]
pub struct Waypoint {
    pub state: StateManager,
    pub checkpoints: CheckpointManager,
    pub tracker: SessionTracker,
    pub engine: RecoveryEngine,
}

impl Waypoint {
    /// Open the configured state directory as its single writer
    ///
    /// No container manager is wired, so sessions tied to a container are
    /// treated as unresolvable.
    pub fn open(config: &Config) -> StateResponse<Self> {
        let path = config.storage.state_path();
        debug!(path = %path.display(), "Waypoint::open: called");
        let store = FileStore::open(&path)?;
        Ok(Self::with_store(
            Arc::new(store),
            config,
            Arc::new(DetachedContainers),
            Arc::new(WindowedRehydrator::new(config.recovery.max_context_fragments)),
        ))
    }

    /// Open the configured state directory for reading only
    pub fn open_read_only(config: &Config) -> StateResponse<Self> {
        let path = config.storage.state_path();
        debug!(path = %path.display(), "Waypoint::open_read_only: called");
        let store = FileStore::open_read_only(&path)?;
        Ok(Self::with_store(
            Arc::new(store),
            config,
            Arc::new(DetachedContainers),
            Arc::new(WindowedRehydrator::new(config.recovery.max_context_fragments)),
        ))
    }

    /// Wire every component over `store` with the given collaborators
    pub fn with_store(
        store: Arc<dyn RecordStore>,
        config: &Config,
        containers: Arc<dyn ContainerBackend>,
        context: Arc<dyn ContextRehydrator>,
    ) -> Self {
        let index = Arc::new(ActiveIndex::new(store.clone()));
        let state = StateManager::new(store.clone(), index);
        let checkpoints = CheckpointManager::new(store, config.checkpoints.max_checkpoints);
        let tracker = SessionTracker::new(state.clone(), containers.clone(), config.recovery.reconnect_timeout());
        let engine = RecoveryEngine::new(
            state.clone(),
            checkpoints.clone(),
            tracker.clone(),
            containers,
            context,
            config.recovery.options(),
        );
        Self {
            state,
            checkpoints,
            tracker,
            engine,
        }
    }
}
