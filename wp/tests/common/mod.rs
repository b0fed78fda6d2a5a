//! Shared fixtures for waypoint integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use waypoint::config::Config;
use waypoint::{
    CollaboratorError, ContainerBackend, ContainerHandle, ContainerRef, ContainerResolution, ContainerStatus,
    ContextRehydrator, Rehydrated, Session, WindowedRehydrator, Waypoint,
};
use waystore::{MemoryStore, RecordStoreExt};

/// How a scripted container responds
#[derive(Debug, Clone)]
pub enum Behavior {
    Running,
    Gone,
    Hang,
    Fail(String),
    Panic,
}

/// Container backend driven by a per-container script
#[derive(Default)]
pub struct ScriptedContainers {
    resolve: Mutex<HashMap<String, Behavior>>,
    reattach: Mutex<HashMap<String, Behavior>>,
}

impl ScriptedContainers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script both resolve and reattach
    pub fn set(&self, container_id: &str, behavior: Behavior) {
        self.set_resolve(container_id, behavior.clone());
        self.set_reattach(container_id, behavior);
    }

    pub fn set_resolve(&self, container_id: &str, behavior: Behavior) {
        self.resolve.lock().unwrap().insert(container_id.to_string(), behavior);
    }

    pub fn set_reattach(&self, container_id: &str, behavior: Behavior) {
        self.reattach.lock().unwrap().insert(container_id.to_string(), behavior);
    }

    fn behavior(table: &Mutex<HashMap<String, Behavior>>, container_id: &str) -> Behavior {
        table
            .lock()
            .unwrap()
            .get(container_id)
            .cloned()
            .unwrap_or(Behavior::Gone)
    }
}

#[async_trait]
impl ContainerBackend for ScriptedContainers {
    async fn resolve(&self, container: &ContainerRef) -> Result<ContainerResolution, CollaboratorError> {
        match Self::behavior(&self.resolve, &container.container_id) {
            Behavior::Running => Ok(ContainerResolution::from_status(ContainerStatus::Running)),
            Behavior::Gone => Ok(ContainerResolution::from_status(ContainerStatus::Removed)),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(CollaboratorError::Unavailable("hung".to_string()))
            }
            Behavior::Fail(msg) => Err(CollaboratorError::Internal(msg)),
            Behavior::Panic => panic!("container manager exploded resolving {}", container.container_id),
        }
    }

    async fn reattach(&self, container: &ContainerRef) -> Result<ContainerHandle, CollaboratorError> {
        match Self::behavior(&self.reattach, &container.container_id) {
            Behavior::Running => Ok(ContainerHandle {
                container_id: container.container_id.clone(),
                status: ContainerStatus::Running,
            }),
            Behavior::Gone => Err(CollaboratorError::NotFound(container.container_id.clone())),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(CollaboratorError::Unavailable("hung".to_string()))
            }
            Behavior::Fail(msg) => Err(CollaboratorError::Internal(msg)),
            Behavior::Panic => panic!("container manager exploded reattaching {}", container.container_id),
        }
    }
}

/// Rehydrator that always fails
pub struct BrokenRehydrator;

#[async_trait]
impl ContextRehydrator for BrokenRehydrator {
    async fn rehydrate(
        &self,
        _fragments: &[waypoint::ContextFragment],
    ) -> Result<Rehydrated, CollaboratorError> {
        Err(CollaboratorError::Unavailable("llm endpoint down".to_string()))
    }
}

/// Components wired over an in-memory store
pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub containers: Arc<ScriptedContainers>,
    pub waypoint: Waypoint,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.checkpoints.max_checkpoints = 3;
    config.recovery.max_workers = 4;
    config.recovery.reconnect_timeout_ms = 200;
    config.recovery.max_context_fragments = 50;
    config
}

pub fn fixture() -> Fixture {
    fixture_with(test_config(), None)
}

pub fn fixture_with(config: Config, rehydrator: Option<Arc<dyn ContextRehydrator>>) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let containers = Arc::new(ScriptedContainers::new());
    let rehydrator = rehydrator
        .unwrap_or_else(|| Arc::new(WindowedRehydrator::new(config.recovery.max_context_fragments)));
    let waypoint = Waypoint::with_store(store.clone(), &config, containers.clone(), rehydrator);
    Fixture {
        store,
        containers,
        waypoint,
    }
}

pub fn data(step: u64) -> BTreeMap<String, serde_json::Value> {
    BTreeMap::from([("step".to_string(), json!(step))])
}

impl Fixture {
    /// Save an active session and give its task a recoverable checkpoint
    pub async fn resumable(&self, session_id: &str, task_id: &str, container: Option<&str>) -> Session {
        let mut session = Session::with_id(session_id, task_id);
        if let Some(container_id) = container {
            session = session.with_container(ContainerRef::new(container_id));
        }
        let saved = self
            .waypoint
            .state
            .save_session_state(session_id, session)
            .await
            .unwrap();
        self.waypoint
            .checkpoints
            .create_checkpoint(task_id, "plan", data(1), true)
            .await
            .unwrap();
        saved
    }

    /// Rewrite a stored session as if it was last saved `idle` ago
    pub fn backdate(&self, session_id: &str, idle: Duration) {
        let key = format!("sessions/{}", session_id);
        let mut session: Session = self.store.get_json(&key).unwrap();
        let ms = idle.as_millis() as i64;
        session.created_at -= ms;
        session.last_updated -= ms;
        self.store.put_json(&key, &session).unwrap();
    }
}
