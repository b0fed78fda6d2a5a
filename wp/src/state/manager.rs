//! StateManager - sole reader and writer of session records
//!
//! Saves for one session id are serialized through a keyed lock; saves for
//! different ids proceed in parallel. Every effective save keeps the active
//! index in step with the session's status.

use std::sync::Arc;
use tracing::{debug, info, warn};
use waystore::{RecordStore, RecordStoreExt, now_ms};

use crate::domain::{Session, SessionStatus};
use crate::tracker::ActiveIndex;

use super::error::{StateError, StateResponse};
use super::locks::KeyLocks;

/// Key prefix of session records
pub const SESSION_PREFIX: &str = "sessions/";

/// Storage key of a session record
pub fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_PREFIX, session_id)
}

/// Handle to persisted session state
#[derive(Clone)]
pub struct StateManager {
    store: Arc<dyn RecordStore>,
    index: Arc<ActiveIndex>,
    locks: Arc<KeyLocks>,
}

impl StateManager {
    /// Create a manager over `store`, keeping `index` in sync
    pub fn new(store: Arc<dyn RecordStore>, index: Arc<ActiveIndex>) -> Self {
        Self {
            store,
            index,
            locks: Arc::new(KeyLocks::new()),
        }
    }

    /// Active index this manager maintains
    pub fn index(&self) -> &Arc<ActiveIndex> {
        &self.index
    }

    /// Underlying record store
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Create and persist a new active session for a task
    pub async fn create_session(&self, task_id: &str) -> StateResponse<Session> {
        debug!(%task_id, "create_session: called");
        let session = Session::new(task_id);
        let session_id = session.session_id.clone();
        let saved = self.save_session_state(&session_id, session).await?;
        info!(%session_id, %task_id, "Created session");
        Ok(saved)
    }

    /// Validate and persist a session, returning the stored record
    ///
    /// If the incoming content matches what is stored, nothing is written and
    /// the stored record is returned unchanged.
    pub async fn save_session_state(&self, session_id: &str, session: Session) -> StateResponse<Session> {
        debug!(%session_id, status = %session.status, "save_session_state: called");
        let _guard = self.locks.lock(session_id).await;
        self.save_locked(session_id, session).await
    }

    /// Load the current state of a session
    pub async fn load_session_state(&self, session_id: &str) -> StateResponse<Session> {
        debug!(%session_id, "load_session_state: called");
        let session: Session = self.store.get_json(&session_key(session_id))?;
        Ok(session)
    }

    /// Read-modify-write a session under its lock
    pub async fn update_session<F>(&self, session_id: &str, change: F) -> StateResponse<Session>
    where
        F: FnOnce(&mut Session),
    {
        debug!(%session_id, "update_session: called");
        let _guard = self.locks.lock(session_id).await;
        let mut session: Session = self.store.get_json(&session_key(session_id))?;
        change(&mut session);
        self.save_locked(session_id, session).await
    }

    /// Move a session out of `active`
    ///
    /// Closing as `completed` leaves it for later archival; closing as
    /// `archived` is terminal.
    pub async fn close_session(&self, session_id: &str, status: SessionStatus) -> StateResponse<Session> {
        debug!(%session_id, %status, "close_session: called");
        if status.is_active() {
            return Err(StateError::PolicyViolation(format!(
                "cannot close session {} as {}",
                session_id, status
            )));
        }
        let closed = self.update_session(session_id, |s| s.set_status(status)).await?;
        info!(%session_id, %status, "Closed session");
        Ok(closed)
    }

    /// All session records, any status, sorted by id
    pub async fn list_sessions(&self) -> StateResponse<Vec<Session>> {
        debug!("list_sessions: called");
        let listing = self.store.list(SESSION_PREFIX)?;
        let mut sessions = Vec::new();
        for key in listing.iter() {
            let key = key?;
            match self.store.get_json::<Session>(&key) {
                Ok(session) => sessions.push(session),
                Err(e) if !e.is_unavailable() => {
                    warn!(%key, error = %e, "list_sessions: skipping unreadable session record");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(sessions)
    }

    async fn save_locked(&self, session_id: &str, mut session: Session) -> StateResponse<Session> {
        if session.session_id != session_id {
            return Err(StateError::PolicyViolation(format!(
                "session_id mismatch: saving {} under {}",
                session.session_id, session_id
            )));
        }
        session.validate().map_err(StateError::PolicyViolation)?;

        let key = session_key(session_id);
        let existing: Option<Session> = self.store.get_json_opt(&key)?;

        if let Some(stored) = &existing {
            check_update(stored, &session)?;
            if stored.same_content(&session) {
                debug!(%session_id, revision = stored.revision, "save_session_state: unchanged, skipping write");
                self.sync_index(stored).await?;
                return Ok(stored.clone());
            }
        }

        let previous_update = existing.as_ref().map(|s| s.last_updated).unwrap_or(i64::MIN);
        session.last_updated = now_ms().max(session.created_at).max(previous_update);
        session.revision = existing.as_ref().map(|s| s.revision).unwrap_or(0) + 1;

        // Register before writing so the index never misses an active record
        if session.status.is_active() {
            self.index.register(session_id).await?;
        }
        self.store.put_json(&key, &session)?;
        if !session.status.is_active() {
            self.index.unregister(session_id).await?;
        }

        debug!(%session_id, revision = session.revision, status = %session.status, "save_session_state: saved");
        Ok(session)
    }

    async fn sync_index(&self, session: &Session) -> StateResponse<()> {
        if session.status.is_active() {
            self.index.register(&session.session_id).await?;
        } else {
            self.index.unregister(&session.session_id).await?;
        }
        Ok(())
    }
}

/// Check the fields that may not change once a session is stored
fn check_update(stored: &Session, incoming: &Session) -> StateResponse<()> {
    if stored.task_id != incoming.task_id {
        return Err(StateError::PolicyViolation(format!(
            "task_id of session {} is immutable ({} -> {})",
            stored.session_id, stored.task_id, incoming.task_id
        )));
    }
    if stored.created_at != incoming.created_at {
        return Err(StateError::PolicyViolation(format!(
            "created_at of session {} is immutable",
            stored.session_id
        )));
    }
    if !stored.status.can_transition_to(incoming.status) {
        return Err(StateError::PolicyViolation(format!(
            "session {} cannot move from {} to {}",
            stored.session_id, stored.status, incoming.status
        )));
    }
    Ok(())
}
