//! Active-session index
//!
//! A single record (`index/active`) listing the ids of every session whose
//! status is `active`. Kept separate from the session records so recovery can
//! find in-flight work without scanning all sessions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use waystore::{RecordStore, RecordStoreExt};

use crate::state::StateResponse;

/// Storage key of the active index
pub const ACTIVE_INDEX_KEY: &str = "index/active";

#[derive(Debug, Default, Serialize, Deserialize)]
struct ActiveIndexRecord {
    sessions: BTreeSet<String>,
}

/// Persistent set of active session ids with an in-memory cache
///
/// The cache is loaded lazily and only replaced after a successful write, so
/// a failed store write leaves both copies at the previous membership.
pub struct ActiveIndex {
    store: Arc<dyn RecordStore>,
    members: Mutex<Option<BTreeSet<String>>>,
}

impl ActiveIndex {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            members: Mutex::new(None),
        }
    }

    fn load(&self) -> StateResponse<BTreeSet<String>> {
        let record: Option<ActiveIndexRecord> = self.store.get_json_opt(ACTIVE_INDEX_KEY)?;
        Ok(record.map(|r| r.sessions).unwrap_or_default())
    }

    fn persist(&self, members: &BTreeSet<String>) -> StateResponse<()> {
        let record = ActiveIndexRecord {
            sessions: members.clone(),
        };
        self.store.put_json(ACTIVE_INDEX_KEY, &record)?;
        Ok(())
    }

    /// Apply `change` to the membership; writes only when it reports a change
    async fn update(&self, change: impl FnOnce(&mut BTreeSet<String>) -> bool) -> StateResponse<bool> {
        let mut guard = self.members.lock().await;
        let mut next = match guard.as_ref() {
            Some(members) => members.clone(),
            None => self.load()?,
        };
        if !change(&mut next) {
            *guard = Some(next);
            return Ok(false);
        }
        self.persist(&next)?;
        *guard = Some(next);
        Ok(true)
    }

    /// Add a session id; returns whether membership changed
    pub async fn register(&self, session_id: &str) -> StateResponse<bool> {
        debug!(%session_id, "register: called");
        self.update(|members| members.insert(session_id.to_string())).await
    }

    /// Remove a session id; returns whether membership changed
    pub async fn unregister(&self, session_id: &str) -> StateResponse<bool> {
        debug!(%session_id, "unregister: called");
        self.update(|members| members.remove(session_id)).await
    }

    /// Session ids currently registered, sorted
    pub async fn list(&self) -> StateResponse<Vec<String>> {
        let mut guard = self.members.lock().await;
        if guard.is_none() {
            *guard = Some(self.load()?);
        }
        Ok(guard.iter().flatten().cloned().collect())
    }

    /// Overwrite the membership wholesale
    pub async fn replace(&self, ids: BTreeSet<String>) -> StateResponse<()> {
        debug!(count = ids.len(), "replace: called");
        let mut guard = self.members.lock().await;
        self.persist(&ids)?;
        *guard = Some(ids);
        Ok(())
    }

    /// Forget the cached membership so the next call re-reads the store
    pub async fn invalidate(&self) {
        *self.members.lock().await = None;
    }
}
