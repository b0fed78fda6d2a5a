//! SessionTracker - which sessions are active, and archival of dead ones

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use waystore::now_ms;

use crate::collab::ContainerBackend;
use crate::domain::{Session, SessionStatus};
use crate::state::{StateError, StateManager, StateResponse};

use super::ActiveIndex;

/// Tracks active sessions and archives the ones that cannot continue
#[derive(Clone)]
pub struct SessionTracker {
    state: StateManager,
    containers: Arc<dyn ContainerBackend>,
    resolve_timeout: Duration,
}

impl SessionTracker {
    pub fn new(state: StateManager, containers: Arc<dyn ContainerBackend>, resolve_timeout: Duration) -> Self {
        Self {
            state,
            containers,
            resolve_timeout,
        }
    }

    fn index(&self) -> &Arc<ActiveIndex> {
        self.state.index()
    }

    /// Mark a session id active; no-op if already registered
    pub async fn register(&self, session_id: &str) -> StateResponse<bool> {
        self.index().register(session_id).await
    }

    /// Remove a session id from the active set; no-op if absent
    pub async fn unregister(&self, session_id: &str) -> StateResponse<bool> {
        self.index().unregister(session_id).await
    }

    /// Ids of all active sessions, sorted
    pub async fn list_active(&self) -> StateResponse<Vec<String>> {
        debug!("list_active: called");
        self.index().list().await
    }

    /// Mark a session archived and drop it from the active set
    ///
    /// A missing record is only unregistered. A corrupted record is
    /// unregistered and the corruption is returned.
    pub async fn archive(&self, session_id: &str) -> StateResponse<()> {
        debug!(%session_id, "archive: called");
        match self
            .state
            .update_session(session_id, |s| s.set_status(SessionStatus::Archived))
            .await
        {
            Ok(_) => {
                info!(%session_id, "Archived session");
                Ok(())
            }
            Err(StateError::NotFound(_)) => {
                warn!(%session_id, "archive: no session record, unregistering");
                self.unregister(session_id).await?;
                Ok(())
            }
            Err(e @ StateError::Corrupted { .. }) => {
                warn!(%session_id, error = %e, "archive: session record corrupted, unregistering");
                self.unregister(session_id).await?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Rebuild the active index from the session records
    pub async fn rebuild_index(&self) -> StateResponse<usize> {
        debug!("rebuild_index: called");
        let active: BTreeSet<String> = self
            .state
            .list_sessions()
            .await?
            .into_iter()
            .filter(Session::is_active)
            .map(|s| s.session_id)
            .collect();
        let count = active.len();
        self.index().replace(active).await?;
        info!(count, "Rebuilt active session index");
        Ok(count)
    }

    /// Archive active sessions idle longer than `ttl` whose container is gone
    ///
    /// A session with no container counts as unresolvable. Sessions whose
    /// container cannot be checked are left alone. Returns the archived ids.
    pub async fn cleanup_stale_sessions(&self, ttl: Duration) -> StateResponse<Vec<String>> {
        debug!(ttl_secs = ttl.as_secs(), "cleanup_stale_sessions: called");
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let now = now_ms();
        let mut archived = Vec::new();

        for session_id in self.list_active().await? {
            let session = match self.state.load_session_state(&session_id).await {
                Ok(session) => session,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(%session_id, error = %e, "cleanup_stale_sessions: cannot load session, skipping");
                    continue;
                }
            };
            if session.idle_ms(now) <= ttl_ms {
                continue;
            }
            if !self.container_gone(&session).await {
                continue;
            }
            match self.archive(&session_id).await {
                Ok(()) => archived.push(session_id),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(%session_id, error = %e, "cleanup_stale_sessions: archive failed"),
            }
        }

        if !archived.is_empty() {
            info!(count = archived.len(), "Archived stale sessions");
        }
        Ok(archived)
    }

    /// Whether the session's container is definitely unresolvable
    async fn container_gone(&self, session: &Session) -> bool {
        let Some(container) = &session.container_state else {
            return true;
        };
        match tokio::time::timeout(self.resolve_timeout, self.containers.resolve(container)).await {
            Ok(Ok(resolution)) => !resolution.resolvable,
            Ok(Err(e)) => {
                warn!(session_id = %session.session_id, container_id = %container.container_id, error = %e, "container_gone: resolve failed, skipping");
                false
            }
            Err(_) => {
                warn!(session_id = %session.session_id, container_id = %container.container_id, "container_gone: resolve timed out, skipping");
                false
            }
        }
    }

    /// Run stale cleanup every `interval` until shutdown is received
    pub async fn run_cleanup_loop(&self, interval: Duration, ttl: Duration, mut shutdown_rx: mpsc::Receiver<()>) -> StateResponse<()> {
        debug!(interval_secs = interval.as_secs(), "run_cleanup_loop: called");
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.cleanup_stale_sessions(ttl).await {
                        Ok(archived) => debug!(count = archived.len(), "run_cleanup_loop: pass complete"),
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => warn!(error = %e, "run_cleanup_loop: pass failed"),
                    }
                }
                Some(()) = shutdown_rx.recv() => {
                    info!("Cleanup loop shutting down");
                    return Ok(());
                }
            }
        }
    }
}
