//! RecoveryEngine - classify every interrupted session after a restart
//!
//! Each active session is validated, then either resumed or archived, on a
//! bounded pool of workers. A failure in one session is isolated to that
//! session; only an unusable store aborts the run.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointManager;
use crate::collab::{CollaboratorError, ContainerBackend, ContainerHandle, ContextRehydrator};
use crate::domain::{Checkpoint, ContextFragment, Session, SessionStatus};
use crate::state::{StateError, StateManager, StateResponse};
use crate::tracker::SessionTracker;

use super::machine::{Machine, RecoveryEvent, RecoveryState};
use super::report::{RecoveryReport, SessionOutcome};

const SHUTDOWN_REASON: &str = "recovery interrupted by shutdown; session left active";

/// Tunables for a recovery run
#[derive(Debug, Clone, Copy)]
pub struct RecoveryOptions {
    /// Sessions recovered concurrently
    pub max_workers: usize,
    /// Upper bound on each collaborator call
    pub reconnect_timeout: Duration,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        Self {
            max_workers: 8,
            reconnect_timeout: Duration::from_secs(30),
        }
    }
}

/// A session that recovery brought back, ready for the caller to continue
#[derive(Debug, Clone)]
pub struct ResumedSession {
    pub session: Session,
    /// Checkpoint the session resumes from
    pub checkpoint: Checkpoint,
    pub container: Option<ContainerHandle>,
    /// Rehydrated conversation context
    pub context: Vec<ContextFragment>,
    /// Set when the context had to be truncated
    pub context_warning: Option<String>,
}

enum Validation {
    Ready { session: Session, checkpoint: Checkpoint },
    Inactive(SessionStatus),
}

/// Crash recovery over the state, checkpoint and tracker components
#[derive(Clone)]
pub struct RecoveryEngine {
    state: StateManager,
    checkpoints: CheckpointManager,
    tracker: SessionTracker,
    containers: Arc<dyn ContainerBackend>,
    context: Arc<dyn ContextRehydrator>,
    options: RecoveryOptions,
    handoff: Option<mpsc::Sender<ResumedSession>>,
    phase: Arc<Mutex<Machine>>,
}

impl RecoveryEngine {
    pub fn new(
        state: StateManager,
        checkpoints: CheckpointManager,
        tracker: SessionTracker,
        containers: Arc<dyn ContainerBackend>,
        context: Arc<dyn ContextRehydrator>,
        options: RecoveryOptions,
    ) -> Self {
        Self {
            state,
            checkpoints,
            tracker,
            containers,
            context,
            options,
            handoff: None,
            phase: Arc::new(Mutex::new(Machine::starting_at(RecoveryState::Normal))),
        }
    }

    /// Send every resumed session to `tx`
    pub fn with_handoff(mut self, tx: mpsc::Sender<ResumedSession>) -> Self {
        self.handoff = Some(tx);
        self
    }

    /// Current engine-wide phase
    pub fn phase(&self) -> RecoveryState {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner).state()
    }

    fn set_phase(&self, state: RecoveryState) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = Machine::starting_at(state);
    }

    fn advance_phase(&self, event: RecoveryEvent) -> StateResponse<RecoveryState> {
        let next = self.phase.lock().unwrap_or_else(PoisonError::into_inner).advance(event)?;
        debug!(phase = %next, ?event, "advance_phase: transitioned");
        Ok(next)
    }

    /// Classify every active session as resumed, cleaned or failed
    ///
    /// Fails only when the store is unavailable; the caller must then refuse
    /// to start.
    pub async fn run_recovery(&self) -> StateResponse<RecoveryReport> {
        self.run(None).await
    }

    /// Like [`run_recovery`](Self::run_recovery), but stop dispatching when shutdown arrives
    ///
    /// In-flight sessions finish; undispatched ones stay active and are
    /// reported as failed.
    pub async fn run_recovery_until(&self, shutdown_rx: &mut mpsc::Receiver<()>) -> StateResponse<RecoveryReport> {
        self.run(Some(shutdown_rx)).await
    }

    async fn run(&self, mut shutdown_rx: Option<&mut mpsc::Receiver<()>>) -> StateResponse<RecoveryReport> {
        debug!("run: called");
        info!(max_workers = self.options.max_workers, "Starting crash recovery");
        self.set_phase(RecoveryState::Detecting);

        let active = self.detect().await?;
        if active.is_empty() {
            self.advance_phase(RecoveryEvent::NoActiveSessions)?;
            self.advance_phase(RecoveryEvent::Settled)?;
            info!("No interrupted sessions found");
            return Ok(RecoveryReport::default());
        }
        self.advance_phase(RecoveryEvent::ActiveSessionsFound)?;
        info!(count = active.len(), "Found interrupted sessions");

        let semaphore = Arc::new(Semaphore::new(self.options.max_workers.max(1)));
        let aborted = Arc::new(AtomicBool::new(false));
        let mut workers = JoinSet::new();
        let mut dispatched = BTreeSet::new();
        let mut report = RecoveryReport::default();
        let mut pending = active.into_iter();

        for session_id in pending.by_ref() {
            if aborted.load(Ordering::SeqCst) {
                break;
            }
            let permit = match shutdown_rx.as_mut() {
                Some(rx) => tokio::select! {
                    permit = semaphore.clone().acquire_owned() => permit,
                    Some(()) = rx.recv() => {
                        warn!("Shutdown received; no further sessions will be dispatched");
                        report.interrupted = true;
                        report.record(session_id, SessionOutcome::Failed { reason: SHUTDOWN_REASON.to_string() });
                        break;
                    }
                },
                None => semaphore.clone().acquire_owned().await,
            }
            .map_err(|e| StateError::Internal(format!("worker pool closed: {}", e)))?;

            debug!(%session_id, "run: dispatching");
            dispatched.insert(session_id.clone());
            let engine = self.clone();
            let aborted = aborted.clone();
            workers.spawn(async move {
                let _permit = permit;
                let id = session_id.clone();
                let worker = tokio::spawn(async move { engine.recover_session(&id, &aborted).await });
                let result = match worker.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(%session_id, error = %e, "Recovery worker panicked");
                        Ok(SessionOutcome::Failed {
                            reason: format!("recovery worker panicked: {}", e),
                        })
                    }
                };
                (session_id, result)
            });
        }

        if report.interrupted {
            for session_id in pending {
                report.record(session_id, SessionOutcome::Failed { reason: SHUTDOWN_REASON.to_string() });
            }
        }

        let mut fatal = None;
        while let Some(joined) = workers.join_next().await {
            let (session_id, result) = match joined {
                Ok(joined) => joined,
                Err(e) => {
                    error!(error = %e, "run: recovery worker was lost");
                    continue;
                }
            };
            dispatched.remove(&session_id);
            match result {
                Ok(outcome) => report.record(session_id, outcome),
                Err(e) if e.is_fatal() => {
                    error!(%session_id, error = %e, "Store unavailable during recovery; aborting");
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    error!(%session_id, error_kind = e.kind(), error = %e, "Session recovery failed");
                    report.record(session_id, SessionOutcome::Failed { reason: e.to_string() });
                }
            }
        }

        if let Some(e) = fatal {
            return Err(e);
        }
        for session_id in dispatched {
            report.record(session_id, SessionOutcome::Failed {
                reason: "recovery worker was lost".to_string(),
            });
        }

        self.advance_phase(RecoveryEvent::AllClassified)?;
        let report = report.finalize();
        info!(%report, interrupted = report.interrupted, "Crash recovery complete");
        Ok(report)
    }

    /// Read the active set, rebuilding the index if it is unreadable
    async fn detect(&self) -> StateResponse<Vec<String>> {
        self.state.index().invalidate().await;
        match self.tracker.list_active().await {
            Ok(ids) => Ok(ids),
            Err(e @ StateError::Corrupted { .. }) => {
                warn!(error = %e, "Active session index corrupted; rebuilding from session records");
                self.tracker.rebuild_index().await?;
                self.tracker.list_active().await
            }
            Err(e) => Err(e),
        }
    }

    async fn recover_session(&self, session_id: &str, aborted: &AtomicBool) -> StateResponse<SessionOutcome> {
        debug!(%session_id, "recover_session: called");
        if aborted.load(Ordering::SeqCst) {
            return Err(StateError::StoreUnavailable("recovery aborted".to_string()));
        }
        let result = self.classify(session_id).await;
        if matches!(&result, Err(e) if e.is_fatal()) {
            aborted.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn classify(&self, session_id: &str) -> StateResponse<SessionOutcome> {
        let mut machine = Machine::starting_at(RecoveryState::Recovering);

        let failure = match self.validate(session_id).await {
            Ok(Validation::Inactive(status)) => {
                debug!(%session_id, %status, "classify: session no longer active");
                self.tracker.unregister(session_id).await?;
                return Ok(SessionOutcome::Cleaned {
                    reason: format!("session already {}", status),
                });
            }
            Ok(Validation::Ready { session, checkpoint }) => {
                machine.advance(RecoveryEvent::Validated)?;
                match self.resume(session, checkpoint).await {
                    Ok(resumed) => {
                        machine.advance(RecoveryEvent::Resumed)?;
                        info!(
                            %session_id,
                            checkpoint_id = %resumed.checkpoint.checkpoint_id,
                            step = %resumed.session.current_step,
                            "Resumed session"
                        );
                        self.hand_off(resumed).await;
                        return Ok(SessionOutcome::Resumed);
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        machine.advance(RecoveryEvent::ResumeFailed)?;
                        e
                    }
                }
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                machine.advance(RecoveryEvent::ValidationFailed)?;
                e
            }
        };

        warn!(%session_id, error_kind = failure.kind(), error = %failure, "Session cannot be resumed; archiving");
        match self.tracker.archive(session_id).await {
            Ok(()) => {
                machine.advance(RecoveryEvent::Archived)?;
                Ok(SessionOutcome::Cleaned {
                    reason: failure.to_string(),
                })
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                machine.advance(RecoveryEvent::ArchiveFailed)?;
                error!(%session_id, error_kind = e.kind(), error = %e, "Failed to archive session");
                Ok(SessionOutcome::Failed {
                    reason: format!("{}; archive failed: {}", failure, e),
                })
            }
        }
    }

    async fn validate(&self, session_id: &str) -> StateResponse<Validation> {
        let session = self.state.load_session_state(session_id).await?;
        if !session.is_active() {
            return Ok(Validation::Inactive(session.status));
        }

        let checkpoint = self.checkpoints.verify_chain(&session.task_id).await?;

        if let Some(container) = &session.container_state {
            let resolution = self
                .bounded("container resolve", self.containers.resolve(container))
                .await?;
            if !resolution.resolvable {
                return Err(StateError::ContainerUnresolvable(format!(
                    "{} is {}",
                    container.container_id, resolution.status
                )));
            }
        }

        Ok(Validation::Ready { session, checkpoint })
    }

    async fn resume(&self, session: Session, checkpoint: Checkpoint) -> StateResponse<ResumedSession> {
        let container = match &session.container_state {
            Some(container) => Some(
                self.bounded("container reattach", self.containers.reattach(container))
                    .await?,
            ),
            None => None,
        };

        let rehydrated = self
            .bounded("context rehydrate", self.context.rehydrate(&session.llm_context))
            .await?;
        let context_warning = rehydrated.warning().map(str::to_string);
        if let Some(warning) = &context_warning {
            warn!(session_id = %session.session_id, %warning, "Context truncated during rehydration");
        }

        Ok(ResumedSession {
            session,
            checkpoint,
            container,
            context: rehydrated.into_fragments(),
            context_warning,
        })
    }

    /// Run a collaborator call under the reconnect timeout
    async fn bounded<T>(
        &self,
        operation: &str,
        call: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> StateResponse<T> {
        match tokio::time::timeout(self.options.reconnect_timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StateError::ReconnectTimeout {
                operation: operation.to_string(),
                timeout: self.options.reconnect_timeout,
            }),
        }
    }

    async fn hand_off(&self, resumed: ResumedSession) {
        if let Some(tx) = &self.handoff {
            let session_id = resumed.session.session_id.clone();
            if tx.send(resumed).await.is_err() {
                warn!(%session_id, "Hand-off receiver dropped; resumed session not delivered");
            }
        }
    }
}
