//! Recovery state machine
//!
//! One transition table drives both the engine-wide phase and each session's
//! path through recovery.

use serde::Serialize;

use crate::state::{StateError, StateResponse};

/// Phase of recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    Clean,
    Detecting,
    Recovering,
    Resuming,
    CleaningUp,
    Normal,
}

impl std::fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Clean => "clean",
            Self::Detecting => "detecting",
            Self::Recovering => "recovering",
            Self::Resuming => "resuming",
            Self::CleaningUp => "cleaning_up",
            Self::Normal => "normal",
        };
        write!(f, "{}", s)
    }
}

/// Something that happened during recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryEvent {
    NoActiveSessions,
    ActiveSessionsFound,
    Settled,
    Validated,
    ValidationFailed,
    AllClassified,
    Resumed,
    ResumeFailed,
    Archived,
    ArchiveFailed,
}

impl RecoveryState {
    /// Next state for `event`, or `None` if the pair is not in the table
    pub fn next(self, event: RecoveryEvent) -> Option<RecoveryState> {
        use RecoveryEvent as E;
        use RecoveryState as S;
        match (self, event) {
            (S::Detecting, E::NoActiveSessions) => Some(S::Clean),
            (S::Detecting, E::ActiveSessionsFound) => Some(S::Recovering),
            (S::Clean, E::Settled) => Some(S::Normal),
            (S::Recovering, E::Validated) => Some(S::Resuming),
            (S::Recovering, E::ValidationFailed) => Some(S::CleaningUp),
            (S::Recovering, E::AllClassified) => Some(S::Normal),
            (S::Resuming, E::Resumed) => Some(S::Normal),
            (S::Resuming, E::ResumeFailed) => Some(S::CleaningUp),
            (S::CleaningUp, E::Archived) => Some(S::Normal),
            (S::CleaningUp, E::ArchiveFailed) => Some(S::Normal),
            _ => None,
        }
    }

    /// Whether recovery has converged
    pub fn is_settled(self) -> bool {
        self == RecoveryState::Normal
    }
}

/// A walk through the transition table that rejects undefined pairs
#[derive(Debug, Clone, Copy)]
pub struct Machine {
    state: RecoveryState,
}

impl Machine {
    pub fn starting_at(state: RecoveryState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Apply `event`, failing with `Internal` on an undefined transition
    pub fn advance(&mut self, event: RecoveryEvent) -> StateResponse<RecoveryState> {
        let next = self.state.next(event).ok_or_else(|| {
            StateError::Internal(format!("no recovery transition from {} on {:?}", self.state, event))
        })?;
        self.state = next;
        Ok(next)
    }
}
