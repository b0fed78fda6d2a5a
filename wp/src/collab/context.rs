//! Conversation context rehydration

use async_trait::async_trait;
use tracing::debug;

use crate::domain::ContextFragment;

use super::CollaboratorError;

/// Speaker roles accepted in a conversation context
const KNOWN_ROLES: &[&str] = &["system", "user", "assistant", "tool"];

/// Outcome of rehydrating a conversation context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rehydrated {
    /// Every fragment was restored
    Validated(Vec<ContextFragment>),
    /// Usable context, but some fragments were dropped
    Truncated {
        fragments: Vec<ContextFragment>,
        warning: String,
    },
}

impl Rehydrated {
    /// Restored fragments, whether or not truncation happened
    pub fn into_fragments(self) -> Vec<ContextFragment> {
        match self {
            Rehydrated::Validated(fragments) => fragments,
            Rehydrated::Truncated { fragments, .. } => fragments,
        }
    }

    pub fn warning(&self) -> Option<&str> {
        match self {
            Rehydrated::Validated(_) => None,
            Rehydrated::Truncated { warning, .. } => Some(warning),
        }
    }
}

/// LLM client as seen by recovery
#[async_trait]
pub trait ContextRehydrator: Send + Sync {
    /// Restore a session's conversation context
    async fn rehydrate(&self, fragments: &[ContextFragment]) -> Result<Rehydrated, CollaboratorError>;
}

/// Rehydrator that keeps the newest `max_fragments` fragments
#[derive(Debug, Clone, Copy)]
pub struct WindowedRehydrator {
    max_fragments: usize,
}

impl WindowedRehydrator {
    pub fn new(max_fragments: usize) -> Self {
        Self {
            max_fragments: max_fragments.max(1),
        }
    }
}

impl Default for WindowedRehydrator {
    fn default() -> Self {
        Self::new(200)
    }
}

#[async_trait]
impl ContextRehydrator for WindowedRehydrator {
    async fn rehydrate(&self, fragments: &[ContextFragment]) -> Result<Rehydrated, CollaboratorError> {
        debug!(count = fragments.len(), max = self.max_fragments, "WindowedRehydrator::rehydrate: called");
        for (i, fragment) in fragments.iter().enumerate() {
            if !KNOWN_ROLES.contains(&fragment.role.as_str()) {
                return Err(CollaboratorError::Rejected(format!(
                    "fragment {} has unknown role {:?}",
                    i, fragment.role
                )));
            }
        }
        for pair in fragments.windows(2) {
            if pair[1].timestamp < pair[0].timestamp {
                return Err(CollaboratorError::Rejected("fragments are not in time order".to_string()));
            }
        }

        if fragments.len() <= self.max_fragments {
            return Ok(Rehydrated::Validated(fragments.to_vec()));
        }
        let dropped = fragments.len() - self.max_fragments;
        Ok(Rehydrated::Truncated {
            fragments: fragments[dropped..].to_vec(),
            warning: format!("dropped {} oldest context fragments", dropped),
        })
    }
}
