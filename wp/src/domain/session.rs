//! Session domain type
//!
//! One tracked unit of in-progress work: its step, progress, and the external
//! resources (container, conversation context) it is linked to.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use waystore::now_ms;

use super::id::{generate_id, is_valid_id};

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Work in progress
    #[default]
    Active,
    /// Finished cleanly, awaiting archival
    Completed,
    /// Terminal: finished, or cleaned up after an interruption
    Archived,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "archived" => Ok(Self::Archived),
            other => Err(format!("unknown session status: {}", other)),
        }
    }
}

impl SessionStatus {
    /// Whether the status may move from `self` to `next`
    ///
    /// | from \ to | active | completed | archived |
    /// |-----------|--------|-----------|----------|
    /// | active    | yes    | yes       | yes      |
    /// | completed | no     | yes       | yes      |
    /// | archived  | no     | no        | yes      |
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Active, _) | (Completed, Completed) | (Completed, Archived) | (Archived, Archived)
        )
    }

    /// Whether the session belongs in the active index
    pub fn is_active(self) -> bool {
        self == SessionStatus::Active
    }

    /// Check if no further transitions are possible
    pub fn is_terminal(self) -> bool {
        self == SessionStatus::Archived
    }
}

/// Reference to an external container a session runs in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRef {
    /// Container ID as known to the container manager
    pub container_id: String,
    /// Optional human-readable container name
    #[serde(default)]
    pub name: Option<String>,
}

impl ContainerRef {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

impl std::fmt::Display for ContainerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({})", self.container_id, name),
            None => write!(f, "{}", self.container_id),
        }
    }
}

/// One prior conversation fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextFragment {
    /// Speaker role: user, assistant, system or tool
    pub role: String,
    /// Fragment text
    pub content: String,
    /// When the fragment was produced (Unix milliseconds)
    pub timestamp: i64,
}

impl ContextFragment {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: now_ms(),
        }
    }
}

/// Persisted state of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique, immutable identifier
    pub session_id: String,

    /// Task this session serves
    pub task_id: String,

    /// Label of the current step
    #[serde(default)]
    pub current_step: String,

    /// Arbitrary progress values
    #[serde(default)]
    pub progress: BTreeMap<String, Value>,

    /// External container the session is attached to
    #[serde(default)]
    pub container_state: Option<ContainerRef>,

    /// Ordered prior conversation fragments
    #[serde(default)]
    pub llm_context: Vec<ContextFragment>,

    /// Lifecycle status
    #[serde(default)]
    pub status: SessionStatus,

    /// Number of effective saves (assigned by the state manager)
    #[serde(default)]
    pub revision: u64,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last save timestamp (Unix milliseconds)
    pub last_updated: i64,
}

impl Session {
    /// Create a new active session with a generated ID
    pub fn new(task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self::with_id(generate_id("sess", &task_id), task_id)
    }

    /// Create with a specific ID (for testing or recovery)
    pub fn with_id(session_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        let now = now_ms();
        Self {
            session_id: session_id.into(),
            task_id: task_id.into(),
            current_step: String::new(),
            progress: BTreeMap::new(),
            container_state: None,
            llm_context: Vec::new(),
            status: SessionStatus::Active,
            revision: 0,
            created_at: now,
            last_updated: now,
        }
    }

    /// Builder method to attach a container
    pub fn with_container(mut self, container: ContainerRef) -> Self {
        self.container_state = Some(container);
        self
    }

    /// Set the current step label
    pub fn set_step(&mut self, step: impl Into<String>) {
        self.current_step = step.into();
    }

    /// Record a progress value
    pub fn set_progress(&mut self, key: impl Into<String>, value: Value) {
        self.progress.insert(key.into(), value);
    }

    /// Append a conversation fragment
    pub fn push_context(&mut self, fragment: ContextFragment) {
        self.llm_context.push(fragment);
    }

    /// Update the status
    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status;
    }

    /// Check if the session is active
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Milliseconds since the last save
    pub fn idle_ms(&self, now: i64) -> i64 {
        now.saturating_sub(self.last_updated)
    }

    /// Compare everything a caller controls, ignoring save bookkeeping
    pub fn same_content(&self, other: &Session) -> bool {
        self.session_id == other.session_id
            && self.task_id == other.task_id
            && self.current_step == other.current_step
            && self.progress == other.progress
            && self.container_state == other.container_state
            && self.llm_context == other.llm_context
            && self.status == other.status
            && self.created_at == other.created_at
    }

    /// Check structural invariants
    pub fn validate(&self) -> Result<(), String> {
        if self.session_id.is_empty() {
            return Err("session_id is required".to_string());
        }
        if !is_valid_id(&self.session_id) {
            return Err(format!("session_id {:?} contains unsupported characters", self.session_id));
        }
        if self.task_id.is_empty() {
            return Err("task_id is required".to_string());
        }
        if !is_valid_id(&self.task_id) {
            return Err(format!("task_id {:?} contains unsupported characters", self.task_id));
        }
        if self.last_updated < self.created_at {
            return Err(format!(
                "last_updated ({}) precedes created_at ({})",
                self.last_updated, self.created_at
            ));
        }
        if let Some(container) = &self.container_state {
            if container.container_id.is_empty() {
                return Err("container_state.container_id is required".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_new_is_active() {
        let session = Session::new("task-1");
        assert!(session.session_id.starts_with("sess-task-1-"));
        assert_eq!(session.status, SessionStatus::Active);
        assert_eq!(session.created_at, session.last_updated);
        assert!(session.validate().is_ok());
    }

    #[test]
    fn test_status_transition_table() {
        use SessionStatus::*;
        assert!(Active.can_transition_to(Completed));
        assert!(Active.can_transition_to(Archived));
        assert!(Completed.can_transition_to(Archived));
        assert!(Archived.can_transition_to(Archived));

        assert!(!Completed.can_transition_to(Active));
        assert!(!Archived.can_transition_to(Active));
        assert!(!Archived.can_transition_to(Completed));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [SessionStatus::Active, SessionStatus::Completed, SessionStatus::Archived] {
            assert_eq!(status.to_string().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_timestamps() {
        let mut session = Session::with_id("s1", "t1");
        session.last_updated = session.created_at - 1;
        assert!(session.validate().unwrap_err().contains("precedes"));
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        assert!(Session::with_id("", "t1").validate().is_err());
        assert!(Session::with_id("s1", "").validate().is_err());
        assert!(Session::with_id("s/1", "t1").validate().is_err());
        let session = Session::with_id("s1", "t1").with_container(ContainerRef::new(""));
        assert!(session.validate().is_err());
    }

    #[test]
    fn test_same_content_ignores_bookkeeping() {
        let a = Session::with_id("s1", "t1");
        let mut b = a.clone();
        b.revision = 7;
        b.last_updated += 1000;
        assert!(a.same_content(&b));

        b.set_step("compile");
        assert!(!a.same_content(&b));
    }

    #[test]
    fn test_serde_defaults_for_optional_fields() {
        let json = r#"{"session_id":"s1","task_id":"t1","created_at":1,"last_updated":2}"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.status, SessionStatus::Active);
        assert!(session.llm_context.is_empty());
        assert!(session.container_state.is_none());
    }
}
