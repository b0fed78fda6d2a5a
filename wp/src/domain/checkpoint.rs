//! Checkpoint domain type

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use waystore::now_ms;

/// Checkpoint identifier: a task plus its per-task sequence number
///
/// Rendered and serialized as `task_id#seq`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CheckpointId {
    pub task_id: String,
    pub seq: u64,
}

impl CheckpointId {
    pub fn new(task_id: impl Into<String>, seq: u64) -> Self {
        Self {
            task_id: task_id.into(),
            seq,
        }
    }

    /// Storage key of the checkpoint record
    pub fn key(&self) -> String {
        format!("{}{:010}", checkpoint_prefix(&self.task_id), self.seq)
    }
}

/// Key prefix under which a task's checkpoint records live
pub fn checkpoint_prefix(task_id: &str) -> String {
    format!("checkpoints/{}/", task_id)
}

impl std::fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.task_id, self.seq)
    }
}

impl std::str::FromStr for CheckpointId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (task_id, seq) = s
            .rsplit_once('#')
            .ok_or_else(|| format!("checkpoint id {:?} is missing '#'", s))?;
        if task_id.is_empty() {
            return Err(format!("checkpoint id {:?} has no task", s));
        }
        let seq = seq
            .parse::<u64>()
            .map_err(|_| format!("checkpoint id {:?} has a bad sequence number", s))?;
        if seq == 0 {
            return Err(format!("checkpoint id {:?}: sequence numbers start at 1", s));
        }
        Ok(Self::new(task_id, seq))
    }
}

impl From<CheckpointId> for String {
    fn from(id: CheckpointId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for CheckpointId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Immutable point-in-time snapshot of a task's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique ID, strictly increasing per task
    pub checkpoint_id: CheckpointId,

    /// Owning task
    pub task_id: String,

    /// Step this snapshot was taken at
    pub step_name: String,

    /// Snapshot payload
    pub state_data: BTreeMap<String, Value>,

    /// Creation timestamp (Unix milliseconds)
    pub timestamp: i64,

    /// Flagged as a resume point when created
    pub recoverable: bool,
}

impl Checkpoint {
    pub fn new(
        checkpoint_id: CheckpointId,
        step_name: impl Into<String>,
        state_data: BTreeMap<String, Value>,
        recoverable: bool,
    ) -> Self {
        Self {
            task_id: checkpoint_id.task_id.clone(),
            checkpoint_id,
            step_name: step_name.into(),
            state_data,
            timestamp: now_ms(),
            recoverable,
        }
    }

    /// Sequence number within the task
    pub fn seq(&self) -> u64 {
        self.checkpoint_id.seq
    }
}
