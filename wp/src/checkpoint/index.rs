//! Per-task checkpoint index
//!
//! Checkpoint records are immutable, so the resume-target marker and the
//! retention bookkeeping live here. Each retained checkpoint has one entry
//! with an explicit role.

use serde::{Deserialize, Serialize};

/// Key prefix of per-task checkpoint indexes
pub const TASK_INDEX_PREFIX: &str = "index/tasks/";

/// Storage key of a task's checkpoint index
pub fn task_index_key(task_id: &str) -> String {
    format!("{}{}", TASK_INDEX_PREFIX, task_id)
}

/// Role of a retained checkpoint within its task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointRole {
    /// The current resume point of the task
    ResumeTarget,
    /// A former resume point, superseded by a newer recoverable checkpoint
    Demoted,
    /// Never a resume point
    Plain,
}

/// Events that move checkpoint roles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleEvent {
    RecoverableAdded,
    PlainAdded,
}

impl CheckpointRole {
    /// Role of a freshly created checkpoint
    pub fn initial(recoverable: bool) -> Self {
        if recoverable {
            CheckpointRole::ResumeTarget
        } else {
            CheckpointRole::Plain
        }
    }

    /// Role after `event` happens to an existing checkpoint
    pub fn on(self, event: RoleEvent) -> Self {
        match (self, event) {
            (CheckpointRole::ResumeTarget, RoleEvent::RecoverableAdded) => CheckpointRole::Demoted,
            (CheckpointRole::ResumeTarget, RoleEvent::PlainAdded) => CheckpointRole::ResumeTarget,
            (CheckpointRole::Demoted, _) => CheckpointRole::Demoted,
            (CheckpointRole::Plain, _) => CheckpointRole::Plain,
        }
    }

    /// Whether retention may remove a checkpoint in this role
    pub fn is_prunable(self) -> bool {
        self != CheckpointRole::ResumeTarget
    }
}

impl std::fmt::Display for CheckpointRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ResumeTarget => write!(f, "resume_target"),
            Self::Demoted => write!(f, "demoted"),
            Self::Plain => write!(f, "plain"),
        }
    }
}

/// One retained checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub seq: u64,
    pub role: CheckpointRole,
}

/// Ordered index of a task's retained checkpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskIndex {
    pub task_id: String,
    /// Sequence number the next checkpoint will get
    pub next_seq: u64,
    /// Retained checkpoints, ascending by seq
    pub entries: Vec<IndexEntry>,
}

impl TaskIndex {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            next_seq: 1,
            entries: Vec::new(),
        }
    }

    /// Build an index from the `(seq, recoverable)` pairs found in storage
    ///
    /// The most recently created recoverable checkpoint becomes the resume
    /// target; earlier recoverable ones are demoted.
    pub fn from_records(task_id: impl Into<String>, records: &[(u64, bool)]) -> Self {
        let mut sorted = records.to_vec();
        sorted.sort_by_key(|(seq, _)| *seq);
        sorted.dedup_by_key(|(seq, _)| *seq);

        let mut index = Self::new(task_id);
        for (seq, recoverable) in sorted {
            index.push(seq, recoverable);
        }
        index
    }

    /// Allocate the next sequence number and record it
    pub fn append(&mut self, recoverable: bool) -> u64 {
        let seq = self.next_seq;
        self.push(seq, recoverable);
        seq
    }

    fn push(&mut self, seq: u64, recoverable: bool) {
        let event = if recoverable {
            RoleEvent::RecoverableAdded
        } else {
            RoleEvent::PlainAdded
        };
        for entry in &mut self.entries {
            entry.role = entry.role.on(event);
        }
        self.entries.push(IndexEntry {
            seq,
            role: CheckpointRole::initial(recoverable),
        });
        self.next_seq = seq + 1;
    }

    /// Drop the oldest prunable entries until at most `max` remain
    ///
    /// The resume target is exempt and does not count toward `max`.
    /// Returns the pruned sequence numbers, oldest first.
    pub fn prune(&mut self, max: usize) -> Vec<u64> {
        let prunable = self.entries.iter().filter(|e| e.role.is_prunable()).count();
        let excess = prunable.saturating_sub(max);
        if excess == 0 {
            return Vec::new();
        }

        let mut pruned = Vec::with_capacity(excess);
        self.entries.retain(|entry| {
            if pruned.len() < excess && entry.role.is_prunable() {
                pruned.push(entry.seq);
                false
            } else {
                true
            }
        });
        pruned
    }

    /// Sequence number of the current resume target
    pub fn resume_target(&self) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.role == CheckpointRole::ResumeTarget)
            .map(|e| e.seq)
    }

    /// Role of a retained checkpoint
    pub fn role_of(&self, seq: u64) -> Option<CheckpointRole> {
        self.entries.iter().find(|e| e.seq == seq).map(|e| e.role)
    }

    /// Whether `seq` was allocated but is no longer retained
    pub fn was_pruned(&self, seq: u64) -> bool {
        seq >= 1 && seq < self.next_seq && self.role_of(seq).is_none()
    }

    /// Check the structural invariants of the index
    pub fn check(&self) -> Result<(), String> {
        if self.next_seq == 0 {
            return Err("next_seq must start at 1".to_string());
        }
        for pair in self.entries.windows(2) {
            if pair[0].seq >= pair[1].seq {
                return Err(format!(
                    "entries out of order: {} before {}",
                    pair[0].seq, pair[1].seq
                ));
            }
        }
        match self.entries.last() {
            Some(last) if last.seq != self.next_seq - 1 => {
                return Err(format!(
                    "newest entry {} does not match next_seq {}",
                    last.seq, self.next_seq
                ));
            }
            None if self.next_seq > 1 => {
                return Err(format!("no entries retained below next_seq {}", self.next_seq));
            }
            _ => {}
        }
        if let Some(first) = self.entries.first() {
            if first.seq == 0 {
                return Err("sequence numbers start at 1".to_string());
            }
        }
        let targets = self
            .entries
            .iter()
            .filter(|e| e.role == CheckpointRole::ResumeTarget)
            .count();
        if targets > 1 {
            return Err(format!("{} resume targets", targets));
        }
        Ok(())
    }
}
