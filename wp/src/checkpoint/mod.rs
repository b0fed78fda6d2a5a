//! Task checkpoints
//!
//! Immutable snapshots of task progress with a per-task index that tracks the
//! resume target and enforces retention.

mod index;
mod manager;

pub use index::{CheckpointRole, IndexEntry, RoleEvent, TASK_INDEX_PREFIX, TaskIndex, task_index_key};
pub use manager::CheckpointManager;
