//! CheckpointManager - creation, retention and restore of task checkpoints

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use waystore::{RecordStore, RecordStoreExt};

use crate::domain::{Checkpoint, CheckpointId, checkpoint_prefix, is_valid_id};
use crate::state::{KeyLocks, StateError, StateResponse};

use super::index::{TaskIndex, task_index_key};

/// Handle to a store's checkpoints
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn RecordStore>,
    locks: Arc<KeyLocks>,
    max_checkpoints: usize,
}

impl CheckpointManager {
    /// Create a manager retaining up to `max_checkpoints` non-target checkpoints per task
    pub fn new(store: Arc<dyn RecordStore>, max_checkpoints: usize) -> Self {
        Self {
            store,
            locks: Arc::new(KeyLocks::new()),
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    pub fn max_checkpoints(&self) -> usize {
        self.max_checkpoints
    }

    /// Record a new immutable checkpoint for a task
    ///
    /// The record is written before the index that references it; pruned
    /// records are deleted only after the index no longer lists them.
    pub async fn create_checkpoint(
        &self,
        task_id: &str,
        step_name: &str,
        state_data: BTreeMap<String, Value>,
        recoverable: bool,
    ) -> StateResponse<Checkpoint> {
        debug!(%task_id, %step_name, recoverable, "create_checkpoint: called");
        if !is_valid_id(task_id) {
            return Err(StateError::PolicyViolation(format!("invalid task_id {:?}", task_id)));
        }
        if step_name.is_empty() {
            return Err(StateError::PolicyViolation("step_name is required".to_string()));
        }

        let _guard = self.locks.lock(task_id).await;
        let mut index = match self.store.get_json_opt::<TaskIndex>(&task_index_key(task_id)) {
            Ok(Some(index)) => index,
            Ok(None) => TaskIndex::new(task_id),
            Err(e) if e.is_unavailable() => return Err(e.into()),
            Err(e) => {
                warn!(%task_id, error = %e, "create_checkpoint: task index unreadable, rebuilding");
                self.rebuild_locked(task_id)?
            }
        };

        let seq = index.append(recoverable);
        let checkpoint = Checkpoint::new(CheckpointId::new(task_id, seq), step_name, state_data, recoverable);
        self.store.put_json(&checkpoint.checkpoint_id.key(), &checkpoint)?;

        let pruned = index.prune(self.max_checkpoints);
        self.store.put_json(&task_index_key(task_id), &index)?;

        for pruned_seq in &pruned {
            let id = CheckpointId::new(task_id, *pruned_seq);
            debug!(checkpoint_id = %id, "create_checkpoint: pruning");
            if let Err(e) = self.store.delete(&id.key()) {
                warn!(checkpoint_id = %id, error = %e, "create_checkpoint: failed to delete pruned checkpoint");
            }
        }

        info!(
            checkpoint_id = %checkpoint.checkpoint_id,
            %step_name,
            recoverable,
            pruned = pruned.len(),
            "Created checkpoint"
        );
        Ok(checkpoint)
    }

    /// Load a retained checkpoint record
    pub async fn load_checkpoint(&self, checkpoint_id: &CheckpointId) -> StateResponse<Checkpoint> {
        debug!(%checkpoint_id, "load_checkpoint: called");
        if !is_valid_id(&checkpoint_id.task_id) {
            return Err(StateError::PolicyViolation(format!(
                "invalid task_id {:?}",
                checkpoint_id.task_id
            )));
        }

        // Retention is decided by the index; a record it pruned may outlive it
        let pruned = self
            .task_index(&checkpoint_id.task_id)
            .await?
            .is_some_and(|index| index.was_pruned(checkpoint_id.seq));
        if pruned {
            self.discard_orphan(checkpoint_id);
            return Err(StateError::PolicyViolation(format!(
                "checkpoint {} was removed by retention",
                checkpoint_id
            )));
        }

        match self.store.get_json::<Checkpoint>(&checkpoint_id.key()) {
            Ok(checkpoint) => {
                if checkpoint.checkpoint_id != *checkpoint_id {
                    return Err(StateError::corrupted(
                        checkpoint_id.key(),
                        format!("record holds {}", checkpoint.checkpoint_id),
                    ));
                }
                Ok(checkpoint)
            }
            Err(e) if e.is_not_found() => Err(StateError::NotFound(format!("checkpoint {}", checkpoint_id))),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort removal of a record retention already pruned
    fn discard_orphan(&self, checkpoint_id: &CheckpointId) {
        match self.store.delete(&checkpoint_id.key()) {
            Ok(()) => debug!(%checkpoint_id, "discard_orphan: removed pruned record"),
            Err(e) => warn!(%checkpoint_id, error = %e, "discard_orphan: failed to delete pruned checkpoint"),
        }
    }

    /// Return the state snapshot of a checkpoint
    pub async fn restore_from_checkpoint(&self, checkpoint_id: &CheckpointId) -> StateResponse<BTreeMap<String, Value>> {
        debug!(%checkpoint_id, "restore_from_checkpoint: called");
        let checkpoint = self.load_checkpoint(checkpoint_id).await?;
        info!(%checkpoint_id, step = %checkpoint.step_name, "Restored checkpoint");
        Ok(checkpoint.state_data)
    }

    /// Current resume target of a task
    pub async fn latest_recoverable(&self, task_id: &str) -> StateResponse<Checkpoint> {
        debug!(%task_id, "latest_recoverable: called");
        let seq = self
            .task_index(task_id)
            .await?
            .and_then(|index| index.resume_target())
            .ok_or_else(|| StateError::NotFound(format!("no recoverable checkpoint for task {}", task_id)))?;
        self.load_checkpoint(&CheckpointId::new(task_id, seq)).await
    }

    /// Retained checkpoints of a task, ascending
    pub async fn list_checkpoints(&self, task_id: &str) -> StateResponse<Vec<Checkpoint>> {
        debug!(%task_id, "list_checkpoints: called");
        let Some(index) = self.task_index(task_id).await? else {
            return Ok(Vec::new());
        };
        let mut checkpoints = Vec::with_capacity(index.entries.len());
        for entry in &index.entries {
            checkpoints.push(self.load_checkpoint(&CheckpointId::new(task_id, entry.seq)).await?);
        }
        Ok(checkpoints)
    }

    /// The task's checkpoint index, if the task has any checkpoints
    pub async fn task_index(&self, task_id: &str) -> StateResponse<Option<TaskIndex>> {
        if !is_valid_id(task_id) {
            return Err(StateError::PolicyViolation(format!("invalid task_id {:?}", task_id)));
        }
        Ok(self.store.get_json_opt(&task_index_key(task_id))?)
    }

    /// Verify a task's checkpoint chain and return its resume target
    ///
    /// The chain is intact when the index is well formed, every indexed record
    /// loads and carries its own id, and the resume target was created as
    /// recoverable.
    pub async fn verify_chain(&self, task_id: &str) -> StateResponse<Checkpoint> {
        debug!(%task_id, "verify_chain: called");
        let index_key = task_index_key(task_id);
        let index = self
            .task_index(task_id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("no checkpoints for task {}", task_id)))?;

        index
            .check()
            .map_err(|reason| StateError::corrupted(&index_key, reason))?;
        if index.task_id != task_id {
            return Err(StateError::corrupted(
                &index_key,
                format!("index belongs to task {}", index.task_id),
            ));
        }

        let mut target = None;
        for entry in &index.entries {
            let id = CheckpointId::new(task_id, entry.seq);
            let checkpoint = match self.store.get_json::<Checkpoint>(&id.key()) {
                Ok(checkpoint) => checkpoint,
                Err(e) if e.is_not_found() => {
                    return Err(StateError::corrupted(&index_key, format!("gap in chain: {} is missing", id)));
                }
                Err(e) => return Err(e.into()),
            };
            if checkpoint.checkpoint_id != id || checkpoint.task_id != task_id {
                return Err(StateError::corrupted(
                    id.key(),
                    format!("record holds {}", checkpoint.checkpoint_id),
                ));
            }
            if Some(entry.seq) == index.resume_target() {
                target = Some(checkpoint);
            }
        }

        let target =
            target.ok_or_else(|| StateError::NotFound(format!("no recoverable checkpoint for task {}", task_id)))?;
        if !target.recoverable {
            return Err(StateError::corrupted(
                target.checkpoint_id.key(),
                "resume target was not created recoverable",
            ));
        }
        debug!(%task_id, checkpoint_id = %target.checkpoint_id, "verify_chain: intact");
        Ok(target)
    }

    /// Reconstruct a task's index from the checkpoint records in storage
    pub async fn rebuild_index(&self, task_id: &str) -> StateResponse<TaskIndex> {
        debug!(%task_id, "rebuild_index: called");
        if !is_valid_id(task_id) {
            return Err(StateError::PolicyViolation(format!("invalid task_id {:?}", task_id)));
        }
        let _guard = self.locks.lock(task_id).await;
        self.rebuild_locked(task_id)
    }

    fn rebuild_locked(&self, task_id: &str) -> StateResponse<TaskIndex> {
        // A readable old index still knows which seqs retention removed
        let previous = match self.store.get_json_opt::<TaskIndex>(&task_index_key(task_id)) {
            Ok(previous) => previous,
            Err(e) if e.is_unavailable() => return Err(e.into()),
            Err(_) => None,
        };

        let listing = self.store.list(&checkpoint_prefix(task_id))?;
        let mut records = Vec::new();
        for key in listing.iter() {
            let key = key?;
            match self.store.get_json::<Checkpoint>(&key) {
                Ok(checkpoint) if checkpoint.task_id == task_id && key == checkpoint.checkpoint_id.key() => {
                    if previous.as_ref().is_some_and(|p| p.was_pruned(checkpoint.seq())) {
                        debug!(checkpoint_id = %checkpoint.checkpoint_id, "rebuild_index: skipping pruned record");
                        self.discard_orphan(&checkpoint.checkpoint_id);
                        continue;
                    }
                    records.push((checkpoint.seq(), checkpoint.recoverable));
                }
                Ok(checkpoint) => {
                    warn!(%key, checkpoint_id = %checkpoint.checkpoint_id, "rebuild_index: record does not match its key, skipping");
                }
                Err(e) if e.is_unavailable() => return Err(e.into()),
                Err(e) => {
                    warn!(%key, error = %e, "rebuild_index: skipping unreadable checkpoint");
                }
            }
        }

        let mut index = TaskIndex::from_records(task_id, &records);
        let pruned = index.prune(self.max_checkpoints);
        self.store.put_json(&task_index_key(task_id), &index)?;
        for seq in &pruned {
            self.discard_orphan(&CheckpointId::new(task_id, *seq));
        }
        info!(
            %task_id,
            retained = index.entries.len(),
            resume_target = ?index.resume_target(),
            "Rebuilt checkpoint index"
        );
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use waystore::MemoryStore;

    fn manager(max: usize) -> (Arc<MemoryStore>, CheckpointManager) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), CheckpointManager::new(store, max))
    }

    fn data(step: u64) -> BTreeMap<String, Value> {
        BTreeMap::from([("step".to_string(), json!(step))])
    }

    #[tokio::test]
    async fn test_ids_are_monotonic_and_gapless() {
        let (_store, checkpoints) = manager(10);
        for expected in 1..=5 {
            let cp = checkpoints.create_checkpoint("t1", "step", data(expected), false).await.unwrap();
            assert_eq!(cp.seq(), expected);
        }
    }

    #[tokio::test]
    async fn test_restore_returns_state_data() {
        let (_store, checkpoints) = manager(10);
        let cp = checkpoints.create_checkpoint("t1", "plan", data(1), true).await.unwrap();
        let restored = checkpoints.restore_from_checkpoint(&cp.checkpoint_id).await.unwrap();
        assert_eq!(restored, data(1));
    }

    #[tokio::test]
    async fn test_restore_unknown_is_not_found() {
        let (_store, checkpoints) = manager(10);
        checkpoints.create_checkpoint("t1", "plan", data(1), true).await.unwrap();
        let err = checkpoints
            .restore_from_checkpoint(&CheckpointId::new("t1", 99))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let err = checkpoints
            .restore_from_checkpoint(&CheckpointId::new("other", 1))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_restore_pruned_is_policy_violation() {
        let (store, checkpoints) = manager(1);
        checkpoints.create_checkpoint("t1", "a", data(1), false).await.unwrap();
        checkpoints.create_checkpoint("t1", "b", data(2), false).await.unwrap();

        assert!(store.raw("checkpoints/t1/0000000001").is_none());
        let err = checkpoints
            .restore_from_checkpoint(&CheckpointId::new("t1", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::PolicyViolation(_)));
    }

    #[tokio::test]
    async fn test_leftover_pruned_record_is_not_restored() {
        let (store, checkpoints) = manager(1);
        checkpoints.create_checkpoint("t1", "a", data(1), false).await.unwrap();
        let stale = store.raw("checkpoints/t1/0000000001").unwrap();
        checkpoints.create_checkpoint("t1", "b", data(2), false).await.unwrap();
        // Crash between the index write and the delete
        store.insert_raw("checkpoints/t1/0000000001", stale);

        let err = checkpoints
            .restore_from_checkpoint(&CheckpointId::new("t1", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::PolicyViolation(_)));
        assert!(store.raw("checkpoints/t1/0000000001").is_none());
    }

    #[tokio::test]
    async fn test_rebuild_skips_leftover_pruned_records() {
        let (store, checkpoints) = manager(1);
        checkpoints.create_checkpoint("t1", "a", data(1), true).await.unwrap();
        checkpoints.create_checkpoint("t1", "b", data(2), false).await.unwrap();
        let stale = store.raw("checkpoints/t1/0000000002").unwrap();
        checkpoints.create_checkpoint("t1", "c", data(3), false).await.unwrap();
        store.insert_raw("checkpoints/t1/0000000002", stale);

        let rebuilt = checkpoints.rebuild_index("t1").await.unwrap();
        let seqs: Vec<u64> = rebuilt.entries.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![1, 3]);
        assert_eq!(rebuilt.resume_target(), Some(1));
        assert!(store.raw("checkpoints/t1/0000000002").is_none());
    }

    #[tokio::test]
    async fn test_latest_recoverable_follows_demotion() {
        let (_store, checkpoints) = manager(10);
        assert!(checkpoints.latest_recoverable("t1").await.unwrap_err().is_not_found());

        checkpoints.create_checkpoint("t1", "a", data(1), true).await.unwrap();
        checkpoints.create_checkpoint("t1", "b", data(2), false).await.unwrap();
        assert_eq!(checkpoints.latest_recoverable("t1").await.unwrap().seq(), 1);

        checkpoints.create_checkpoint("t1", "c", data(3), true).await.unwrap();
        assert_eq!(checkpoints.latest_recoverable("t1").await.unwrap().seq(), 3);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_input() {
        let (_store, checkpoints) = manager(10);
        assert!(checkpoints.create_checkpoint("t/1", "a", data(1), true).await.is_err());
        assert!(checkpoints.create_checkpoint("t1", "", data(1), true).await.is_err());
    }

    #[tokio::test]
    async fn test_verify_chain_intact() {
        let (_store, checkpoints) = manager(10);
        checkpoints.create_checkpoint("t1", "a", data(1), false).await.unwrap();
        checkpoints.create_checkpoint("t1", "b", data(2), true).await.unwrap();
        let target = checkpoints.verify_chain("t1").await.unwrap();
        assert_eq!(target.seq(), 2);
    }

    #[tokio::test]
    async fn test_verify_chain_detects_gap() {
        let (store, checkpoints) = manager(10);
        checkpoints.create_checkpoint("t1", "a", data(1), true).await.unwrap();
        checkpoints.create_checkpoint("t1", "b", data(2), false).await.unwrap();
        checkpoints.create_checkpoint("t1", "c", data(3), false).await.unwrap();
        store.delete("checkpoints/t1/0000000002").unwrap();

        let err = checkpoints.verify_chain("t1").await.unwrap_err();
        assert!(matches!(err, StateError::Corrupted { .. }));
    }

    #[tokio::test]
    async fn test_verify_chain_without_target_fails() {
        let (_store, checkpoints) = manager(10);
        checkpoints.create_checkpoint("t1", "a", data(1), false).await.unwrap();
        assert!(checkpoints.verify_chain("t1").await.unwrap_err().is_not_found());
        assert!(checkpoints.verify_chain("none").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_rebuild_index_after_corruption() {
        let (store, checkpoints) = manager(10);
        checkpoints.create_checkpoint("t1", "a", data(1), true).await.unwrap();
        checkpoints.create_checkpoint("t1", "b", data(2), true).await.unwrap();
        checkpoints.create_checkpoint("t1", "c", data(3), false).await.unwrap();
        store.insert_raw("index/tasks/t1", b"junk".to_vec());

        let rebuilt = checkpoints.rebuild_index("t1").await.unwrap();
        assert_eq!(rebuilt.resume_target(), Some(2));
        assert_eq!(rebuilt.next_seq, 4);

        let cp = checkpoints.create_checkpoint("t1", "d", data(4), false).await.unwrap();
        assert_eq!(cp.seq(), 4);
    }

    #[tokio::test]
    async fn test_create_recovers_from_corrupted_index() {
        let (store, checkpoints) = manager(10);
        checkpoints.create_checkpoint("t1", "a", data(1), true).await.unwrap();
        store.insert_raw("index/tasks/t1", b"junk".to_vec());

        let cp = checkpoints.create_checkpoint("t1", "b", data(2), false).await.unwrap();
        assert_eq!(cp.seq(), 2);
        assert_eq!(checkpoints.latest_recoverable("t1").await.unwrap().seq(), 1);
    }

    #[tokio::test]
    async fn test_list_checkpoints_ascending() {
        let (_store, checkpoints) = manager(2);
        for i in 1..=4 {
            checkpoints.create_checkpoint("t1", "s", data(i), false).await.unwrap();
        }
        let seqs: Vec<u64> = checkpoints
            .list_checkpoints("t1")
            .await
            .unwrap()
            .iter()
            .map(|c| c.seq())
            .collect();
        assert_eq!(seqs, vec![3, 4]);
        assert!(checkpoints.list_checkpoints("none").await.unwrap().is_empty());
    }
}
