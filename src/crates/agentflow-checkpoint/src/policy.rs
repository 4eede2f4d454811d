//! Checkpoint cadence and retention policy
//!
//! [`CheckpointPolicy`] decides when the runner persists a snapshot and how
//! many snapshots a run may accumulate. Saving is best-effort for periodic
//! snapshots; pause and failure snapshots are written unconditionally by the
//! runner regardless of this policy.
//!
//! Retention: [`prune_run`] drops the oldest `Running` snapshots once a run
//! exceeds `max_checkpoints_per_run`. `WaitingForHuman` and `Failed`
//! snapshots are never dropped - a paused run must stay resumable and a
//! failed run diagnosable.

use crate::error::Result;
use crate::store::CheckpointStore;
use std::time::Duration;

/// When to save and how much to retain
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    /// Save after every N successful nodes
    pub save_every_n_nodes: Option<u32>,
    /// Save if at least this much time elapsed since the last save
    pub save_every: Option<Duration>,
    /// Retention cap per run; excess `Running` snapshots are pruned oldest-first
    pub max_checkpoints_per_run: usize,
    /// Persist a snapshot when a run fails or is cancelled
    pub save_on_error: bool,
}

impl Default for CheckpointPolicy {
    fn default() -> Self {
        Self {
            save_every_n_nodes: None,
            save_every: None,
            max_checkpoints_per_run: 10,
            save_on_error: true,
        }
    }
}

impl CheckpointPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_save_every_n_nodes(mut self, n: u32) -> Self {
        self.save_every_n_nodes = Some(n);
        self
    }

    pub fn with_save_every(mut self, interval: Duration) -> Self {
        self.save_every = Some(interval);
        self
    }

    pub fn with_max_checkpoints_per_run(mut self, max: usize) -> Self {
        self.max_checkpoints_per_run = max;
        self
    }

    pub fn with_save_on_error(mut self, save: bool) -> Self {
        self.save_on_error = save;
        self
    }

    /// Whether a periodic snapshot is due.
    ///
    /// `nodes_since_save` counts successful nodes since the last save;
    /// `elapsed_since_save` is the wall time since then. Either trigger
    /// suffices. With neither trigger configured, periodic saving is off.
    pub fn should_save(&self, nodes_since_save: u32, elapsed_since_save: Duration) -> bool {
        if let Some(n) = self.save_every_n_nodes {
            if n > 0 && nodes_since_save >= n {
                return true;
            }
        }
        if let Some(interval) = self.save_every {
            if elapsed_since_save >= interval {
                return true;
            }
        }
        false
    }
}

/// Enforce the retention cap for one run.
///
/// Drops the oldest prunable snapshots until the run is back under
/// `max_checkpoints_per_run`. Returns the number of snapshots deleted.
/// `WaitingForHuman` and `Failed` snapshots are always kept, even if that
/// leaves the run above the cap.
pub async fn prune_run(
    store: &dyn CheckpointStore,
    run_id: &str,
    policy: &CheckpointPolicy,
) -> Result<usize> {
    let checkpoints = store.list_by_run(run_id).await?;
    if checkpoints.len() <= policy.max_checkpoints_per_run {
        return Ok(0);
    }
    let mut excess = checkpoints.len() - policy.max_checkpoints_per_run;
    let mut removed = 0;
    for checkpoint in &checkpoints {
        if excess == 0 {
            break;
        }
        if !checkpoint.execution_state.is_prunable() {
            continue;
        }
        store.delete(&checkpoint.id).await?;
        removed += 1;
        excess -= 1;
    }
    if removed > 0 {
        tracing::debug!(run_id, removed, "pruned run checkpoints");
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;
    use crate::memory::InMemoryCheckpointStore;
    use std::collections::HashMap;

    #[test]
    fn default_policy() {
        let policy = CheckpointPolicy::default();
        assert_eq!(policy.max_checkpoints_per_run, 10);
        assert!(policy.save_on_error);
        assert!(!policy.should_save(100, Duration::from_secs(3600)));
    }

    #[test]
    fn node_count_trigger() {
        let policy = CheckpointPolicy::new().with_save_every_n_nodes(3);
        assert!(!policy.should_save(2, Duration::ZERO));
        assert!(policy.should_save(3, Duration::ZERO));
        assert!(policy.should_save(4, Duration::ZERO));
    }

    #[test]
    fn elapsed_trigger() {
        let policy = CheckpointPolicy::new().with_save_every(Duration::from_secs(5));
        assert!(!policy.should_save(0, Duration::from_secs(4)));
        assert!(policy.should_save(0, Duration::from_secs(5)));
    }

    fn checkpoint_at(run_id: &str, ts: i64, state: ExecutionState) -> Checkpoint {
        let mut cp = Checkpoint::new(run_id, "g", "n", HashMap::new(), vec![], state);
        cp.timestamp = ts;
        cp
    }

    #[tokio::test]
    async fn prune_drops_oldest_running_first() {
        let store = InMemoryCheckpointStore::new();
        for ts in 0..5 {
            store
                .save(checkpoint_at("run-1", ts, ExecutionState::Running))
                .await
                .unwrap();
        }
        let policy = CheckpointPolicy::new().with_max_checkpoints_per_run(3);
        let removed = prune_run(&store, "run-1", &policy).await.unwrap();
        assert_eq!(removed, 2);

        let remaining = store.list_by_run("run-1").await.unwrap();
        let timestamps: Vec<i64> = remaining.iter().map(|cp| cp.timestamp).collect();
        assert_eq!(timestamps, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn prune_never_drops_waiting_or_failed() {
        let store = InMemoryCheckpointStore::new();
        store
            .save(checkpoint_at("run-1", 0, ExecutionState::WaitingForHuman))
            .await
            .unwrap();
        store
            .save(checkpoint_at("run-1", 1, ExecutionState::Failed))
            .await
            .unwrap();
        for ts in 2..6 {
            store
                .save(checkpoint_at("run-1", ts, ExecutionState::Running))
                .await
                .unwrap();
        }
        let policy = CheckpointPolicy::new().with_max_checkpoints_per_run(2);
        prune_run(&store, "run-1", &policy).await.unwrap();

        let remaining = store.list_by_run("run-1").await.unwrap();
        assert!(remaining
            .iter()
            .any(|cp| cp.execution_state == ExecutionState::WaitingForHuman));
        assert!(remaining
            .iter()
            .any(|cp| cp.execution_state == ExecutionState::Failed));
        // All four Running snapshots were prunable; the cap of 2 leaves none.
        assert_eq!(remaining.len(), 2);
    }

    #[tokio::test]
    async fn prune_under_cap_is_noop() {
        let store = InMemoryCheckpointStore::new();
        store
            .save(checkpoint_at("run-1", 0, ExecutionState::Running))
            .await
            .unwrap();
        let policy = CheckpointPolicy::default();
        assert_eq!(prune_run(&store, "run-1", &policy).await.unwrap(), 0);
    }
}
