//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointStore`] keeps every snapshot in a process-local map
//! behind an `RwLock`. It implements the full [`CheckpointStore`] contract
//! and is the store used by the integration tests; data is lost when the
//! process exits, so production deployments should bring a durable backend.

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use crate::store::CheckpointStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe, ephemeral [`CheckpointStore`]
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    by_id: RwLock<HashMap<String, Checkpoint>>,
    by_run: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored snapshots, across all runs.
    pub fn len(&self) -> usize {
        self.by_id.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything. Intended for test isolation.
    pub fn clear(&self) {
        self.by_id.write().unwrap().clear();
        self.by_run.write().unwrap().clear();
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: Checkpoint) -> Result<String> {
        let id = checkpoint.id.clone();
        let run_id = checkpoint.run_id.clone();
        {
            let mut by_id = self.by_id.write().unwrap();
            if by_id.contains_key(&id) {
                return Err(CheckpointError::Conflict(format!(
                    "checkpoint {id} already exists"
                )));
            }
            by_id.insert(id.clone(), checkpoint);
        }
        self.by_run
            .write()
            .unwrap()
            .entry(run_id)
            .or_default()
            .push(id.clone());
        Ok(id)
    }

    async fn load(&self, id: &str) -> Result<Checkpoint> {
        self.by_id
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| CheckpointError::NotFound(id.to_string()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let removed = self.by_id.write().unwrap().remove(id);
        if let Some(checkpoint) = removed {
            let mut by_run = self.by_run.write().unwrap();
            if let Some(ids) = by_run.get_mut(&checkpoint.run_id) {
                ids.retain(|existing| existing != id);
                if ids.is_empty() {
                    by_run.remove(&checkpoint.run_id);
                }
            }
        }
        Ok(())
    }

    async fn list_by_run(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
        let by_id = self.by_id.read().unwrap();
        let ids = self.by_run.read().unwrap().get(run_id).cloned();
        let mut checkpoints: Vec<Checkpoint> = ids
            .unwrap_or_default()
            .iter()
            .filter_map(|id| by_id.get(id).cloned())
            .collect();
        checkpoints.sort_by_key(|cp| cp.timestamp);
        Ok(checkpoints)
    }

    async fn delete_by_run(&self, run_id: &str) -> Result<usize> {
        let ids = self.by_run.write().unwrap().remove(run_id);
        let Some(ids) = ids else {
            return Ok(0);
        };
        let mut by_id = self.by_id.write().unwrap();
        let mut removed = 0;
        for id in ids {
            if by_id.remove(&id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
