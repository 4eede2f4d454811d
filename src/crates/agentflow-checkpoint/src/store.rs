//! Extensible checkpoint storage trait for custom backend implementations
//!
//! [`CheckpointStore`] is the abstraction the graph runner persists through.
//! Implementations can target any storage system (PostgreSQL, SQLite, Redis,
//! S3, ...) as long as they keep the contract below:
//!
//! - `save` assigns durability to the record and returns its id; the record
//!   is immutable afterwards
//! - `load` returns the exact record previously saved
//! - `list_by_run` returns all snapshots of one run ordered oldest-first
//! - stores must be safe for concurrent runs; writes for the same run are
//!   already serialized by the runner
//!
//! Backends that detect concurrent modification (optimistic versioning)
//! should surface it as [`CheckpointError::Conflict`](crate::CheckpointError::Conflict),
//! which callers treat as retryable.

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use async_trait::async_trait;

/// Async storage abstraction for [`Checkpoint`] records
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist a snapshot and return its id.
    async fn save(&self, checkpoint: Checkpoint) -> Result<String>;

    /// Load a snapshot by id.
    ///
    /// Returns [`CheckpointError::NotFound`](crate::CheckpointError::NotFound)
    /// when no record exists under the id.
    async fn load(&self, id: &str) -> Result<Checkpoint>;

    /// Delete a snapshot by id. Deleting a missing id is not an error.
    async fn delete(&self, id: &str) -> Result<()>;

    /// All snapshots of a run, ordered oldest-first.
    async fn list_by_run(&self, run_id: &str) -> Result<Vec<Checkpoint>>;

    /// Delete every snapshot of a run; returns how many were removed.
    async fn delete_by_run(&self, run_id: &str) -> Result<usize>;
}
