//! # agentflow-checkpoint - Durable run state for agentflow
//!
//! Persistence layer for the agentflow graph runner. A [`Checkpoint`] is an
//! immutable snapshot of a single run: the state map, the propagated
//! execution context, the node the run stopped at, and - when the run is
//! waiting on a human - the pending interaction and its eventual response.
//!
//! The crate provides:
//!
//! - [`Checkpoint`] / [`ExecutionState`] - the logical record (stable schema,
//!   storage choice free)
//! - [`CheckpointStore`] - async storage abstraction (save/load/list/delete)
//! - [`InMemoryCheckpointStore`] - reference implementation for development
//!   and tests
//! - [`CheckpointPolicy`] - when to save and how many snapshots to retain
//! - [`CheckpointSerializer`] - JSON (default) and bincode (opt-in binary)
//!   codecs for backends that store raw bytes
//!
//! ## Durability contract
//!
//! Stores must be safe for concurrent runs; the runner serializes writes for
//! a single run. A checkpoint whose state is `WaitingForHuman` or `Failed`
//! is never pruned by [`policy::prune_run`], so a paused run can always be
//! resumed from its id alone.
//!
//! ## Implementing a backend
//!
//! ```rust,ignore
//! use agentflow_checkpoint::{Checkpoint, CheckpointStore, Result};
//! use async_trait::async_trait;
//!
//! struct PostgresStore { pool: sqlx::PgPool }
//!
//! #[async_trait]
//! impl CheckpointStore for PostgresStore {
//!     async fn save(&self, checkpoint: Checkpoint) -> Result<String> {
//!         // INSERT INTO checkpoints ... RETURNING id
//!         # unimplemented!()
//!     }
//!     // ... load / delete / list_by_run / delete_by_run
//! }
//! ```

pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod policy;
pub mod serializer;
pub mod store;

pub use checkpoint::{Checkpoint, ExecutionState};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointStore;
pub use policy::{prune_run, CheckpointPolicy};
pub use serializer::{BincodeCheckpointSerializer, CheckpointSerializer, JsonCheckpointSerializer};
pub use store::CheckpointStore;
