//! The checkpoint record: an immutable snapshot of a run
//!
//! A [`Checkpoint`] captures everything the runner needs to continue a run
//! later, possibly in another process: the state map, the execution context
//! (as ordered key/value pairs), the node the run stopped at, and the
//! execution status. When a run pauses for a human, the pending interaction
//! is embedded as an opaque JSON value; the store does not interpret it.
//!
//! Checkpoints are immutable once stored. "Attaching" a human response
//! produces a new value via [`Checkpoint::with_human_response`]; the stored
//! original is never rewritten.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Progress marker of a run at the moment the snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    /// The run is mid-flight; this is a periodic snapshot
    Running,
    /// The run is paused and waits for a human response
    WaitingForHuman,
    /// The run finished successfully
    Completed,
    /// The run ended with an error
    Failed,
    /// The run was cancelled externally
    Cancelled,
}

impl ExecutionState {
    /// A terminal snapshot will never be resumed into a running state again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }

    /// Whether [`prune_run`](crate::policy::prune_run) may ever drop a
    /// snapshot in this state. Paused and failed runs must stay resumable
    /// and diagnosable.
    pub fn is_prunable(&self) -> bool {
        !matches!(
            self,
            ExecutionState::WaitingForHuman | ExecutionState::Failed
        )
    }
}

/// Immutable snapshot of a single run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Unique id of this snapshot
    pub id: String,
    /// Run this snapshot belongs to
    pub run_id: String,
    /// Graph the run executes
    pub graph_id: String,
    /// Node the run stopped at (the next node to act on when resuming)
    pub current_node_id: String,
    /// State map at snapshot time
    pub state: HashMap<String, Value>,
    /// Execution context as ordered key/value pairs
    pub context: Vec<(String, Value)>,
    /// Epoch milliseconds at snapshot time
    pub timestamp: i64,
    /// Run status at snapshot time
    pub execution_state: ExecutionState,
    /// Pending human interaction, opaque to the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_interaction: Option<Value>,
    /// Human response attached before a resume, opaque to the store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_response: Option<Value>,
    /// Runner bookkeeping (node reports, visited hashes, event version)
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl Checkpoint {
    /// Create a snapshot with a fresh id and the current timestamp.
    pub fn new(
        run_id: impl Into<String>,
        graph_id: impl Into<String>,
        current_node_id: impl Into<String>,
        state: HashMap<String, Value>,
        context: Vec<(String, Value)>,
        execution_state: ExecutionState,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            run_id: run_id.into(),
            graph_id: graph_id.into(),
            current_node_id: current_node_id.into(),
            state,
            context,
            timestamp: chrono::Utc::now().timestamp_millis(),
            execution_state,
            pending_interaction: None,
            human_response: None,
            metadata: HashMap::new(),
        }
    }

    /// Embed the pending interaction for a paused run.
    pub fn with_pending_interaction(mut self, interaction: Value) -> Self {
        self.pending_interaction = Some(interaction);
        self
    }

    /// Attach a human response. Returns a new value; the original stored
    /// record stays untouched.
    pub fn with_human_response(mut self, response: Value) -> Self {
        self.human_response = Some(response);
        self
    }

    /// Add a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether this snapshot waits for a human response.
    pub fn is_waiting(&self) -> bool {
        self.execution_state == ExecutionState::WaitingForHuman
    }
}
