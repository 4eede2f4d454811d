//! Runner data types: reports, status, configuration, cancellation

use crate::node::{MetadataSizePolicy, State, PREVIOUS_KEY};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    Failed,
    Paused,
    Cancelled,
}

/// Outcome of one node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Success,
    Failed,
    Skipped,
}

/// Record of one node execution within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    pub node_id: String,
    pub status: NodeStatus,
    /// Epoch milliseconds when the node started
    pub started_at: i64,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// How many attempts were made (1 when no retry happened)
    pub attempts: u32,
}

/// What a finished (or paused) run hands back to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub graph_id: String,
    pub run_id: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    pub duration_ms: u64,
    /// Complete up to the point of exit
    pub node_reports: Vec<NodeReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable error kind label, when the run failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    /// Node the failure is attributed to, when the run failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_node: Option<String>,
    /// Durable checkpoint of a paused run; the caller only needs this id to
    /// resume later
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

/// Cooperative cancellation flag, checked at every suspension point
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Runner configuration
#[derive(Clone)]
pub struct RunnerConfig {
    /// Backoff applied when the middleware chain asks for a retry
    pub retry: RetryPolicy,
    /// Deadline per node invocation; exceeding it is a transient timeout
    pub per_node_timeout: Option<Duration>,
    /// Deadline per run; exceeding it cancels the run
    pub per_run_timeout: Option<Duration>,
    /// Policy applied to node-result metadata size
    pub metadata_size_policy: MetadataSizePolicy,
    /// Metadata keys promoted into the execution context beyond the
    /// canonical `tenantId`/`userId`/`correlationId`
    pub promoted_metadata_keys: Vec<String>,
    /// `sourceSystem` stamped on emitted events
    pub source_system: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            per_node_timeout: None,
            per_run_timeout: None,
            metadata_size_policy: MetadataSizePolicy::default(),
            promoted_metadata_keys: Vec::new(),
            source_system: "agentflow".to_string(),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_per_node_timeout(mut self, timeout: Duration) -> Self {
        self.per_node_timeout = Some(timeout);
        self
    }

    pub fn with_per_run_timeout(mut self, timeout: Duration) -> Self {
        self.per_run_timeout = Some(timeout);
        self
    }

    pub fn with_metadata_size_policy(mut self, policy: MetadataSizePolicy) -> Self {
        self.metadata_size_policy = policy;
        self
    }

    pub fn promote_metadata_key(mut self, key: impl Into<String>) -> Self {
        self.promoted_metadata_keys.push(key.into());
        self
    }

    pub fn with_source_system(mut self, source: impl Into<String>) -> Self {
        self.source_system = source.into();
        self
    }
}

/// The state after a node contributed its output: the node's entry and
/// `_previous` are set, everything else is untouched.
pub fn state_after(state: &State, node_id: &str, data: &Value) -> State {
    let mut next = state.clone();
    next.insert(node_id.to_string(), data.clone());
    next.insert(PREVIOUS_KEY.to_string(), data.clone());
    next
}

/// Order-independent hash of a node id plus a state map, used by the
/// runtime cycle guard: revisiting a node with an identical state means the
/// run cannot make progress.
pub fn state_hash(node_id: &str, state: &State) -> u64 {
    let ordered: BTreeMap<&String, &Value> = state.iter().collect();
    let canonical = serde_json::to_string(&ordered).unwrap_or_default();
    let mut hasher = DefaultHasher::new();
    node_id.hash(&mut hasher);
    canonical.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_after_sets_node_and_previous() {
        let mut state = State::new();
        state.insert("input".to_string(), json!("hi"));
        let next = state_after(&state, "a", &json!("out"));
        assert_eq!(next["a"], json!("out"));
        assert_eq!(next[PREVIOUS_KEY], json!("out"));
        assert_eq!(next["input"], json!("hi"));
        // The original is untouched.
        assert!(!state.contains_key("a"));
    }

    #[test]
    fn state_hash_is_insertion_order_independent() {
        let mut first = State::new();
        first.insert("a".to_string(), json!(1));
        first.insert("b".to_string(), json!(2));
        let mut second = State::new();
        second.insert("b".to_string(), json!(2));
        second.insert("a".to_string(), json!(1));
        assert_eq!(state_hash("n", &first), state_hash("n", &second));
    }

    #[test]
    fn state_hash_distinguishes_node_and_state() {
        let mut state = State::new();
        state.insert("a".to_string(), json!(1));
        let base = state_hash("n", &state);
        assert_ne!(base, state_hash("m", &state));
        state.insert("a".to_string(), json!(2));
        assert_ne!(base, state_hash("n", &state));
    }

    #[test]
    fn cancellation_token_flips_once() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn node_report_serde_round_trip() {
        let report = NodeReport {
            node_id: "a".to_string(),
            status: NodeStatus::Success,
            started_at: 1,
            duration_ms: 5,
            output: Some(json!("ok")),
            error: None,
            attempts: 1,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], json!("SUCCESS"));
        let back: NodeReport = serde_json::from_value(value).unwrap();
        assert_eq!(back.node_id, "a");
        assert_eq!(back.attempts, 1);
    }
}
