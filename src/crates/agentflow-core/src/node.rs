//! Node contracts: the unit of work in a graph
//!
//! A [`Node`] receives a [`NodeRequest`] - its derived input plus the
//! immutable [`NodeContext`] - and returns a [`NodeResult`]. The four
//! built-in kinds live in [`crate::nodes`]; anything implementing the trait
//! can participate in a graph.
//!
//! State is a plain map from string keys to JSON values. The runner owns
//! the only mutable copy; nodes see an immutable view and contribute
//! through their result. `state["_previous"]` always holds the most recent
//! node output ([`PREVIOUS_KEY`]), and `state["input"]` the original run
//! input ([`INPUT_KEY`]).

use crate::context::ExecutionContext;
use crate::error::{FlowError, Result};
use crate::hitl::HumanInteraction;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

/// Graph state: string keys to JSON values
pub type State = HashMap<String, Value>;

/// State key holding the most recent node output
pub const PREVIOUS_KEY: &str = "_previous";

/// State key holding the original run input
pub const INPUT_KEY: &str = "input";

/// Serialized-metadata size above which the default policy warns
pub const METADATA_WARN_BYTES: usize = 5 * 1024;

/// The built-in node kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Agent,
    Tool,
    Output,
    Human,
}

/// Immutable per-call view of a run
#[derive(Debug, Clone)]
pub struct NodeContext {
    graph_id: String,
    state: State,
    context: ExecutionContext,
}

impl NodeContext {
    pub fn new(graph_id: impl Into<String>, state: State, context: ExecutionContext) -> Self {
        Self {
            graph_id: graph_id.into(),
            state,
            context,
        }
    }

    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// New context with one state entry set.
    pub fn with_state(&self, key: impl Into<String>, value: Value) -> Self {
        let mut state = self.state.clone();
        state.insert(key.into(), value);
        Self {
            graph_id: self.graph_id.clone(),
            state,
            context: self.context.clone(),
        }
    }

    /// New context with the execution context replaced.
    pub fn with_context(&self, context: ExecutionContext) -> Self {
        Self {
            graph_id: self.graph_id.clone(),
            state: self.state.clone(),
            context,
        }
    }
}

/// What the middleware chain passes down to a node
#[derive(Debug, Clone)]
pub struct NodeRequest {
    pub node_id: String,
    /// Kind-specific derived input; middleware may replace it
    pub input: Value,
    pub context: NodeContext,
    /// 0-based retry attempt
    pub attempt: u32,
}

/// Policy applied to the serialized size of result metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataSizePolicy {
    /// Log a warning above [`METADATA_WARN_BYTES`]
    #[default]
    Warn,
    /// Fail the node above the given byte limit
    Fail(usize),
    /// No check
    Ignore,
}

/// Outcome of one node execution
#[derive(Debug, Clone)]
pub struct NodeResult {
    pub data: Value,
    pub metadata: HashMap<String, Value>,
    /// Optional restriction of the outgoing edges to consider, by target id
    pub next_edges: Option<Vec<String>>,
    interrupt: Option<HumanInteraction>,
}

impl NodeResult {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            metadata: HashMap::new(),
            next_edges: None,
            interrupt: None,
        }
    }

    /// Result carrying the execution context as metadata, merged with
    /// `additional` (which wins on key clashes).
    pub fn from_context(
        ctx: &NodeContext,
        data: Value,
        additional: HashMap<String, Value>,
    ) -> Self {
        let mut metadata: HashMap<String, Value> = ctx
            .context()
            .pairs()
            .iter()
            .cloned()
            .collect();
        metadata.extend(additional);
        Self {
            data,
            metadata,
            next_edges: None,
            interrupt: None,
        }
    }

    /// Pause signal: the run suspends and waits for a human. The
    /// interaction doubles as the result data.
    pub fn pause(interaction: HumanInteraction) -> Self {
        let data = serde_json::to_value(&interaction).unwrap_or(Value::Null);
        Self {
            data,
            metadata: HashMap::new(),
            next_edges: None,
            interrupt: Some(interaction),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_next_edges(mut self, targets: Vec<String>) -> Self {
        self.next_edges = Some(targets);
        self
    }

    pub fn is_pause(&self) -> bool {
        self.interrupt.is_some()
    }

    pub fn interaction(&self) -> Option<&HumanInteraction> {
        self.interrupt.as_ref()
    }

    /// Apply the metadata size policy for the node that produced this
    /// result.
    pub fn enforce_metadata_policy(
        &self,
        node_id: &str,
        policy: MetadataSizePolicy,
    ) -> Result<()> {
        if matches!(policy, MetadataSizePolicy::Ignore) {
            return Ok(());
        }
        let size = serde_json::to_vec(&self.metadata).map(|bytes| bytes.len()).unwrap_or(0);
        match policy {
            MetadataSizePolicy::Warn => {
                if size > METADATA_WARN_BYTES {
                    tracing::warn!(
                        node = node_id,
                        bytes = size,
                        limit = METADATA_WARN_BYTES,
                        "node result metadata is unusually large"
                    );
                }
                Ok(())
            }
            MetadataSizePolicy::Fail(limit) if size > limit => Err(FlowError::Fatal(format!(
                "node '{node_id}' result metadata is {size} bytes, limit {limit}"
            ))),
            _ => Ok(()),
        }
    }
}

impl From<Value> for NodeResult {
    fn from(data: Value) -> Self {
        NodeResult::new(data)
    }
}

/// A unit of work in a graph
#[async_trait]
pub trait Node: Send + Sync {
    /// Unique id within the graph.
    fn id(&self) -> &str;

    fn kind(&self) -> NodeKind;

    /// Execute with the derived input and immutable context.
    async fn run(&self, request: &NodeRequest) -> Result<NodeResult>;

    /// Downcast for the runner's human-node resume path.
    fn as_human(&self) -> Option<&crate::nodes::human::HumanNode> {
        None
    }

    /// Downcast for the runner's tool-node input derivation and resume path.
    fn as_tool(&self) -> Option<&crate::nodes::tool::ToolNode> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> NodeContext {
        let mut state = State::new();
        state.insert(INPUT_KEY.to_string(), json!("hi"));
        let context = ExecutionContext::new().plus("tenantId", json!("acme"));
        NodeContext::new("graph-1", state, context)
    }

    #[test]
    fn with_state_does_not_mutate_original() {
        let original = ctx();
        let updated = original.with_state("step", json!(1));
        assert!(original.get("step").is_none());
        assert_eq!(updated.get("step"), Some(&json!(1)));
        assert_eq!(updated.get(INPUT_KEY), Some(&json!("hi")));
    }

    #[test]
    fn with_context_replaces_only_context() {
        let original = ctx();
        let replaced = original.with_context(ExecutionContext::new().plus("userId", json!("u")));
        assert_eq!(replaced.get(INPUT_KEY), Some(&json!("hi")));
        assert!(replaced.context().tenant_id().is_none());
        assert_eq!(replaced.context().user_id().as_deref(), Some("u"));
    }

    #[test]
    fn from_context_merges_metadata() {
        let mut additional = HashMap::new();
        additional.insert("role".to_string(), json!("assistant"));
        additional.insert("tenantId".to_string(), json!("override"));
        let result = NodeResult::from_context(&ctx(), json!("out"), additional);
        assert_eq!(result.metadata["role"], json!("assistant"));
        // Additional entries win over context entries.
        assert_eq!(result.metadata["tenantId"], json!("override"));
        assert!(!result.is_pause());
    }

    #[test]
    fn pause_carries_interaction_as_data() {
        let interaction = HumanInteraction::new("review", "approve?");
        let result = NodeResult::pause(interaction.clone());
        assert!(result.is_pause());
        assert_eq!(result.interaction(), Some(&interaction));
        assert_eq!(result.data["prompt"], json!("approve?"));
    }

    #[test]
    fn metadata_policy_fail_and_ignore() {
        let big = "x".repeat(64);
        let mut result = NodeResult::new(json!(null));
        for i in 0..16 {
            result = result.with_metadata(format!("k{i}"), json!(big.clone()));
        }
        assert!(result.enforce_metadata_policy("n", MetadataSizePolicy::Ignore).is_ok());
        assert!(result.enforce_metadata_policy("n", MetadataSizePolicy::Warn).is_ok());
        assert!(result
            .enforce_metadata_policy("n", MetadataSizePolicy::Fail(128))
            .is_err());
        assert!(result
            .enforce_metadata_policy("n", MetadataSizePolicy::Fail(1 << 20))
            .is_ok());
    }
}
