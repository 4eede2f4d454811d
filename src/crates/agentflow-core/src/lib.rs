//! # agentflow-core - Multi-agent graph execution engine
//!
//! Describe a workflow as a directed graph whose nodes are AI **agents**,
//! **tools**, **output selectors** or **human pauses**; agentflow validates
//! the graph, executes it, persists checkpoints, streams lifecycle events,
//! and can suspend and later resume a run when human input is required.
//!
//! ## Core concepts
//!
//! - [`Message`] / [`ExecutionContext`] - the immutable unit of
//!   communication and the key/value context propagated through every hop
//! - [`Node`] and the built-ins in [`nodes`] - agents wrap
//!   message-processing capabilities, tools wrap parameterized calls,
//!   output nodes select the run result, human nodes pause the run
//! - [`Graph`] / [`GraphBuilder`] - node map, ordered conditional edges,
//!   entry point; validated for dangling references, unreachable nodes and
//!   unconditional cycles before it can execute
//! - [`Middleware`] - onion-composed hooks around run start, each node
//!   call, node failure and run finish
//! - [`GraphRunner`] - the scheduler: sequential edge-driven execution,
//!   retries with backoff, checkpoint policy, pause/resume, cancellation,
//!   per-node and per-run deadlines
//! - the HITL protocol in [`hitl`] - deterministic `tool_call_id`s, pending
//!   interactions, response validation
//!
//! Checkpoint storage lives in [`agentflow_checkpoint`]; the lifecycle
//! event envelope and transports live in [`agentflow_events`].
//!
//! ## Example
//!
//! ```rust
//! use agentflow_core::{Graph, GraphRunner, State};
//! use agentflow_core::nodes::OutputNode;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let graph = Graph::builder("hello")
//!     .add_node(OutputNode::select_key("out", "input"))
//!     .build()
//!     .unwrap();
//!
//! let mut input = State::new();
//! input.insert("input".to_string(), json!("hi"));
//!
//! let report = GraphRunner::new().run(&graph, input).await.unwrap();
//! assert_eq!(report.result, Some(json!("hi")));
//! # }
//! ```

pub mod context;
pub mod error;
pub mod graph;
pub mod hitl;
pub mod message;
pub mod middleware;
pub mod node;
pub mod nodes;
pub mod retry;
pub mod runner;
pub mod validate;
pub mod visualization;

pub use context::{keys, ExecutionContext};
pub use error::{FlowError, Result, ToolErrorKind};
pub use graph::{Edge, EdgeCondition, Graph, GraphBuilder};
pub use hitl::{
    tool_call_id, HitlRequest, HitlType, HumanInteraction, HumanResponse, InteractionOption,
    PauseOrigin, PendingInteraction,
};
pub use message::{DeliveryState, MediaItem, Message, MessageKind, MessageRole, Priority};
pub use middleware::{
    compose, CheckpointMiddleware, ErrorAction, LoggingMiddleware, MetricsMiddleware,
    MetricsSnapshot, Middleware, NodeHandler, RetryMiddleware,
};
pub use node::{
    MetadataSizePolicy, Node, NodeContext, NodeKind, NodeRequest, NodeResult, State, INPUT_KEY,
    METADATA_WARN_BYTES, PREVIOUS_KEY,
};
pub use nodes::{
    Agent, AgentNode, AuthContext, GraphCoordinates, HumanNode, OutputNode, OutputSelector,
    ParamMapper, ResponseValidator, Tool, ToolContext, ToolNode, ToolResult, ToolResultKind,
};
pub use retry::RetryPolicy;
pub use runner::{
    state_after, state_hash, CancellationToken, GraphRunner, NodeReport, NodeStatus, RunReport,
    RunStatus, RunnerConfig,
};
pub use validate::{EdgeSide, ValidationError};
pub use visualization::{visualize, VisualizationFormat};

// Re-export the sibling crates under the names used throughout the docs.
pub use agentflow_checkpoint;
pub use agentflow_events;
