//! Error taxonomy for graph construction and execution
//!
//! Errors are classified by *kind*, and each kind carries a fixed retry
//! stance: validation and fatal errors are never retried, timeouts and
//! store conflicts always may be, agent and tool failures carry their own
//! `transient` flag. The runner consults [`FlowError::is_transient`] before
//! honoring a retry decision, so a middleware cannot accidentally retry a
//! permanent failure.
//!
//! # Matching errors
//!
//! ```rust
//! use agentflow_core::error::FlowError;
//!
//! fn describe(err: &FlowError) -> String {
//!     match err {
//!         FlowError::CycleAtRuntime { node } => format!("stuck looping at {node}"),
//!         FlowError::Hitl(reason) => format!("bad human response: {reason}"),
//!         other => format!("{other}"),
//!     }
//! }
//! ```

use crate::validate::ValidationError;
use thiserror::Error;

/// Convenience result type using [`FlowError`]
pub type Result<T> = std::result::Result<T, FlowError>;

/// Discriminator for tool failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolErrorKind {
    MissingParam,
    InvalidParam,
    EmitFailed,
    MissingContext,
    Runtime,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ToolErrorKind::MissingParam => "MISSING_PARAM",
            ToolErrorKind::InvalidParam => "INVALID_PARAM",
            ToolErrorKind::EmitFailed => "EMIT_FAILED",
            ToolErrorKind::MissingContext => "MISSING_CONTEXT",
            ToolErrorKind::Runtime => "RUNTIME",
        };
        f.write_str(label)
    }
}

/// All errors surfaced by the graph engine
#[derive(Error, Debug)]
pub enum FlowError {
    /// Graph or schema structure is invalid; never retried
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// An agent failed while processing a message
    #[error("Agent '{agent}' failed: {message}")]
    Agent {
        agent: String,
        message: String,
        transient: bool,
    },

    /// The agent declined the message via `can_handle`
    #[error("Agent '{agent}' cannot handle the message")]
    AgentCannotHandle { agent: String },

    /// A tool execution failed
    #[error("Tool '{tool}' failed ({kind}): {message}")]
    Tool {
        tool: String,
        kind: ToolErrorKind,
        message: String,
        transient: bool,
    },

    /// An output selector raised
    #[error("Output selector of node '{node}' failed: {message}")]
    OutputSelector { node: String, message: String },

    /// An operation exceeded its deadline; transient
    #[error("Operation timed out after {duration_ms}ms: {operation}")]
    Timeout { operation: String, duration_ms: u64 },

    /// Optimistic-concurrency violation; retryable a bounded number of times
    #[error("Concurrent modification: {0}")]
    Concurrency(String),

    /// Event publish/consume failure; never fails a run
    #[error("Event store error: {0}")]
    EventStore(String),

    /// Invalid or expired human response
    #[error("Human interaction error: {0}")]
    Hitl(String),

    /// Resume was attempted without a response attached
    #[error("Checkpoint '{checkpoint_id}' is awaiting a human response")]
    AwaitingResponse { checkpoint_id: String },

    /// The runner was routed to a node the graph does not contain
    #[error("Unknown node '{node}'")]
    UnknownNode { node: String },

    /// The same node was revisited with an identical state
    #[error("Runtime cycle detected at node '{node}'")]
    CycleAtRuntime { node: String },

    /// Checkpoint persistence failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] agentflow_checkpoint::CheckpointError),

    /// State or payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Runner or graph configuration is unusable
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unexpected condition; never retried
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl FlowError {
    /// Create an agent error; `transient` controls retry eligibility.
    pub fn agent(agent: impl Into<String>, message: impl Into<String>, transient: bool) -> Self {
        Self::Agent {
            agent: agent.into(),
            message: message.into(),
            transient,
        }
    }

    /// Create a tool error.
    pub fn tool(
        tool: impl Into<String>,
        kind: ToolErrorKind,
        message: impl Into<String>,
        transient: bool,
    ) -> Self {
        Self::Tool {
            tool: tool.into(),
            kind,
            message: message.into(),
            transient,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
        }
    }

    /// Whether a retry of the failed operation may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FlowError::Agent { transient, .. } | FlowError::Tool { transient, .. } => *transient,
            FlowError::Timeout { .. } | FlowError::Concurrency(_) => true,
            FlowError::Checkpoint(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Stable kind label, used in run reports and metrics tags.
    pub fn kind(&self) -> &'static str {
        match self {
            FlowError::Validation(_) => "validation",
            FlowError::Agent { .. } => "agent",
            FlowError::AgentCannotHandle { .. } => "agent_cannot_handle",
            FlowError::Tool { .. } => "tool",
            FlowError::OutputSelector { .. } => "output_selector",
            FlowError::Timeout { .. } => "timeout",
            FlowError::Concurrency(_) => "concurrency",
            FlowError::EventStore(_) => "event_store",
            FlowError::Hitl(_) => "hitl",
            FlowError::AwaitingResponse { .. } => "awaiting_response",
            FlowError::UnknownNode { .. } => "unknown_node",
            FlowError::CycleAtRuntime { .. } => "cycle_at_runtime",
            FlowError::Checkpoint(_) => "checkpoint",
            FlowError::Serialization(_) => "serialization",
            FlowError::Configuration(_) => "configuration",
            FlowError::Fatal(_) => "fatal",
        }
    }

    /// The node the error is attributed to, when it carries one.
    pub fn node(&self) -> Option<&str> {
        match self {
            FlowError::OutputSelector { node, .. }
            | FlowError::UnknownNode { node }
            | FlowError::CycleAtRuntime { node } => Some(node),
            _ => None,
        }
    }
}
