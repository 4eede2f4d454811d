//! Tool nodes: parameterized capabilities with structured results
//!
//! A [`Tool`] consumes a parameter map plus a [`ToolContext`] and returns a
//! [`ToolResult`]. The [`ToolNode`] adapter derives the parameters through
//! its [`ParamMapper`], builds the context from the run's
//! [`ExecutionContext`](crate::context::ExecutionContext), and translates
//! the result:
//!
//! - a successful value result becomes the node's output
//! - a failed result becomes a tool error carrying the tool's `transient`
//!   stance
//! - a [`ToolResultKind::WaitingHitl`] result pauses the run; the tool
//!   supplies the interaction, and on resume the same call is re-issued
//!   with the human response attached to the context
//!
//! Parameter schema validation and size limits are the tool's concern; the
//! node only relays success or failure.

use crate::context::keys;
use crate::error::{FlowError, Result, ToolErrorKind};
use crate::hitl::{HumanInteraction, HumanResponse};
use crate::node::{Node, NodeContext, NodeKind, NodeRequest, NodeResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Where in a graph a tool call happens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphCoordinates {
    pub graph_id: String,
    pub run_id: String,
    pub node_id: String,
}

/// Caller identity available to a tool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthContext {
    pub user_id: Option<String>,
    pub tenant_id: Option<String>,
}

/// Everything a tool may need beyond its parameters
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Agent on whose behalf the tool runs, when one is known
    pub agent_id: Option<String>,
    pub graph: GraphCoordinates,
    pub auth: AuthContext,
    pub correlation_id: Option<String>,
    /// Deterministic id of this invocation's potential pause
    pub tool_call_id: String,
    /// Present only on the post-pause resume call
    pub hitl_response: Option<HumanResponse>,
}

impl ToolContext {
    /// Build from the per-call node context. The runner installs `runId`,
    /// `nodeId` and `invocationIndex` before each call, which makes the
    /// derived `tool_call_id` deterministic.
    pub fn from_node_context(ctx: &NodeContext) -> Self {
        let context = ctx.context();
        let run_id = context.get_str(keys::RUN_ID).unwrap_or_default();
        let node_id = context.get_str(keys::NODE_ID).unwrap_or_default();
        let invocation_index = context
            .get_as::<usize>(keys::INVOCATION_INDEX)
            .unwrap_or(0);
        Self {
            agent_id: context.get_str(keys::AGENT_ID),
            graph: GraphCoordinates {
                graph_id: ctx.graph_id().to_string(),
                run_id: run_id.clone(),
                node_id: node_id.clone(),
            },
            auth: AuthContext {
                user_id: context.user_id(),
                tenant_id: context.tenant_id(),
            },
            correlation_id: context.correlation_id(),
            tool_call_id: crate::hitl::tool_call_id(&run_id, &node_id, invocation_index),
            hitl_response: None,
        }
    }

    pub fn with_hitl_response(mut self, response: HumanResponse) -> Self {
        self.hitl_response = Some(response);
        self
    }
}

/// How a tool result is to be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolResultKind {
    /// Plain value result
    #[default]
    Value,
    /// The tool needs human input before it can finish
    WaitingHitl,
}

/// Structured outcome of a tool execution
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub metadata: HashMap<String, Value>,
    pub kind: ToolResultKind,
    /// Whether a failed execution is worth retrying
    pub transient: bool,
    interaction: Option<HumanInteraction>,
}

impl ToolResult {
    /// Successful value result.
    pub fn ok(value: Value) -> Self {
        Self {
            success: true,
            result: Some(value),
            error: None,
            metadata: HashMap::new(),
            kind: ToolResultKind::Value,
            transient: false,
            interaction: None,
        }
    }

    /// Failed execution; `transient` marks it retryable.
    pub fn failure(error: impl Into<String>, transient: bool) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            metadata: HashMap::new(),
            kind: ToolResultKind::Value,
            transient,
            interaction: None,
        }
    }

    /// The tool pauses the run with the given interaction.
    pub fn waiting(interaction: HumanInteraction) -> Self {
        Self {
            success: true,
            result: None,
            error: None,
            metadata: HashMap::new(),
            kind: ToolResultKind::WaitingHitl,
            transient: false,
            interaction: Some(interaction),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A capability that consumes a parameter map and produces a structured
/// result
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        params: HashMap<String, Value>,
        ctx: &ToolContext,
    ) -> Result<ToolResult>;
}

/// Derives a tool's parameters from the node context
pub type ParamMapper = Arc<dyn Fn(&NodeContext) -> HashMap<String, Value> + Send + Sync>;

/// Graph node wrapping a [`Tool`]
pub struct ToolNode {
    id: String,
    tool: Arc<dyn Tool>,
    param_mapper: ParamMapper,
}

impl ToolNode {
    /// Node whose parameters are the whole state map.
    pub fn new(id: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        Self {
            id: id.into(),
            tool,
            param_mapper: Arc::new(|ctx| ctx.state().clone()),
        }
    }

    pub fn with_param_mapper(mut self, mapper: ParamMapper) -> Self {
        self.param_mapper = mapper;
        self
    }

    /// Apply the parameter mapper; the runner uses this to derive the
    /// node's input.
    pub fn map_params(&self, ctx: &NodeContext) -> HashMap<String, Value> {
        (self.param_mapper)(ctx)
    }

    fn params_from_request(&self, request: &NodeRequest) -> HashMap<String, Value> {
        match request.input.as_object() {
            Some(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            None => self.map_params(&request.context),
        }
    }

    fn convert(&self, request: &NodeRequest, outcome: ToolResult) -> Result<NodeResult> {
        if outcome.kind == ToolResultKind::WaitingHitl {
            let interaction = outcome.interaction.unwrap_or_else(|| {
                HumanInteraction::new(self.id.clone(), format!("{} needs input", self.tool.name()))
            });
            return Ok(NodeResult::pause(interaction));
        }
        if !outcome.success {
            return Err(FlowError::tool(
                self.tool.name(),
                ToolErrorKind::Runtime,
                outcome.error.unwrap_or_else(|| "tool failed".to_string()),
                outcome.transient,
            ));
        }
        let mut result = NodeResult::from_context(
            &request.context,
            outcome.result.unwrap_or(Value::Null),
            outcome.metadata,
        );
        result = result.with_metadata("tool", Value::String(self.tool.name().to_string()));
        Ok(result)
    }

    /// Post-pause path: re-issue the pending call with the human response
    /// attached. A tool that still cannot finish may pause again; the
    /// unchanged invocation index keeps the `tool_call_id` stable.
    pub async fn run_after_response(
        &self,
        request: &NodeRequest,
        response: HumanResponse,
    ) -> Result<NodeResult> {
        let params = self.params_from_request(request);
        let ctx = ToolContext::from_node_context(&request.context).with_hitl_response(response);
        let outcome = self.tool.execute(params, &ctx).await?;
        self.convert(request, outcome)
    }
}

#[async_trait]
impl Node for ToolNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Tool
    }

    async fn run(&self, request: &NodeRequest) -> Result<NodeResult> {
        let params = self.params_from_request(request);
        let ctx = ToolContext::from_node_context(&request.context);
        let outcome = self.tool.execute(params, &ctx).await?;
        self.convert(request, outcome)
    }

    fn as_tool(&self) -> Option<&ToolNode> {
        Some(self)
    }
}
