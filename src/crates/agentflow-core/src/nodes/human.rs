//! Human nodes: declarative pause points
//!
//! A [`HumanNode`] never computes. Reached in forward execution it produces
//! a paused [`NodeResult`] carrying its [`HumanInteraction`]; the runner
//! persists the run and returns. On resume the node's
//! [`run_after_response`](HumanNode::run_after_response) path validates the
//! response - schema validity first, then the optional custom validator -
//! and turns it into the node's output.
//!
//! The timeout is informational: it is recorded on the interaction as
//! `expires_at` and surfaced through events and checkpoint metadata, but
//! enforcement belongs to the surrounding system, not the runner's clock.

use crate::error::{FlowError, Result};
use crate::hitl::{HitlType, HumanInteraction, HumanResponse, InteractionOption};
use crate::node::{Node, NodeKind, NodeRequest, NodeResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Custom acceptance check applied after basic schema validity
pub type ResponseValidator = Arc<dyn Fn(&HumanResponse) -> bool + Send + Sync>;

/// Declarative pause point in a graph
pub struct HumanNode {
    id: String,
    prompt: String,
    options: Vec<InteractionOption>,
    timeout: Option<Duration>,
    validator: Option<ResponseValidator>,
    allow_free_text: Option<bool>,
    hitl_type: Option<HitlType>,
}

impl HumanNode {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            options: Vec::new(),
            timeout: None,
            validator: None,
            allow_free_text: None,
            hitl_type: None,
        }
    }

    pub fn with_option(mut self, option: InteractionOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn with_options(mut self, options: Vec<InteractionOption>) -> Self {
        self.options = options;
        self
    }

    /// Informational deadline recorded on the interaction.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_validator(mut self, validator: ResponseValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Override the default (`true` only when no options are offered).
    pub fn with_allow_free_text(mut self, allow: bool) -> Self {
        self.allow_free_text = Some(allow);
        self
    }

    pub fn with_hitl_type(mut self, hitl_type: HitlType) -> Self {
        self.hitl_type = Some(hitl_type);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Shape of the requested input: explicit override, else `Selection`
    /// when options are offered, else `Input`.
    pub fn hitl_type(&self) -> HitlType {
        self.hitl_type.unwrap_or(if self.options.is_empty() {
            HitlType::Input
        } else {
            HitlType::Selection
        })
    }

    /// The interaction this node pauses with.
    pub fn interaction(&self) -> HumanInteraction {
        let mut interaction = HumanInteraction::new(self.id.clone(), self.prompt.clone())
            .with_options(self.options.clone());
        if let Some(allow) = self.allow_free_text {
            interaction = interaction.with_allow_free_text(allow);
        }
        if let Some(timeout) = self.timeout {
            let paused_at = interaction.paused_at;
            interaction = interaction.with_expires_at(paused_at + timeout.as_millis() as i64);
        }
        interaction
    }

    /// Resume path: validate and convert the response into the node output.
    pub fn run_after_response(&self, response: &HumanResponse) -> Result<NodeResult> {
        let interaction = self.interaction();
        if !interaction.accepts(response) {
            return Err(FlowError::Hitl(format!(
                "response to node '{}' is not valid for the pending interaction",
                self.id
            )));
        }
        if let Some(validator) = &self.validator {
            if !validator(response) {
                return Err(FlowError::Hitl(format!(
                    "response to node '{}' was rejected by the validator",
                    self.id
                )));
            }
        }
        let data = serde_json::to_value(response)?;
        Ok(NodeResult::new(data)
            .with_metadata("nodeId", Value::String(self.id.clone()))
            .with_metadata("respondedAt", Value::from(response.timestamp)))
    }
}

#[async_trait]
impl Node for HumanNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Human
    }

    async fn run(&self, _request: &NodeRequest) -> Result<NodeResult> {
        Ok(NodeResult::pause(self.interaction()))
    }

    fn as_human(&self) -> Option<&HumanNode> {
        Some(self)
    }
}
