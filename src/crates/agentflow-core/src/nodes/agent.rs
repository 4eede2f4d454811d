//! Agent nodes: message-in, message-out capabilities
//!
//! An [`Agent`] consumes a [`Message`] and produces a [`Message`]. The
//! [`AgentNode`] adapter owns the boundary work: it coerces whatever the
//! upstream state holds into a message, asks the agent whether it can
//! handle it, and folds the reply back into a [`NodeResult`] whose metadata
//! records the replying role and sender.

use crate::error::{FlowError, Result};
use crate::message::{Message, MessageKind};
use crate::node::{Node, NodeKind, NodeRequest, NodeResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// A capability that consumes a message and produces a message
#[async_trait]
pub trait Agent: Send + Sync {
    fn id(&self) -> &str;

    async fn process(&self, message: Message) -> Result<Message>;

    /// Whether this agent accepts the message. Returning `false` fails the
    /// node without calling [`Agent::process`].
    fn can_handle(&self, _message: &Message) -> bool {
        true
    }
}

/// Coerce an arbitrary state value into a message.
///
/// A value that already is a serialized [`Message`] passes through; a JSON
/// string becomes a text message from `user`; anything else is wrapped as a
/// data message.
pub(crate) fn coerce_message(value: &Value) -> Message {
    if let Ok(message) = serde_json::from_value::<Message>(value.clone()) {
        return message;
    }
    match value {
        Value::String(text) => Message::text("user", text.clone()),
        other => {
            let mut data = HashMap::new();
            data.insert("value".to_string(), other.clone());
            Message::data("user", data).with_kind(MessageKind::Data)
        }
    }
}

/// Graph node wrapping an [`Agent`]
pub struct AgentNode {
    id: String,
    agent: Arc<dyn Agent>,
}

impl AgentNode {
    pub fn new(id: impl Into<String>, agent: Arc<dyn Agent>) -> Self {
        Self {
            id: id.into(),
            agent,
        }
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }
}

#[async_trait]
impl Node for AgentNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Agent
    }

    async fn run(&self, request: &NodeRequest) -> Result<NodeResult> {
        let message = coerce_message(&request.input);
        if !self.agent.can_handle(&message) {
            return Err(FlowError::AgentCannotHandle {
                agent: self.agent.id().to_string(),
            });
        }
        let reply = self.agent.process(message).await?;

        let mut metadata = HashMap::new();
        metadata.insert("role".to_string(), serde_json::to_value(reply.role)?);
        metadata.insert("from".to_string(), Value::String(reply.from.clone()));
        if let Some(tools_used) = reply.data.get("toolsUsed") {
            metadata.insert("toolsUsed".to_string(), tools_used.clone());
        }

        let data = serde_json::to_value(&reply)?;
        Ok(NodeResult::from_context(&request.context, data, metadata))
    }
}
