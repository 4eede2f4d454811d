//! Human-in-the-loop protocol types
//!
//! A pause - whether raised by a `HumanNode` or by a tool returning a
//! waiting result - is described by a [`HumanInteraction`] and answered by a
//! [`HumanResponse`]. The [`tool_call_id`] of a pause is deterministic:
//! `hitl_{run_id}_{node_id}_{invocation_index}`, where the invocation index
//! counts prior executions of the node within the run. Retrying the same
//! logical invocation therefore reuses the same id; a loop that reaches the
//! node again gets the next index.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Deterministic identity of one pause of one node invocation.
pub fn tool_call_id(run_id: &str, node_id: &str, invocation_index: usize) -> String {
    format!("hitl_{run_id}_{node_id}_{invocation_index}")
}

/// Shape of the input the human is asked for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HitlType {
    /// Pick one of the offered options
    Selection,
    /// Free-form text
    Input,
    /// Yes/no style approval
    Confirmation,
}

/// What raised the pause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseOrigin {
    Human,
    Tool,
}

/// One selectable option of an interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionOption {
    pub id: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InteractionOption {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A pending question to a human
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanInteraction {
    pub node_id: String,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<InteractionOption>,
    /// Epoch milliseconds when the run paused
    pub paused_at: i64,
    /// Informational deadline; enforcement is the surrounding system's job
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    pub allow_free_text: bool,
}

impl HumanInteraction {
    pub fn new(node_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            prompt: prompt.into(),
            options: Vec::new(),
            paused_at: chrono::Utc::now().timestamp_millis(),
            expires_at: None,
            allow_free_text: true,
        }
    }

    pub fn with_options(mut self, options: Vec<InteractionOption>) -> Self {
        self.allow_free_text = options.is_empty();
        self.options = options;
        self
    }

    pub fn with_allow_free_text(mut self, allow: bool) -> Self {
        self.allow_free_text = allow;
        self
    }

    pub fn with_expires_at(mut self, expires_at: i64) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Basic validity of a response against this interaction: free text is
    /// accepted when allowed and non-empty, otherwise the selected option
    /// must be one of the offered ids.
    pub fn accepts(&self, response: &HumanResponse) -> bool {
        if self.allow_free_text {
            if let Some(text) = &response.text {
                if !text.is_empty() {
                    return true;
                }
            }
        }
        match &response.selected_option {
            Some(selected) => self.options.iter().any(|option| &option.id == selected),
            None => false,
        }
    }
}

/// A human's answer to a pending interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanResponse {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_option: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Epoch milliseconds when the response was produced
    pub timestamp: i64,
}

impl HumanResponse {
    /// Response selecting one of the offered options.
    pub fn choice(node_id: impl Into<String>, option_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            selected_option: Some(option_id.into()),
            text: None,
            metadata: HashMap::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Free-text response.
    pub fn text_input(node_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            selected_option: None,
            text: Some(text.into()),
            metadata: HashMap::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Everything the runner persists about a pause, embedded in the checkpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInteraction {
    pub interaction: HumanInteraction,
    pub tool_call_id: String,
    pub invocation_index: usize,
    pub hitl_type: HitlType,
    pub origin: PauseOrigin,
}

/// Payload of a `HitlRequested` event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HitlRequest {
    pub tool_call_id: String,
    pub prompt: String,
    pub hitl_type: HitlType,
    #[serde(default)]
    pub options: Vec<InteractionOption>,
    pub allow_free_text: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
    pub run_id: String,
    pub node_id: String,
    pub graph_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}
