//! The unit of communication between hops
//!
//! A [`Message`] is immutable: every "mutator" (`with_*`, [`Message::reply`],
//! [`Message::forward`], [`Message::transition_to`]) returns a new value.
//! Replies preserve thread lineage - the reply's `thread` is the original's
//! thread or, for the first reply, the original's id; `parent_id` is always
//! the original's id; `conversation_id` falls back the same way.
//!
//! ```rust
//! use agentflow_core::message::Message;
//!
//! let ask = Message::text("user", "What is the refund policy?");
//! let answer = ask.reply("30 days, no questions asked.", "support-agent");
//!
//! assert_eq!(answer.parent_id.as_deref(), Some(ask.id.as_str()));
//! assert_eq!(answer.thread.as_deref(), Some(ask.id.as_str()));
//! assert_eq!(answer.from, "support-agent");
//! assert_eq!(answer.to.as_deref(), Some("user"));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// What a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    #[default]
    Text,
    System,
    ToolCall,
    ToolResult,
    Error,
    Data,
    Prompt,
    Result,
    WorkflowStart,
    WorkflowEnd,
    Interrupt,
    Resume,
    Image,
    Document,
    Audio,
    Video,
}

/// Who speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageRole {
    #[default]
    User,
    Assistant,
    System,
    Tool,
    Agent,
}

/// Delivery urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

/// Progress marker used by the runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryState {
    #[default]
    Pending,
    Running,
    WaitingHitl,
    Completed,
    Failed,
    Cancelled,
}

/// Attached media reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub url: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Immutable unit of communication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Epoch milliseconds at creation
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub kind: MessageKind,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    /// Structured payload
    #[serde(default)]
    pub data: HashMap<String, Value>,
    /// String metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<i64>,
    /// `created_at + ttl_ms` when a TTL is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub state: DeliveryState,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Message {
    /// A fresh message with defaults for everything but sender and content.
    pub fn new(from: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now_ms(),
            conversation_id: None,
            thread: None,
            parent_id: None,
            from: from.into(),
            to: None,
            kind: MessageKind::default(),
            role: MessageRole::default(),
            content: String::new(),
            data: HashMap::new(),
            metadata: HashMap::new(),
            priority: Priority::default(),
            encrypted: false,
            ttl_ms: None,
            expires_at: None,
            media: Vec::new(),
            mentions: Vec::new(),
            state: DeliveryState::default(),
        }
    }

    /// Plain text message.
    pub fn text(from: impl Into<String>, content: impl Into<String>) -> Self {
        let mut message = Self::new(from);
        message.content = content.into();
        message
    }

    /// Structured data message.
    pub fn data(from: impl Into<String>, data: HashMap<String, Value>) -> Self {
        let mut message = Self::new(from);
        message.kind = MessageKind::Data;
        message.data = data;
        message
    }

    /// System message.
    pub fn system(content: impl Into<String>) -> Self {
        let mut message = Self::text("system", content);
        message.kind = MessageKind::System;
        message.role = MessageRole::System;
        message
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_role(mut self, role: MessageRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    /// Set a TTL; `expires_at` is derived as `created_at + ttl_ms`.
    pub fn with_ttl_ms(mut self, ttl_ms: i64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self.expires_at = Some(self.created_at + ttl_ms);
        self
    }

    pub fn with_media(mut self, item: MediaItem) -> Self {
        self.media.push(item);
        self
    }

    pub fn with_mention(mut self, mention: impl Into<String>) -> Self {
        self.mentions.push(mention.into());
        self
    }

    /// Whether the TTL has elapsed at `now` (epoch ms). Messages without a
    /// TTL never expire.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.map(|expiry| now >= expiry).unwrap_or(false)
    }

    /// Reply to this message, preserving thread lineage.
    pub fn reply(&self, content: impl Into<String>, from: impl Into<String>) -> Self {
        let mut reply = Self::text(from, content);
        reply.to = Some(self.from.clone());
        reply.parent_id = Some(self.id.clone());
        reply.thread = Some(self.thread.clone().unwrap_or_else(|| self.id.clone()));
        reply.conversation_id =
            Some(self.conversation_id.clone().unwrap_or_else(|| self.id.clone()));
        reply
    }

    /// Same message re-addressed; new id, content and lineage preserved.
    pub fn forward(&self, to: impl Into<String>) -> Self {
        let mut forwarded = self.clone();
        forwarded.id = Uuid::new_v4().to_string();
        forwarded.created_at = now_ms();
        forwarded.to = Some(to.into());
        forwarded
    }

    /// New message with the given delivery state; the reason is recorded in
    /// metadata under `stateReason`.
    pub fn transition_to(&self, state: DeliveryState, reason: impl Into<String>) -> Self {
        let mut transitioned = self.clone();
        transitioned.state = state;
        transitioned
            .metadata
            .insert("stateReason".to_string(), reason.into());
        transitioned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_message_defaults() {
        let message = Message::text("user", "hello");
        assert_eq!(message.kind, MessageKind::Text);
        assert_eq!(message.role, MessageRole::User);
        assert_eq!(message.priority, Priority::Normal);
        assert_eq!(message.state, DeliveryState::Pending);
        assert!(!message.id.is_empty());
    }

    #[test]
    fn reply_lineage_first_hop() {
        let original = Message::text("user", "question");
        let reply = original.reply("answer", "agent");
        assert_eq!(reply.parent_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(reply.thread.as_deref(), Some(original.id.as_str()));
        assert_eq!(reply.conversation_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(reply.from, "agent");
        assert_eq!(reply.to.as_deref(), Some("user"));
    }

    #[test]
    fn reply_lineage_preserves_existing_thread() {
        let original = Message::text("user", "q1");
        let first = original.reply("a1", "agent");
        let second = first.reply("q2", "user");
        // The thread stays rooted at the original message.
        assert_eq!(second.thread.as_deref(), Some(original.id.as_str()));
        assert_eq!(second.conversation_id.as_deref(), Some(original.id.as_str()));
        assert_eq!(second.parent_id.as_deref(), Some(first.id.as_str()));
    }

    #[test]
    fn forward_keeps_content_and_lineage() {
        let original = Message::text("user", "payload")
            .with_metadata("k", "v")
            .reply("routed", "router");
        let forwarded = original.forward("worker");
        assert_ne!(forwarded.id, original.id);
        assert_eq!(forwarded.content, "routed");
        assert_eq!(forwarded.to.as_deref(), Some("worker"));
        assert_eq!(forwarded.thread, original.thread);
        assert_eq!(forwarded.parent_id, original.parent_id);
    }

    #[test]
    fn ttl_derives_expiry() {
        let message = Message::text("user", "ephemeral").with_ttl_ms(1_000);
        assert_eq!(message.expires_at, Some(message.created_at + 1_000));
        assert!(!message.is_expired_at(message.created_at + 999));
        assert!(message.is_expired_at(message.created_at + 1_000));
        assert!(!Message::text("user", "forever").is_expired_at(i64::MAX));
    }

    #[test]
    fn transition_is_immutable() {
        let message = Message::text("user", "work");
        let running = message.transition_to(DeliveryState::Running, "picked up");
        assert_eq!(message.state, DeliveryState::Pending);
        assert_eq!(running.state, DeliveryState::Running);
        assert_eq!(running.metadata["stateReason"], "picked up");
        assert_eq!(running.id, message.id);
    }

    #[test]
    fn builders_accumulate() {
        let message = Message::new("agent")
            .with_kind(MessageKind::ToolResult)
            .with_role(MessageRole::Tool)
            .with_data("result", json!({"ok": true}))
            .with_priority(Priority::High)
            .with_mention("ops");
        assert_eq!(message.kind, MessageKind::ToolResult);
        assert_eq!(message.data["result"], json!({"ok": true}));
        assert_eq!(message.mentions, vec!["ops"]);
    }

    #[test]
    fn serde_uses_wire_names() {
        let message = Message::system("boot").with_ttl_ms(5);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["kind"], json!("SYSTEM"));
        assert_eq!(value["role"], json!("SYSTEM"));
        assert!(value.get("createdAt").is_some());
        assert!(value.get("ttlMs").is_some());
        assert!(value.get("expiresAt").is_some());
        let back: Message = serde_json::from_value(value).unwrap();
        assert_eq!(back, message);
    }
}
