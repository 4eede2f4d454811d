//! The event envelope
//!
//! One envelope shape for every lifecycle signal, stable across transports.
//! The reserved type strings in [`event_types`] cover the runner's own
//! lifecycle; applications are free to publish additional types - the
//! `event_type` field is an open string.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved lifecycle event types emitted by the graph runner
pub mod event_types {
    pub const GRAPH_STARTED: &str = "GraphStarted";
    pub const NODE_STARTED: &str = "NodeStarted";
    pub const NODE_SUCCEEDED: &str = "NodeSucceeded";
    pub const NODE_FAILED: &str = "NodeFailed";
    pub const NODE_SKIPPED: &str = "NodeSkipped";
    pub const GRAPH_PAUSED: &str = "GraphPaused";
    pub const GRAPH_RESUMED: &str = "GraphResumed";
    pub const GRAPH_FINISHED: &str = "GraphFinished";
    pub const CHECKPOINT_SAVED: &str = "CheckpointSaved";
    pub const HITL_REQUESTED: &str = "HitlRequested";
    pub const HITL_RESOLVED: &str = "HitlResolved";
}

/// Propagated identity and tracing metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Name of the system that emitted the event
    #[serde(default)]
    pub source_system: String,
}

/// A single lifecycle event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique id of this event
    pub event_id: String,
    /// Open type string; reserved values in [`event_types`]
    pub event_type: String,
    /// Ordering scope; the runner uses the run id
    pub stream_id: String,
    /// Monotonic position within the stream, assigned by the publisher
    pub version: u64,
    /// Epoch milliseconds at emission
    pub timestamp: i64,
    #[serde(default)]
    pub metadata: EventMetadata,
    /// Type-specific body, opaque to the bus
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    /// Create an event with a fresh id, the current timestamp, version 0 and
    /// an empty payload.
    pub fn new(event_type: impl Into<String>, stream_id: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            stream_id: stream_id.into(),
            version: 0,
            timestamp: chrono::Utc::now().timestamp_millis(),
            metadata: EventMetadata::default(),
            payload: Value::Null,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_causation(mut self, causation_id: impl Into<String>) -> Self {
        self.metadata.causation_id = Some(causation_id.into());
        self
    }
}

/// Event class of a type string: its leading camel-case word, lowercased.
///
/// `"GraphStarted"` → `"graph"`, `"HitlRequested"` → `"hitl"`,
/// `"CheckpointSaved"` → `"checkpoint"`. Transports that shard by class
/// (Kafka topics) use this to name their channels.
pub fn event_class(event_type: &str) -> String {
    let mut class = String::new();
    for (i, ch) in event_type.chars().enumerate() {
        if i > 0 && ch.is_uppercase() {
            break;
        }
        class.extend(ch.to_lowercase());
    }
    if class.is_empty() {
        "custom".to_string()
    } else {
        class
    }
}
