//! Dead-letter sink for undeliverable payloads
//!
//! Consumer loops hand anything they cannot decode to a [`DeadLetterSink`]
//! together with where it came from. Sinks are fire-and-forget: publishing a
//! dead letter must never block or fail the consumer loop, so the trait
//! returns nothing and implementations swallow their own errors.

use async_trait::async_trait;
use std::sync::RwLock;

/// Coordinates of the entry that failed to decode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterOrigin {
    /// Transport name, e.g. `"memory"`, `"redis"`, `"kafka"`
    pub transport: String,
    /// Topic or stream key
    pub topic: String,
    /// Partition, where the transport has one
    pub partition: Option<i32>,
    /// Offset or entry id, where the transport has one
    pub offset: Option<String>,
}

/// An undeliverable payload with its origin and failure reason
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub origin: DeadLetterOrigin,
    pub reason: String,
    pub raw: Vec<u8>,
    /// Epoch milliseconds when the letter was created
    pub timestamp: i64,
}

impl DeadLetter {
    pub fn new(origin: DeadLetterOrigin, reason: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            origin,
            reason: reason.into(),
            raw,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Sink for dead letters; must not block the caller
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, letter: DeadLetter);
}

/// Collects dead letters in memory; useful in tests and as a debugging tap
#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    letters: RwLock<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.letters.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn publish(&self, letter: DeadLetter) {
        self.letters.write().unwrap().push(letter);
    }
}

/// Logs dead letters at warn level and drops them
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDeadLetterSink;

#[async_trait]
impl DeadLetterSink for TracingDeadLetterSink {
    async fn publish(&self, letter: DeadLetter) {
        tracing::warn!(
            transport = %letter.origin.transport,
            topic = %letter.origin.topic,
            partition = ?letter.origin.partition,
            offset = ?letter.origin.offset,
            reason = %letter.reason,
            bytes = letter.raw.len(),
            "event routed to dead-letter sink"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_sink_collects() {
        let sink = InMemoryDeadLetterSink::new();
        let origin = DeadLetterOrigin {
            transport: "redis".into(),
            topic: "agentflow:events:run-1".into(),
            partition: None,
            offset: Some("1702-0".into()),
        };
        sink.publish(DeadLetter::new(origin.clone(), "invalid json", b"{".to_vec()))
            .await;
        let letters = sink.letters();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].origin, origin);
        assert_eq!(letters[0].reason, "invalid json");
        assert!(letters[0].timestamp > 0);
    }
}
