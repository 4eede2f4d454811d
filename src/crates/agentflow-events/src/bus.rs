//! The event bus abstraction
//!
//! Transports implement [`EventBus`]; subscribers consume boxed async
//! streams so the transport choice never leaks into caller code.

use crate::error::Result;
use crate::event::Event;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Lazy sequence of events delivered to one subscriber
pub type EventStream = BoxStream<'static, Event>;

/// Where a durable subscription starts when it has no committed offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPosition {
    /// Only events published after the subscription was created
    #[default]
    Latest,
    /// Everything the transport retained
    Earliest,
}

/// Publish/subscribe channel for lifecycle events
///
/// Ordering: events published for a single `stream_id` arrive at each
/// subscriber in publish order. No ordering is promised across streams.
/// Publishers may be concurrent; each subscriber owns its position.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish one event. Ordered per `stream_id`.
    async fn publish(&self, event: Event) -> Result<()>;

    /// Subscribe to one stream, or to all streams when `stream_id` is
    /// `None`. When `from_version` is given, retained events of the stream
    /// with `version >= from_version` are replayed before the live tail.
    async fn subscribe(
        &self,
        stream_id: Option<&str>,
        from_version: Option<u64>,
    ) -> Result<EventStream>;

    /// Live subscription filtered to the given event types, across all
    /// streams.
    async fn subscribe_by_type(&self, types: Vec<String>) -> Result<EventStream>;

    /// Close the bus. Pending subscriber streams end after draining.
    async fn close(&self) -> Result<()>;
}
