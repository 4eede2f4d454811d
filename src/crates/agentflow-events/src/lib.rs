//! # agentflow-events - Lifecycle events with pluggable transport
//!
//! Every lifecycle signal of a graph run is an [`Event`]: a stable envelope
//! (`eventId`, `eventType`, `streamId`, `version`, `timestamp`, metadata,
//! payload) that serializes identically across transports. The runner
//! publishes through the [`EventBus`] abstraction; which wire the events
//! travel over is a deployment choice:
//!
//! - [`InMemoryEventBus`] - single-process fan-out, always available
//! - `RedisEventBus` (feature `redis-transport`) - Redis Streams, durable,
//!   consumer groups
//! - `KafkaEventBus` (feature `kafka-transport`) - topic per event class,
//!   partition key = `streamId`
//!
//! ## Delivery model
//!
//! Events published for a single `streamId` (a run) arrive at each
//! subscriber in publish order. Cross-stream ordering is not promised.
//! Durable transports are at-least-once with their native offsets; the
//! in-memory bus is at-least-once per live subscriber and applies the
//! configured [`BufferPolicy`] under backpressure.
//!
//! Payloads that fail to decode on the consume side are routed to a
//! [`DeadLetterSink`] with their origin coordinates and never block the
//! consumer loop.
//!
//! ## Example
//!
//! ```rust,ignore
//! use agentflow_events::{Event, EventBus, InMemoryEventBus, event_types};
//! use futures::StreamExt;
//!
//! let bus = InMemoryEventBus::new();
//! let mut stream = bus.subscribe(Some("run-1"), None).await?;
//!
//! bus.publish(Event::new(event_types::GRAPH_STARTED, "run-1")).await?;
//! let event = stream.next().await.unwrap();
//! assert_eq!(event.event_type, event_types::GRAPH_STARTED);
//! ```

pub mod bus;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod memory;

#[cfg(feature = "kafka-transport")]
pub mod kafka;
#[cfg(feature = "redis-transport")]
pub mod redis_bus;

pub use bus::{EventBus, EventStream, StartPosition};
pub use dead_letter::{
    DeadLetter, DeadLetterOrigin, DeadLetterSink, InMemoryDeadLetterSink, TracingDeadLetterSink,
};
pub use error::{EventBusError, Result};
pub use event::{event_class, event_types, Event, EventMetadata};
pub use memory::{BufferPolicy, InMemoryEventBus};

#[cfg(feature = "kafka-transport")]
pub use kafka::{KafkaBusConfig, KafkaEventBus};
#[cfg(feature = "redis-transport")]
pub use redis_bus::{RedisBusConfig, RedisEventBus};
