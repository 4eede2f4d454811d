//! Error types for event bus operations

use thiserror::Error;

/// Result type for event bus operations
pub type Result<T> = std::result::Result<T, EventBusError>;

/// Errors surfaced by [`EventBus`](crate::EventBus) implementations.
///
/// Bus failures never fail a graph run: the runner logs them and keeps
/// going, so the variants here matter mostly to subscribers and operators.
#[derive(Error, Debug)]
pub enum EventBusError {
    /// Publishing an event failed
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Creating a subscription failed
    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    /// Envelope could not be encoded/decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure (connection, broker, stream)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The bus was closed
    #[error("Event bus is closed")]
    Closed,
}
