//! Byte codecs for checkpoint records
//!
//! Backends that store raw bytes (object stores, Redis, files) pick a
//! [`CheckpointSerializer`]. JSON is the default interchange format; bincode
//! is the opt-in binary codec for backends where compactness matters.

use crate::checkpoint::Checkpoint;
use crate::error::Result;

/// Encode/decode a [`Checkpoint`] to and from bytes
pub trait CheckpointSerializer: Send + Sync {
    fn encode(&self, checkpoint: &Checkpoint) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<Checkpoint>;

    /// MIME-ish label for the encoded form, useful as storage metadata.
    fn content_type(&self) -> &'static str;
}

/// JSON codec; human-readable, the default interchange format
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCheckpointSerializer;

impl JsonCheckpointSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl CheckpointSerializer for JsonCheckpointSerializer {
    fn encode(&self, checkpoint: &Checkpoint) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(checkpoint)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Checkpoint> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}

/// Bincode codec; compact binary, opt-in
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCheckpointSerializer;

impl BincodeCheckpointSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl CheckpointSerializer for BincodeCheckpointSerializer {
    fn encode(&self, checkpoint: &Checkpoint) -> Result<Vec<u8>> {
        Ok(bincode::serialize(checkpoint)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Checkpoint> {
        Ok(bincode::deserialize(bytes)?)
    }

    fn content_type(&self) -> &'static str {
        "application/octet-stream"
    }
}
