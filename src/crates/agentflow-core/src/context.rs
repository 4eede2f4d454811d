//! Execution context: the immutable key/value carrier of a run
//!
//! An [`ExecutionContext`] travels with every hop of a run - node calls,
//! tool calls, events, checkpoints. It is a small insertion-ordered map from
//! string keys to JSON values; every "mutation" returns a new value.
//!
//! # Canonical keys
//!
//! The [`keys`] module names the well-known entries. The runner installs
//! `runId`/`graphId` at start and `nodeId`/`invocationIndex` around each
//! node call; `tenantId`/`userId`/`correlationId` usually come from the
//! caller and are the only keys promoted back from node-result metadata.
//!
//! # Ambient access
//!
//! The runner installs the context for the duration of a run via
//! [`ExecutionContext::scope`], a tokio task-local. Code reached from the
//! run - agents, tools, middleware - can read it through
//! [`ExecutionContext::current`] without it being passed explicitly. The
//! installation ends with the scope, on return and on panic alike.
//!
//! ```rust
//! use agentflow_core::context::ExecutionContext;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let ctx = ExecutionContext::new().plus("tenantId", json!("acme"));
//! ExecutionContext::scope(ctx, async {
//!     let ambient = ExecutionContext::current().unwrap();
//!     assert_eq!(ambient.get_str("tenantId").as_deref(), Some("acme"));
//! })
//! .await;
//! assert!(ExecutionContext::current().is_none());
//! # }
//! ```

use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;

/// Well-known context keys
pub mod keys {
    pub const TENANT_ID: &str = "tenantId";
    pub const USER_ID: &str = "userId";
    pub const CORRELATION_ID: &str = "correlationId";
    pub const RUN_ID: &str = "runId";
    pub const GRAPH_ID: &str = "graphId";
    pub const NODE_ID: &str = "nodeId";
    pub const INVOCATION_INDEX: &str = "invocationIndex";
    pub const AGENT_ID: &str = "agentId";
}

tokio::task_local! {
    static AMBIENT: ExecutionContext;
}

/// Immutable, insertion-ordered key/value carrier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    entries: Vec<(String, Value)>,
}

impl ExecutionContext {
    /// Empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from key/value pairs, keeping their order.
    pub fn of<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut ctx = Self::new();
        for (key, value) in entries {
            ctx = ctx.plus(key, value);
        }
        ctx
    }

    /// Build a context from a JSON object; non-objects yield an empty
    /// context.
    pub fn from_value(value: &Value) -> Self {
        match value.as_object() {
            Some(map) => Self::of(map.iter().map(|(k, v)| (k.clone(), v.clone()))),
            None => Self::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// String view of an entry; JSON strings are returned verbatim, other
    /// values rendered.
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    /// Typed view of an entry.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    /// New context with the entry set. An existing key keeps its position;
    /// a new key is appended.
    pub fn plus(&self, key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        let mut entries = self.entries.clone();
        match entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(slot) => slot.1 = value,
            None => entries.push((key, value)),
        }
        Self { entries }
    }

    /// New context with all given entries set, in iteration order.
    pub fn plus_all<K, I>(&self, entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut ctx = self.clone();
        for (key, value) in entries {
            ctx = ctx.plus(key, value);
        }
        ctx
    }

    /// Entries as an unordered map.
    pub fn to_map(&self) -> HashMap<String, Value> {
        self.entries.iter().cloned().collect()
    }

    /// Entries in insertion order.
    pub fn pairs(&self) -> &[(String, Value)] {
        &self.entries
    }

    /// Entries as a JSON object (insertion order not guaranteed by JSON).
    pub fn to_value(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tenant_id(&self) -> Option<String> {
        self.get_str(keys::TENANT_ID)
    }

    pub fn user_id(&self) -> Option<String> {
        self.get_str(keys::USER_ID)
    }

    pub fn correlation_id(&self) -> Option<String> {
        self.get_str(keys::CORRELATION_ID)
    }

    /// Run `future` with this context installed as the ambient context of
    /// the task. The previous ambient context (if any) is restored when the
    /// scope ends, including on panic.
    pub async fn scope<F: Future>(ctx: ExecutionContext, future: F) -> F::Output {
        AMBIENT.scope(ctx, future).await
    }

    /// The ambient context installed by the nearest enclosing
    /// [`ExecutionContext::scope`], if any.
    pub fn current() -> Option<ExecutionContext> {
        AMBIENT.try_with(|ctx| ctx.clone()).ok()
    }
}

// Serialized as a JSON map so contexts read naturally inside checkpoints
// and event payloads.
impl Serialize for ExecutionContext {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ExecutionContext {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ContextVisitor;

        impl<'de> Visitor<'de> for ContextVisitor {
            type Value = ExecutionContext;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of string keys to JSON values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    entries.push((key, value));
                }
                Ok(ExecutionContext { entries })
            }
        }

        deserializer.deserialize_map(ContextVisitor)
    }
}
