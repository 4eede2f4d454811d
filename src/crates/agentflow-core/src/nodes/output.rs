//! Output nodes: pure selectors that end a run
//!
//! An [`OutputNode`] picks the run's result out of the final state. Output
//! nodes are terminal - the validator rejects outgoing edges - and their
//! selector is expected not to fail; a selector error ends the run with the
//! `output_selector` error kind rather than propagating a panic.

use crate::error::{FlowError, Result};
use crate::node::{Node, NodeContext, NodeKind, NodeRequest, NodeResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Selects the run result from the final node context
pub type OutputSelector =
    Arc<dyn Fn(&NodeContext) -> std::result::Result<Value, String> + Send + Sync>;

/// Terminal node producing the run's result
pub struct OutputNode {
    id: String,
    selector: OutputSelector,
}

impl OutputNode {
    pub fn new(id: impl Into<String>, selector: OutputSelector) -> Self {
        Self {
            id: id.into(),
            selector,
        }
    }

    /// Selector returning `state[key]`, or an error when the key is absent.
    pub fn select_key(id: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(id, Arc::new(move |ctx| {
            ctx.get(&key)
                .cloned()
                .ok_or_else(|| format!("state has no '{key}' entry"))
        }))
    }

    /// Selector returning the most recent node output.
    pub fn select_previous(id: impl Into<String>) -> Self {
        Self::select_key(id, crate::node::PREVIOUS_KEY)
    }
}

#[async_trait]
impl Node for OutputNode {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Output
    }

    async fn run(&self, request: &NodeRequest) -> Result<NodeResult> {
        let selected = (self.selector)(&request.context).map_err(|message| {
            FlowError::OutputSelector {
                node: self.id.clone(),
                message,
            }
        })?;
        Ok(NodeResult::new(selected))
    }
}
