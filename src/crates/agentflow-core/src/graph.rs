//! Graph structure: nodes, conditional edges, entry point
//!
//! A [`Graph`] maps node ids to [`Node`] implementations and carries an
//! ordered edge list. Routing is first-match: after a node completes, its
//! outgoing edges are evaluated in declaration order against the
//! [`NodeResult`], and the first edge whose predicate accepts is followed.
//! An edge without a predicate always accepts.
//!
//! Graphs are built through [`GraphBuilder`], which validates the structure
//! (see [`crate::validate`]) before handing out an immutable graph.
//!
//! ```rust
//! use agentflow_core::graph::Graph;
//! use agentflow_core::nodes::OutputNode;
//!
//! let graph = Graph::builder("pipeline")
//!     .add_node(OutputNode::select_key("out", "input"))
//!     .build()
//!     .unwrap();
//! assert_eq!(graph.entry_point(), "out");
//! ```

use crate::middleware::Middleware;
use crate::node::{Node, NodeKind, NodeResult};
use crate::validate::{self, ValidationError};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Predicate deciding whether an edge is followed for a given result
pub type EdgeCondition = Arc<dyn Fn(&NodeResult) -> bool + Send + Sync>;

/// A directed, optionally conditional transition between two nodes
#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    condition: Option<EdgeCondition>,
}

impl Edge {
    /// Unconditional edge; always followed when reached first.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: None,
        }
    }

    /// Conditional edge; followed when the predicate accepts the result.
    pub fn when(
        from: impl Into<String>,
        to: impl Into<String>,
        condition: EdgeCondition,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            condition: Some(condition),
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.condition.is_some()
    }

    /// Whether this edge accepts the result. Unconditional edges always do.
    pub fn matches(&self, result: &NodeResult) -> bool {
        match &self.condition {
            Some(condition) => condition(result),
            None => true,
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("conditional", &self.is_conditional())
            .finish()
    }
}

/// Immutable, validated graph
pub struct Graph {
    id: String,
    nodes: HashMap<String, Arc<dyn Node>>,
    edges: Vec<Edge>,
    entry: String,
    terminal: HashSet<String>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl Graph {
    pub fn builder(id: impl Into<String>) -> GraphBuilder {
        GraphBuilder::new(id)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn entry_point(&self) -> &str {
        &self.entry
    }

    pub fn node(&self, id: &str) -> Option<&Arc<dyn Node>> {
        self.nodes.get(id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// All edges in declaration order.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Outgoing edges of a node, in declaration order.
    pub fn outgoing<'g>(&'g self, node_id: &str) -> impl Iterator<Item = &'g Edge> + 'g {
        let node_id = node_id.to_string();
        self.edges.iter().filter(move |edge| edge.from == node_id)
    }

    /// Whether the node was declared terminal (output nodes implicitly are).
    pub fn is_terminal(&self, node_id: &str) -> bool {
        self.terminal.contains(node_id)
    }

    pub fn middleware(&self) -> &[Arc<dyn Middleware>] {
        &self.middleware
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .field("edges", &self.edges)
            .field("entry", &self.entry)
            .field("middleware", &self.middleware.len())
            .finish()
    }
}

/// Collects nodes, edges and middleware, then validates into a [`Graph`]
pub struct GraphBuilder {
    id: String,
    nodes: Vec<Arc<dyn Node>>,
    edges: Vec<Edge>,
    entry: Option<String>,
    terminal: HashSet<String>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl GraphBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
            entry: None,
            terminal: HashSet::new(),
            middleware: Vec::new(),
        }
    }

    pub fn add_node(mut self, node: impl Node + 'static) -> Self {
        self.nodes.push(Arc::new(node));
        self
    }

    pub fn add_node_arc(mut self, node: Arc<dyn Node>) -> Self {
        self.nodes.push(node);
        self
    }

    /// Unconditional edge.
    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.edges.push(Edge::new(from, to));
        self
    }

    /// Conditional edge; evaluated in declaration order, first match wins.
    pub fn edge_when(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: EdgeCondition,
    ) -> Self {
        self.edges.push(Edge::when(from, to, condition));
        self
    }

    /// Entry node; defaults to the first declared node.
    pub fn entry_point(mut self, node_id: impl Into<String>) -> Self {
        self.entry = Some(node_id.into());
        self
    }

    /// Declare a node terminal: reaching it with no matching edge ends the
    /// run. Output nodes are terminal implicitly.
    pub fn terminal(mut self, node_id: impl Into<String>) -> Self {
        self.terminal.insert(node_id.into());
        self
    }

    pub fn middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Validate and freeze the graph.
    pub fn build(self) -> Result<Graph, ValidationError> {
        let mut nodes: HashMap<String, Arc<dyn Node>> = HashMap::new();
        let mut first_declared = None;
        let mut terminal = self.terminal;
        for node in self.nodes {
            let id = node.id().to_string();
            if first_declared.is_none() {
                first_declared = Some(id.clone());
            }
            if node.kind() == NodeKind::Output {
                terminal.insert(id.clone());
            }
            if nodes.insert(id.clone(), node).is_some() {
                return Err(ValidationError::DuplicateNodeId { node: id });
            }
        }

        let entry = match self.entry.or(first_declared) {
            Some(entry) => entry,
            None => {
                return Err(ValidationError::MissingEntryPoint {
                    graph: self.id,
                })
            }
        };

        let graph = Graph {
            id: self.id,
            nodes,
            edges: self.edges,
            entry,
            terminal,
            middleware: self.middleware,
        };
        validate::validate(&graph)?;
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::OutputNode;
    use serde_json::json;

    fn passthrough(id: &str) -> OutputNode {
        OutputNode::select_key(id, "input")
    }

    #[test]
    fn builder_defaults_entry_to_first_node() {
        let graph = Graph::builder("g")
            .add_node(passthrough("only"))
            .build()
            .unwrap();
        assert_eq!(graph.entry_point(), "only");
        assert_eq!(graph.node_count(), 1);
        assert!(graph.is_terminal("only"));
    }

    #[test]
    fn duplicate_node_ids_are_rejected() {
        let err = Graph::builder("g")
            .add_node(passthrough("a"))
            .add_node(passthrough("a"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::DuplicateNodeId { .. }));
    }

    #[test]
    fn empty_graph_has_no_entry() {
        let err = Graph::builder("g").build().unwrap_err();
        assert!(matches!(err, ValidationError::MissingEntryPoint { .. }));
    }

    #[test]
    fn outgoing_preserves_declaration_order() {
        let always = |_: &NodeResult| true;
        let graph = Graph::builder("g")
            .add_node(crate::nodes::HumanNode::new("a", "?"))
            .add_node(passthrough("b"))
            .add_node(passthrough("c"))
            .edge_when("a", "b", Arc::new(always))
            .edge("a", "c")
            .build()
            .unwrap();
        let targets: Vec<&str> = graph.outgoing("a").map(|e| e.to.as_str()).collect();
        assert_eq!(targets, vec!["b", "c"]);
        assert!(graph.outgoing("a").next().unwrap().is_conditional());
    }

    #[test]
    fn edge_matching() {
        let edge = Edge::when(
            "a",
            "b",
            Arc::new(|result: &NodeResult| result.data == json!("go")),
        );
        assert!(edge.matches(&NodeResult::new(json!("go"))));
        assert!(!edge.matches(&NodeResult::new(json!("stop"))));
        assert!(Edge::new("a", "b").matches(&NodeResult::new(json!(null))));
    }
}
