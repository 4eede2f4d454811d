//! Structural graph validation
//!
//! Runs as the last step of [`GraphBuilder::build`](crate::graph::GraphBuilder::build),
//! fail-fast. Checks, in order:
//!
//! 1. the entry point names a known node
//! 2. every edge endpoint names a known node
//! 3. output nodes have no outgoing edges
//! 4. every node is reachable from the entry point (edges followed
//!    regardless of their conditions)
//! 5. every cycle contains at least one conditional edge - an all-
//!    unconditional cycle can never leave itself and is rejected outright;
//!    conditional cycles are legal here and additionally guarded at runtime
//!    by the same-state revisit check

use crate::graph::Graph;
use crate::node::NodeKind;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Which end of an edge is broken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeSide {
    From,
    To,
}

impl std::fmt::Display for EdgeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EdgeSide::From => f.write_str("source"),
            EdgeSide::To => f.write_str("target"),
        }
    }
}

/// Structural defects found in a graph
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Graph '{graph}' has no entry point")]
    MissingEntryPoint { graph: String },

    #[error("Edge '{edge}' references unknown {side} node")]
    UnknownEdgeEndpoint { edge: String, side: EdgeSide },

    #[error("Duplicate node id '{node}'")]
    DuplicateNodeId { node: String },

    #[error("Output node '{node}' has outgoing edges")]
    OutputNodeNotTerminal { node: String },

    #[error("Nodes unreachable from the entry point: {nodes:?}")]
    UnreachableNodes { nodes: Vec<String> },

    #[error("Cycle with no conditional edge: {path:?}")]
    CycleDetected { path: Vec<String> },
}

/// Validate a graph's structure.
pub fn validate(graph: &Graph) -> Result<(), ValidationError> {
    if graph.node(graph.entry_point()).is_none() {
        return Err(ValidationError::MissingEntryPoint {
            graph: graph.id().to_string(),
        });
    }

    for edge in graph.edges() {
        if graph.node(&edge.from).is_none() {
            return Err(ValidationError::UnknownEdgeEndpoint {
                edge: format!("{}->{}", edge.from, edge.to),
                side: EdgeSide::From,
            });
        }
        if graph.node(&edge.to).is_none() {
            return Err(ValidationError::UnknownEdgeEndpoint {
                edge: format!("{}->{}", edge.from, edge.to),
                side: EdgeSide::To,
            });
        }
    }

    for id in graph.node_ids() {
        let node = graph.node(id).expect("listed node");
        if node.kind() == NodeKind::Output && graph.outgoing(id).next().is_some() {
            return Err(ValidationError::OutputNodeNotTerminal {
                node: id.to_string(),
            });
        }
    }

    check_reachability(graph)?;
    check_cycles(graph)
}

fn check_reachability(graph: &Graph) -> Result<(), ValidationError> {
    let mut reached = HashSet::new();
    let mut stack = vec![graph.entry_point().to_string()];
    while let Some(current) = stack.pop() {
        if !reached.insert(current.clone()) {
            continue;
        }
        for edge in graph.outgoing(&current) {
            stack.push(edge.to.clone());
        }
    }
    let mut unreachable: Vec<String> = graph
        .node_ids()
        .filter(|id| !reached.contains(*id))
        .map(str::to_string)
        .collect();
    if unreachable.is_empty() {
        Ok(())
    } else {
        unreachable.sort();
        Err(ValidationError::UnreachableNodes { nodes: unreachable })
    }
}

#[derive(Clone, Copy, PartialEq)]
enum VisitState {
    InProgress,
    Done,
}

fn check_cycles(graph: &Graph) -> Result<(), ValidationError> {
    let mut states: HashMap<String, VisitState> = HashMap::new();
    let mut path: Vec<String> = Vec::new();
    for start in graph.node_ids() {
        if !states.contains_key(start) {
            dfs(graph, start, &mut states, &mut path)?;
        }
    }
    Ok(())
}

fn dfs(
    graph: &Graph,
    node: &str,
    states: &mut HashMap<String, VisitState>,
    path: &mut Vec<String>,
) -> Result<(), ValidationError> {
    states.insert(node.to_string(), VisitState::InProgress);
    path.push(node.to_string());

    for edge in graph.outgoing(node) {
        match states.get(edge.to.as_str()) {
            Some(VisitState::InProgress) => {
                // Back edge: the cycle is the path suffix from the target.
                let start = path
                    .iter()
                    .position(|n| n == &edge.to)
                    .unwrap_or(0);
                let cycle: Vec<String> = path[start..].to_vec();
                if !cycle_has_conditional_edge(graph, &cycle, &edge.to) {
                    return Err(ValidationError::CycleDetected { path: cycle });
                }
            }
            Some(VisitState::Done) => {}
            None => dfs(graph, &edge.to, states, path)?,
        }
    }

    path.pop();
    states.insert(node.to_string(), VisitState::Done);
    Ok(())
}

fn cycle_has_conditional_edge(graph: &Graph, cycle: &[String], closes_to: &str) -> bool {
    let mut hops: Vec<(&str, &str)> = cycle
        .windows(2)
        .map(|pair| (pair[0].as_str(), pair[1].as_str()))
        .collect();
    hops.push((cycle.last().map(String::as_str).unwrap_or_default(), closes_to));
    hops.iter().any(|(from, to)| {
        graph
            .outgoing(from)
            .any(|edge| edge.to == *to && edge.is_conditional())
    })
}
