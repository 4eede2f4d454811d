//! Graph rendering to DOT and Mermaid
//!
//! Useful for docs and debugging; conditional edges are drawn dashed.

use crate::graph::Graph;
use crate::node::NodeKind;

/// Supported output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    Dot,
    Mermaid,
}

/// Render a graph.
pub fn visualize(graph: &Graph, format: VisualizationFormat) -> String {
    match format {
        VisualizationFormat::Dot => render_dot(graph),
        VisualizationFormat::Mermaid => render_mermaid(graph),
    }
}

fn kind_label(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Agent => "agent",
        NodeKind::Tool => "tool",
        NodeKind::Output => "output",
        NodeKind::Human => "human",
    }
}

fn dot_shape(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Agent => "box",
        NodeKind::Tool => "component",
        NodeKind::Output => "doublecircle",
        NodeKind::Human => "hexagon",
    }
}

fn render_dot(graph: &Graph) -> String {
    let mut out = String::new();
    out.push_str(&format!("digraph \"{}\" {{\n", graph.id()));
    out.push_str("  rankdir=LR;\n");

    let mut ids: Vec<&str> = graph.node_ids().collect();
    ids.sort_unstable();
    for id in &ids {
        let node = graph.node(id).expect("listed node");
        let marker = if *id == graph.entry_point() { ", penwidth=2" } else { "" };
        out.push_str(&format!(
            "  \"{id}\" [shape={}, label=\"{id}\\n({})\"{marker}];\n",
            dot_shape(node.kind()),
            kind_label(node.kind()),
        ));
    }
    for edge in graph.edges() {
        if edge.is_conditional() {
            out.push_str(&format!(
                "  \"{}\" -> \"{}\" [style=dashed, label=\"?\"];\n",
                edge.from, edge.to
            ));
        } else {
            out.push_str(&format!("  \"{}\" -> \"{}\";\n", edge.from, edge.to));
        }
    }
    out.push_str("}\n");
    out
}

fn render_mermaid(graph: &Graph) -> String {
    let mut out = String::from("flowchart LR\n");
    let mut ids: Vec<&str> = graph.node_ids().collect();
    ids.sort_unstable();
    for id in &ids {
        let node = graph.node(id).expect("listed node");
        let label = format!("{id}<br/>{}", kind_label(node.kind()));
        let shape = match node.kind() {
            NodeKind::Output => format!("{id}(({label}))"),
            NodeKind::Human => format!("{id}{{{{{label}}}}}"),
            _ => format!("{id}[{label}]"),
        };
        out.push_str(&format!("    {shape}\n"));
    }
    for edge in graph.edges() {
        if edge.is_conditional() {
            out.push_str(&format!("    {} -.-> {}\n", edge.from, edge.to));
        } else {
            out.push_str(&format!("    {} --> {}\n", edge.from, edge.to));
        }
    }
    out
}
