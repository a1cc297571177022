//! Life-cycle observer interface
//!
//! Adaptors and tools hook graph and node transitions without touching
//! engine internals. Every hook has an empty default, so observers
//! implement only what they care about.

use cascade_core::{EngineTime, NodeError};

use crate::graph::GraphPath;

/// A read-only view of a graph for observer hooks.
pub struct GraphView<'a> {
    pub label: &'a str,
    pub path: &'a GraphPath,
}

/// A read-only view of a node for observer hooks.
pub struct NodeView<'a> {
    pub graph: GraphView<'a>,
    pub name: &'a str,
    pub rank: u32,
}

pub trait EvaluationObserver: Send {
    fn before_graph_start(&mut self, _graph: &GraphView<'_>) {}
    fn after_graph_start(&mut self, _graph: &GraphView<'_>) {}
    fn before_graph_stop(&mut self, _graph: &GraphView<'_>) {}
    fn after_graph_stop(&mut self, _graph: &GraphView<'_>) {}

    fn before_node_start(&mut self, _node: &NodeView<'_>) {}
    fn after_node_start(&mut self, _node: &NodeView<'_>) {}
    fn before_node_stop(&mut self, _node: &NodeView<'_>) {}
    fn after_node_stop(&mut self, _node: &NodeView<'_>) {}

    fn before_graph_evaluation(&mut self, _graph: &GraphView<'_>, _at: EngineTime) {}
    fn after_graph_evaluation(&mut self, _graph: &GraphView<'_>, _at: EngineTime) {}

    fn before_node_evaluation(&mut self, _node: &NodeView<'_>, _at: EngineTime) {}
    fn after_node_evaluation(&mut self, _node: &NodeView<'_>, _at: EngineTime) {}

    /// A node failure captured onto its declared error output.
    fn on_node_error(&mut self, _node: &NodeView<'_>, _error: &NodeError) {}
}
