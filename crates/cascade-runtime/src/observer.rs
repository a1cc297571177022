//! Tracing-backed lifecycle observer

use cascade_core::{EngineTime, NodeError};
use cascade_graph::{EvaluationObserver, GraphView, NodeView};

/// Logs graph and node transitions through `tracing`. Attach with
/// `GraphExecutor::add_observer` for run inspection without touching engine
/// internals.
#[derive(Default)]
pub struct TraceObserver;

impl TraceObserver {
    pub fn new() -> Self {
        TraceObserver
    }
}

impl EvaluationObserver for TraceObserver {
    fn after_graph_start(&mut self, graph: &GraphView<'_>) {
        tracing::info!(graph = %graph.label, path = %graph.path, "graph started");
    }

    fn after_graph_stop(&mut self, graph: &GraphView<'_>) {
        tracing::info!(graph = %graph.label, path = %graph.path, "graph stopped");
    }

    fn before_graph_evaluation(&mut self, graph: &GraphView<'_>, at: EngineTime) {
        tracing::trace!(graph = %graph.label, %at, "cycle begin");
    }

    fn after_node_evaluation(&mut self, node: &NodeView<'_>, at: EngineTime) {
        tracing::trace!(node = %node.name, rank = node.rank, %at, "node evaluated");
    }

    fn on_node_error(&mut self, node: &NodeView<'_>, error: &NodeError) {
        tracing::warn!(node = %node.name, %error, "node error captured");
    }
}
