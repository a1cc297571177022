//! Graph builder - the resolved wiring description
//!
//! The wiring front end (out of scope here) resolves decorated functions
//! into exactly this: an ordered list of node builders plus an edge list
//! keyed by destination. `build` assigns topological ranks with Kahn's
//! algorithm, materialises the output arena, and binds every edge. The
//! runtime only ever consumes the resulting `Graph`.

use std::collections::VecDeque;
use std::sync::Arc;

use cascade_core::{ElementPath, EngineTime, OutputId, Shape, TsValue};

use crate::error::{GraphError, GraphResult};
use crate::graph::{Graph, GraphPath, NodeId, NodeSlot};
use crate::input::Input;
use crate::node::{LifecycleState, NodeBehaviour, NodeSignature};
use crate::output::Output;
use crate::scheduler::Scheduler;

/// Handle to a node added to a builder, before ranks exist.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NodeRef(usize);

struct NodeBuild {
    name: Arc<str>,
    signature: NodeSignature,
    behaviour: Box<dyn NodeBehaviour>,
}

struct Edge {
    from: NodeRef,
    output: u32,
    output_path: ElementPath,
    to: NodeRef,
    input: u32,
    input_slot: ElementPath,
}

/// Ordered node builders plus an edge list keyed by destination.
pub struct GraphBuilder {
    label: Arc<str>,
    nodes: Vec<NodeBuild>,
    edges: Vec<Edge>,
    source: Option<NodeRef>,
    sink: Option<(NodeRef, u32)>,
}

impl GraphBuilder {
    pub fn new(label: &str) -> Self {
        GraphBuilder {
            label: Arc::from(label),
            nodes: Vec::new(),
            edges: Vec::new(),
            source: None,
            sink: None,
        }
    }

    pub fn add_node(
        &mut self,
        name: &str,
        signature: NodeSignature,
        behaviour: impl NodeBehaviour + 'static,
    ) -> NodeRef {
        self.nodes.push(NodeBuild {
            name: Arc::from(name),
            signature,
            behaviour: Box::new(behaviour),
        });
        NodeRef(self.nodes.len() - 1)
    }

    /// Wire `from`'s output onto `to`'s input (whole-input peer binding).
    pub fn connect(&mut self, from: NodeRef, output: u32, to: NodeRef, input: u32) {
        self.connect_path(
            from,
            output,
            ElementPath::root(),
            to,
            input,
            ElementPath::root(),
        );
    }

    /// Wire a sub-path of an output onto a sub-slot of an input. A non-root
    /// `input_slot` produces a non-peered composite input.
    pub fn connect_path(
        &mut self,
        from: NodeRef,
        output: u32,
        output_path: ElementPath,
        to: NodeRef,
        input: u32,
        input_slot: ElementPath,
    ) {
        self.edges.push(Edge {
            from,
            output,
            output_path,
            to,
            input,
            input_slot,
        });
    }

    /// Mark the node a wrapping construct feeds parent values into.
    pub fn mark_source(&mut self, node: NodeRef) {
        self.source = Some(node);
    }

    /// Mark the output a wrapping construct reads results from.
    pub fn mark_sink(&mut self, node: NodeRef, output: u32) {
        self.sink = Some((node, output));
    }

    /// Resolve ranks and produce a constructed graph.
    pub fn build(self, path: GraphPath) -> GraphResult<Graph> {
        let count = self.nodes.len();

        // Kahn's algorithm over the edge list.
        let mut in_degree = vec![0usize; count];
        let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
        for edge in &self.edges {
            if edge.from.0 >= count || edge.to.0 >= count {
                return Err(GraphError::UnknownNode(format!(
                    "edge endpoint out of range ({} -> {})",
                    edge.from.0, edge.to.0
                )));
            }
            in_degree[edge.to.0] += 1;
            children[edge.from.0].push(edge.to.0);
        }

        let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(count);
        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            for &child in &children[idx] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    queue.push_back(child);
                }
            }
        }
        if order.len() != count {
            let stuck = (0..count)
                .find(|&i| in_degree[i] > 0)
                .map(|i| self.nodes[i].name.to_string())
                .unwrap_or_default();
            return Err(GraphError::WiringCycle(stuck));
        }

        // rank = position in topological order; every edge ends strictly
        // above where it starts. Nodes are stored in rank order.
        let mut id_of = vec![NodeId(0); count];
        for (rank, &idx) in order.iter().enumerate() {
            id_of[idx] = NodeId(rank as u32);
        }

        let mut builds: Vec<Option<NodeBuild>> = self.nodes.into_iter().map(Some).collect();
        let mut outputs: Vec<Output> = Vec::new();
        let mut slots: Vec<NodeSlot> = Vec::with_capacity(count);
        for (rank, &idx) in order.iter().enumerate() {
            let build = builds[idx].take().expect("each node built once");
            let node_id = NodeId(rank as u32);
            let signature = build.signature;
            let output_ids: Vec<OutputId> = signature
                .outputs
                .iter()
                .map(|spec| {
                    let id = OutputId::new(outputs.len());
                    outputs.push(Output::new(node_id, TsValue::new(&spec.shape)));
                    id
                })
                .collect();
            let error_output = if signature.error_output {
                let id = OutputId::new(outputs.len());
                outputs.push(Output::new(node_id, TsValue::new(&Shape::Scalar)));
                Some(id)
            } else {
                None
            };
            slots.push(NodeSlot {
                name: build.name,
                rank: rank as u32,
                inputs: signature
                    .inputs
                    .iter()
                    .map(|spec| Input::new(spec.name.clone(), spec.shape.clone(), spec.active))
                    .collect(),
                outputs: output_ids,
                error_output,
                capabilities: signature.capabilities,
                capture_inputs_on_error: signature.capture_inputs_on_error,
                behaviour: Some(build.behaviour),
                scheduler: Scheduler::new(),
                requested: EngineTime::NEVER,
                state: LifecycleState::Constructed,
            });
        }

        let mut graph = Graph::from_parts(self.label, path, slots, outputs);
        if let Some(source) = self.source {
            graph.set_boundary_source(id_of[source.0]);
        }
        if let Some((sink, output)) = self.sink {
            graph.set_boundary_sink(id_of[sink.0], output);
        }

        for edge in &self.edges {
            let from = id_of[edge.from.0];
            let to = id_of[edge.to.0];
            let output =
                graph
                    .output_id(from, edge.output)
                    .ok_or_else(|| GraphError::UnknownOutput {
                        node: graph.node_name(from).to_string(),
                        output: edge.output,
                    })?;
            graph.bind_input(
                to,
                edge.input,
                &edge.input_slot,
                output,
                edge.output_path.clone(),
            )?;
        }
        Ok(graph)
    }
}
