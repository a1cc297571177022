//! Graph - an ordered sequence of nodes plus the cycle evaluator
//!
//! The graph exclusively owns its nodes, outputs, and schedulers (arena +
//! index ownership). One `evaluate_cycle` call is one full pass at a fixed
//! evaluation time: nodes run in ascending rank order iff they are
//! scheduled-now or an active input ticked. Mutations made at rank `r` are
//! observed within the same cycle by subscribers above `r`, and one cycle
//! later by subscribers at or below `r`.

use std::sync::Arc;

use cascade_core::{
    ElementPath, EngineTime, Key, NodeError, OutputId, SeriesError, SeriesResult, TsValue, Value,
};
use cascade_time::EvaluationClock;
use parking_lot::Mutex;

use crate::error::{GraphError, GraphResult};
use crate::input::{Input, InputBinding};
use crate::node::{Capabilities, LifecycleState, NodeBehaviour, NodeContext};
use crate::observer::{EvaluationObserver, GraphView, NodeView};
use crate::output::{Output, Subscription};
use crate::scheduler::Scheduler;

/// Index of a node within its graph.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({})", self.0)
    }
}

/// Position of a graph inside the tree of dynamic constructs.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct GraphPath(pub Vec<u32>);

impl GraphPath {
    pub fn root() -> Self {
        GraphPath::default()
    }

    pub fn child(&self, slot: u32) -> GraphPath {
        let mut path = self.0.clone();
        path.push(slot);
        GraphPath(path)
    }
}

impl std::fmt::Display for GraphPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return write!(f, "/");
        }
        for slot in &self.0 {
            write!(f, "/{slot}")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for GraphPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

/// A single write against an output's value tree.
#[derive(Debug)]
pub enum Mutation {
    SetScalar(Value),
    /// Remove the dict entry the path addresses (tombstone).
    Remove,
    InsertElem(Key),
    RemoveElem(Key),
    /// Return the output to the never-ticked state.
    Invalidate,
}

pub(crate) struct NodeSlot {
    pub(crate) name: Arc<str>,
    pub(crate) rank: u32,
    pub(crate) inputs: Vec<Input>,
    pub(crate) outputs: Vec<OutputId>,
    pub(crate) error_output: Option<OutputId>,
    pub(crate) capabilities: Capabilities,
    pub(crate) capture_inputs_on_error: bool,
    pub(crate) behaviour: Option<Box<dyn NodeBehaviour>>,
    pub(crate) scheduler: Scheduler,
    /// Earliest notification-driven wake, `NEVER` if none.
    pub(crate) requested: EngineTime,
    pub(crate) state: LifecycleState,
}

type AlarmWakes = Arc<Mutex<Vec<(NodeId, EngineTime)>>>;

pub struct Graph {
    label: Arc<str>,
    path: GraphPath,
    state: LifecycleState,
    pub(crate) nodes: Vec<NodeSlot>,
    pub(crate) outputs: Vec<Output>,
    evaluation_time: EngineTime,
    /// Rank currently being evaluated, used to decide same-cycle versus
    /// next-cycle delivery of notifications.
    evaluating_rank: Option<u32>,
    /// Wake requests delivered by wall-clock alarm callbacks.
    alarm_wakes: AlarmWakes,
    /// Node a wrapping construct feeds parent values into.
    boundary_source: Option<NodeId>,
    /// Output a wrapping construct reads results from.
    boundary_sink: Option<(NodeId, u32)>,
}

impl Graph {
    pub(crate) fn from_parts(
        label: Arc<str>,
        path: GraphPath,
        nodes: Vec<NodeSlot>,
        outputs: Vec<Output>,
    ) -> Self {
        Graph {
            label,
            path,
            state: LifecycleState::Constructed,
            nodes,
            outputs,
            evaluation_time: EngineTime::MIN,
            evaluating_rank: None,
            alarm_wakes: Arc::new(Mutex::new(Vec::new())),
            boundary_source: None,
            boundary_sink: None,
        }
    }

    pub(crate) fn set_boundary_source(&mut self, node: NodeId) {
        self.boundary_source = Some(node);
    }

    pub(crate) fn set_boundary_sink(&mut self, node: NodeId, output: u32) {
        self.boundary_sink = Some((node, output));
    }

    /// Node marked by the wiring as the construct-facing source.
    pub fn boundary_source(&self) -> Option<NodeId> {
        self.boundary_source
    }

    /// `(node, output)` marked by the wiring as the construct-facing sink.
    pub fn boundary_sink(&self) -> Option<(NodeId, u32)> {
        self.boundary_sink
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn path(&self) -> &GraphPath {
        &self.path
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn evaluation_time(&self) -> EngineTime {
        self.evaluation_time
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| &*n.name == name)
            .map(|i| NodeId(i as u32))
    }

    pub fn node_name(&self, node: NodeId) -> Arc<str> {
        self.nodes[node.index()].name.clone()
    }

    pub fn node_rank(&self, node: NodeId) -> u32 {
        self.nodes[node.index()].rank
    }

    pub(crate) fn capabilities(&self, node: NodeId) -> Capabilities {
        self.nodes[node.index()].capabilities
    }

    pub(crate) fn alarm_wakes(&self) -> AlarmWakes {
        self.alarm_wakes.clone()
    }

    pub fn scheduler(&self, node: NodeId) -> &Scheduler {
        &self.nodes[node.index()].scheduler
    }

    pub(crate) fn scheduler_mut(&mut self, node: NodeId) -> &mut Scheduler {
        &mut self.nodes[node.index()].scheduler
    }

    // --- outputs ---

    pub fn output_id(&self, node: NodeId, idx: u32) -> Option<OutputId> {
        self.nodes
            .get(node.index())?
            .outputs
            .get(idx as usize)
            .copied()
    }

    pub fn error_output_id(&self, node: NodeId) -> Option<OutputId> {
        self.nodes.get(node.index())?.error_output
    }

    pub fn output(&self, id: OutputId) -> &Output {
        &self.outputs[id.index()]
    }

    pub fn output_series(&self, node: NodeId, idx: u32) -> GraphResult<&TsValue> {
        let id = self
            .output_id(node, idx)
            .ok_or_else(|| GraphError::UnknownOutput {
                node: self.nodes[node.index()].name.to_string(),
                output: idx,
            })?;
        Ok(&self.outputs[id.index()].series)
    }

    /// Apply a mutation to an output and notify every active subscriber
    /// whose subscription path overlaps the mutated path. Subscribers at a
    /// higher rank than the one being evaluated observe it this cycle;
    /// everyone else waits for the next one.
    pub fn apply_mutation(
        &mut self,
        id: OutputId,
        path: &ElementPath,
        mutation: Mutation,
        at: EngineTime,
    ) -> SeriesResult<()> {
        let series = &mut self.outputs[id.index()].series;
        match mutation {
            Mutation::SetScalar(value) => series.set_at_path(path, value, at)?,
            Mutation::Remove => series.remove_at_path(path, at)?,
            Mutation::InsertElem(elem) => series.set_insert(path, elem, at)?,
            Mutation::RemoveElem(elem) => series.set_remove(path, &elem, at)?,
            Mutation::Invalidate => {
                if !path.is_root() {
                    return Err(SeriesError::MissingElement {
                        path: format!("{path:?}"),
                    });
                }
                series.invalidate();
            }
        }
        self.notify_subscribers(id, path, at);
        Ok(())
    }

    /// Tick a scalar on a node's output from outside any node evaluation
    /// (dynamic constructs seeding their children, tests).
    pub fn tick_value(
        &mut self,
        node: NodeId,
        idx: u32,
        value: Value,
        at: EngineTime,
    ) -> GraphResult<()> {
        let name = self.nodes[node.index()].name.to_string();
        let id = self
            .output_id(node, idx)
            .ok_or(GraphError::UnknownOutput {
                node: name.clone(),
                output: idx,
            })?;
        self.apply_mutation(id, &ElementPath::root(), Mutation::SetScalar(value), at)
            .map_err(|source| GraphError::Series { node: name, source })
    }

    fn notify_subscribers(&mut self, id: OutputId, path: &ElementPath, at: EngineTime) {
        let woken: Vec<NodeId> = self.outputs[id.index()]
            .subscribers
            .iter()
            .filter(|s| s.path.overlaps(path))
            .map(|s| s.node)
            .collect();
        for node in woken {
            self.wake_node_at(node, at);
        }
    }

    fn wake_node_at(&mut self, node: NodeId, at: EngineTime) {
        let rank = self.nodes[node.index()].rank;
        let when = match self.evaluating_rank {
            Some(current) if rank <= current => at.next_cycle(),
            _ => at,
        };
        let slot = &mut self.nodes[node.index()];
        slot.requested = slot.requested.min(when);
    }

    /// Ask for `node` to be evaluated in the cycle at `at` (push queues,
    /// alarm wakes).
    pub fn request_node(&mut self, node: NodeId, at: EngineTime) {
        self.wake_node_at(node, at);
    }

    /// Fold wake requests delivered by wall-clock alarm callbacks into the
    /// per-node requests. Also called by the executor between cycles so the
    /// scheduling aggregate sees them.
    pub fn absorb_alarm_wakes(&mut self) {
        let wakes: Vec<(NodeId, EngineTime)> = self.alarm_wakes.lock().drain(..).collect();
        for (node, fired_at) in wakes {
            self.wake_node_at(node, fired_at.max(self.evaluation_time));
        }
    }

    // --- inputs ---

    pub fn input(&self, node: NodeId, idx: u32) -> Option<&Input> {
        self.nodes.get(node.index())?.inputs.get(idx as usize)
    }

    /// The series a peered input observes.
    pub fn input_series(&self, node: NodeId, idx: u32) -> Option<&TsValue> {
        match &self.input(node, idx)?.binding {
            InputBinding::Peer { output, path } => {
                self.outputs[output.index()].series.at_path(path)
            }
            _ => None,
        }
    }

    /// The series one leaf of a non-peered composite input observes.
    pub fn input_leaf_series(
        &self,
        node: NodeId,
        idx: u32,
        slot: &ElementPath,
    ) -> Option<&TsValue> {
        let mut binding = &self.input(node, idx)?.binding;
        for seg in slot.segments() {
            binding = match (binding, seg) {
                (InputBinding::Fields(fields), cascade_core::PathSeg::Field(name)) => {
                    &fields.iter().find(|(n, _)| n == name)?.1
                }
                (InputBinding::Elements(elements), cascade_core::PathSeg::Index(i)) => {
                    elements.get(*i as usize)?
                }
                _ => return None,
            };
        }
        match binding {
            InputBinding::Peer { output, path } => {
                self.outputs[output.index()].series.at_path(path)
            }
            _ => None,
        }
    }

    pub fn input_modified(&self, node: NodeId, idx: u32, at: EngineTime) -> bool {
        let Some(input) = self.input(node, idx) else {
            return false;
        };
        input.binding.leaves().iter().any(|(output, path)| {
            self.outputs[output.index()]
                .series
                .at_path(path)
                .map(|s| s.modified(at))
                .unwrap_or(false)
        })
    }

    pub fn input_valid(&self, node: NodeId, idx: u32) -> bool {
        let Some(input) = self.input(node, idx) else {
            return false;
        };
        input.binding.leaves().iter().any(|(output, path)| {
            self.outputs[output.index()]
                .series
                .at_path(path)
                .map(TsValue::valid)
                .unwrap_or(false)
        })
    }

    /// Bind the sub-slot `slot` of input `idx` to `(output, path)`,
    /// preserving the active flag across the swap. Re-binding an identical
    /// target is a no-op: `has_peer` is unchanged and no duplicate
    /// subscription is created.
    pub fn bind_input(
        &mut self,
        node: NodeId,
        idx: u32,
        slot: &ElementPath,
        output: OutputId,
        path: ElementPath,
    ) -> GraphResult<()> {
        let name = self
            .nodes
            .get(node.index())
            .map(|n| n.name.to_string())
            .ok_or_else(|| GraphError::UnknownNode(format!("{node:?}")))?;
        let active = {
            let input = self.nodes[node.index()]
                .inputs
                .get(idx as usize)
                .ok_or(GraphError::UnknownInput {
                    node: name.clone(),
                    input: idx,
                })?;
            input.active
        };

        // Detach whatever the slot previously observed.
        let (old_leaves, identical) = {
            let input = &mut self.nodes[node.index()].inputs[idx as usize];
            let shape = input.shape.clone();
            let binding =
                input
                    .binding
                    .slot_mut(&shape, slot)
                    .ok_or_else(|| GraphError::BadInputSlot {
                        node: name.clone(),
                        input: idx,
                        slot: format!("{slot:?}"),
                    })?;
            let identical = *binding
                == InputBinding::Peer {
                    output,
                    path: path.clone(),
                };
            let old = if identical { Vec::new() } else { binding.leaves() };
            if !identical {
                *binding = InputBinding::Peer {
                    output,
                    path: path.clone(),
                };
            }
            (old, identical)
        };
        if identical {
            return Ok(());
        }
        for (old_output, old_path) in old_leaves {
            self.outputs[old_output.index()].unsubscribe(node, idx, &old_path);
        }
        if active {
            self.outputs[output.index()].subscribe(Subscription {
                node,
                input: idx,
                path,
            });
        }
        Ok(())
    }

    /// Detach every leaf of an input. The active flag is untouched, so a
    /// later bind restores subscriptions.
    pub fn unbind_input(&mut self, node: NodeId, idx: u32) -> GraphResult<()> {
        let name = self.nodes[node.index()].name.to_string();
        let input = self.nodes[node.index()]
            .inputs
            .get_mut(idx as usize)
            .ok_or(GraphError::UnknownInput {
                node: name,
                input: idx,
            })?;
        let leaves = input.binding.leaves();
        input.binding = InputBinding::Unbound;
        for (output, path) in leaves {
            self.outputs[output.index()].unsubscribe(node, idx, &path);
        }
        Ok(())
    }

    /// Switch an input between active (subscribed, wakes the node) and
    /// passive (read-only).
    pub fn set_input_active(&mut self, node: NodeId, idx: u32, active: bool) -> GraphResult<()> {
        let name = self.nodes[node.index()].name.to_string();
        let (was_active, leaves) = {
            let input = self.nodes[node.index()]
                .inputs
                .get_mut(idx as usize)
                .ok_or(GraphError::UnknownInput {
                    node: name,
                    input: idx,
                })?;
            let was = input.active;
            input.active = active;
            (was, input.binding.leaves())
        };
        if was_active == active {
            return Ok(());
        }
        for (output, path) in leaves {
            if active {
                self.outputs[output.index()].subscribe(Subscription {
                    node,
                    input: idx,
                    path,
                });
            } else {
                self.outputs[output.index()].unsubscribe(node, idx, &path);
            }
        }
        Ok(())
    }

    pub(crate) fn render_inputs(&self, node: NodeId) -> String {
        let slot = &self.nodes[node.index()];
        let mut rendered = String::new();
        for (idx, input) in slot.inputs.iter().enumerate() {
            if !rendered.is_empty() {
                rendered.push(' ');
            }
            match self.input_series(node, idx as u32).and_then(TsValue::scalar) {
                Some(value) => rendered.push_str(&format!("{}={value:?}", input.name)),
                None => rendered.push_str(&format!("{}=<{}>", input.name, input.shape.name())),
            }
        }
        rendered
    }

    // --- scheduling aggregation ---

    /// Minimum next activation across every node's scheduler and pending
    /// notification, `NEVER` when the graph is quiescent.
    pub fn next_scheduled_time(&self) -> EngineTime {
        self.nodes
            .iter()
            .map(|slot| slot.scheduler.next_time().min(slot.requested))
            .min()
            .unwrap_or(EngineTime::NEVER)
    }

    // --- lifecycle ---

    fn expect_state(&self, expected: LifecycleState) -> GraphResult<()> {
        if self.state != expected {
            return Err(GraphError::Lifecycle {
                expected,
                actual: self.state,
            });
        }
        Ok(())
    }

    /// Called exactly once, in topological order, by the owner that
    /// constructed this graph.
    pub fn initialise(&mut self, clock: &mut dyn EvaluationClock) -> GraphResult<()> {
        self.expect_state(LifecycleState::Constructed)?;
        let at = clock.evaluation_time();
        for idx in 0..self.nodes.len() {
            self.run_lifecycle(idx, clock, at, |behaviour, ctx| behaviour.initialise(ctx))?;
            self.nodes[idx].state = LifecycleState::Initialised;
        }
        self.state = LifecycleState::Initialised;
        Ok(())
    }

    pub fn start(
        &mut self,
        clock: &mut dyn EvaluationClock,
        observers: &mut [Box<dyn EvaluationObserver>],
    ) -> GraphResult<()> {
        match self.state {
            LifecycleState::Initialised | LifecycleState::Stopped => {}
            actual => {
                return Err(GraphError::Lifecycle {
                    expected: LifecycleState::Initialised,
                    actual,
                })
            }
        }
        let at = clock.evaluation_time();
        let label = self.label.clone();
        let path = self.path.clone();
        for obs in observers.iter_mut() {
            obs.before_graph_start(&GraphView {
                label: &label,
                path: &path,
            });
        }
        for idx in 0..self.nodes.len() {
            let name = self.nodes[idx].name.clone();
            let rank = self.nodes[idx].rank;
            for obs in observers.iter_mut() {
                obs.before_node_start(&node_view(&label, &path, &name, rank));
            }
            self.run_lifecycle(idx, clock, at, |behaviour, ctx| behaviour.start(ctx))?;
            self.nodes[idx].state = LifecycleState::Started;
            for obs in observers.iter_mut() {
                obs.after_node_start(&node_view(&label, &path, &name, rank));
            }
        }
        self.state = LifecycleState::Started;
        for obs in observers.iter_mut() {
            obs.after_graph_start(&GraphView {
                label: &label,
                path: &path,
            });
        }
        Ok(())
    }

    pub fn stop(
        &mut self,
        clock: &mut dyn EvaluationClock,
        observers: &mut [Box<dyn EvaluationObserver>],
    ) -> GraphResult<()> {
        self.expect_state(LifecycleState::Started)?;
        let at = clock.evaluation_time();
        let label = self.label.clone();
        let path = self.path.clone();
        for obs in observers.iter_mut() {
            obs.before_graph_stop(&GraphView {
                label: &label,
                path: &path,
            });
        }
        for idx in (0..self.nodes.len()).rev() {
            let name = self.nodes[idx].name.clone();
            let rank = self.nodes[idx].rank;
            for obs in observers.iter_mut() {
                obs.before_node_stop(&node_view(&label, &path, &name, rank));
            }
            let mut behaviour = self.nodes[idx].behaviour.take().expect("behaviour present");
            {
                let node = NodeId(idx as u32);
                let mut ctx = NodeContext {
                    graph: &mut *self,
                    clock: &mut *clock,
                    node,
                    at,
                    scheduled_now: false,
                };
                behaviour.stop(&mut ctx);
            }
            self.nodes[idx].behaviour = Some(behaviour);
            self.nodes[idx].state = LifecycleState::Stopped;
            for obs in observers.iter_mut() {
                obs.after_node_stop(&node_view(&label, &path, &name, rank));
            }
        }
        self.state = LifecycleState::Stopped;
        for obs in observers.iter_mut() {
            obs.after_graph_stop(&GraphView {
                label: &label,
                path: &path,
            });
        }
        Ok(())
    }

    /// Called exactly once, in reverse topological order, by the owner.
    /// Components received by reference are never disposed by the receiver.
    pub fn dispose(&mut self) {
        if self.state == LifecycleState::Disposed {
            return;
        }
        for idx in (0..self.nodes.len()).rev() {
            if let Some(behaviour) = self.nodes[idx].behaviour.as_mut() {
                behaviour.dispose();
            }
            self.nodes[idx].state = LifecycleState::Disposed;
        }
        for output in &mut self.outputs {
            output.subscribers.clear();
        }
        self.state = LifecycleState::Disposed;
    }

    fn run_lifecycle(
        &mut self,
        idx: usize,
        clock: &mut dyn EvaluationClock,
        at: EngineTime,
        call: impl FnOnce(
            &mut Box<dyn NodeBehaviour>,
            &mut NodeContext<'_>,
        ) -> Result<(), NodeError>,
    ) -> GraphResult<()> {
        let node = NodeId(idx as u32);
        let mut behaviour = self.nodes[idx].behaviour.take().expect("behaviour present");
        let result = {
            let mut ctx = NodeContext {
                graph: &mut *self,
                clock: &mut *clock,
                node,
                at,
                scheduled_now: false,
            };
            call(&mut behaviour, &mut ctx)
        };
        self.nodes[idx].behaviour = Some(behaviour);
        result.map_err(|err| {
            let slot = &self.nodes[idx];
            GraphError::NodeFailed {
                node: slot.name.to_string(),
                rank: slot.rank,
                path: self.path.to_string(),
                source: err.with_node(slot.name.to_string()),
            }
        })
    }

    // --- evaluation ---

    /// One full pass at the clock's current evaluation time. Returns the
    /// number of nodes evaluated.
    pub fn evaluate_cycle(
        &mut self,
        clock: &mut dyn EvaluationClock,
        observers: &mut [Box<dyn EvaluationObserver>],
    ) -> GraphResult<u32> {
        self.expect_state(LifecycleState::Started)?;
        let at = clock.evaluation_time();
        debug_assert!(
            at >= self.evaluation_time,
            "evaluation time moved backwards: {at:?} < {:?}",
            self.evaluation_time
        );
        self.evaluation_time = at;
        self.absorb_alarm_wakes();

        let label = self.label.clone();
        let path = self.path.clone();
        for obs in observers.iter_mut() {
            obs.before_graph_evaluation(
                &GraphView {
                    label: &label,
                    path: &path,
                },
                at,
            );
        }

        let mut evaluated = 0u32;
        for idx in 0..self.nodes.len() {
            let node = NodeId(idx as u32);
            let (due, scheduled_now, rank, name) = {
                let slot = &self.nodes[idx];
                (
                    slot.requested <= at || slot.scheduler.next_time() <= at,
                    slot.scheduler.is_scheduled_now(at),
                    slot.rank,
                    slot.name.clone(),
                )
            };
            if !due {
                continue;
            }

            self.evaluating_rank = Some(rank);
            {
                let slot = &mut self.nodes[idx];
                slot.scheduler.pop_due(at);
                if slot.requested <= at {
                    slot.requested = EngineTime::NEVER;
                }
            }

            for obs in observers.iter_mut() {
                obs.before_node_evaluation(&node_view(&label, &path, &name, rank), at);
            }

            let mut behaviour = self.nodes[idx].behaviour.take().expect("behaviour present");
            let result = {
                let mut ctx = NodeContext {
                    graph: &mut *self,
                    clock: &mut *clock,
                    node,
                    at,
                    scheduled_now,
                };
                behaviour.eval(&mut ctx)
            };
            self.nodes[idx].behaviour = Some(behaviour);
            evaluated += 1;

            if let Err(err) = result {
                let mut err = err.with_node(name.to_string());
                if self.nodes[idx].capture_inputs_on_error {
                    err = err.with_captured_inputs(self.render_inputs(node));
                }
                match self.nodes[idx].error_output {
                    Some(error_output) => {
                        tracing::warn!(node = %name, error = %err, "captured node error");
                        for obs in observers.iter_mut() {
                            obs.on_node_error(&node_view(&label, &path, &name, rank), &err);
                        }
                        self.apply_mutation(
                            error_output,
                            &ElementPath::root(),
                            Mutation::SetScalar(Value::Error(Arc::new(err))),
                            at,
                        )
                        .map_err(|source| GraphError::Series {
                            node: name.to_string(),
                            source,
                        })?;
                    }
                    None => {
                        self.evaluating_rank = None;
                        return Err(GraphError::NodeFailed {
                            node: name.to_string(),
                            rank,
                            path: self.path.to_string(),
                            source: err,
                        });
                    }
                }
            }

            for obs in observers.iter_mut() {
                obs.after_node_evaluation(&node_view(&label, &path, &name, rank), at);
            }
        }
        self.evaluating_rank = None;

        for obs in observers.iter_mut() {
            obs.after_graph_evaluation(
                &GraphView {
                    label: &label,
                    path: &path,
                },
                at,
            );
        }
        Ok(evaluated)
    }
}

fn node_view<'a>(
    label: &'a str,
    path: &'a GraphPath,
    name: &'a str,
    rank: u32,
) -> NodeView<'a> {
    NodeView {
        graph: GraphView { label, path },
        name,
        rank,
    }
}
