//! Node model - signatures, behaviours, and the evaluation context
//!
//! A node's logic lives behind `NodeBehaviour`; everything it may touch
//! during a cycle (inputs, outputs, scheduler, clock) is reached through the
//! `NodeContext` threaded into every call. There is no ambient state.

use std::sync::Arc;
use std::time::Duration;

use cascade_core::{
    Delta, ElementPath, EngineTime, Key, NodeError, OutputId, Shape, TsValue, Value,
};
use cascade_time::EvaluationClock;

use crate::graph::{Graph, Mutation, NodeId};
use crate::input::Input;

/// Capabilities a node's signature may request from the engine.
#[derive(Clone, Copy, Default, Debug)]
pub struct Capabilities {
    /// Access to the per-node scheduler (engine-time and wall-clock).
    pub scheduler: bool,
    /// Access to the evaluation clock's wall-adjacent `now`.
    pub clock: bool,
}

/// Declared input of a node.
#[derive(Clone, Debug)]
pub struct InputSpec {
    pub name: Arc<str>,
    pub shape: Shape,
    /// Active inputs wake the node when their bound output ticks.
    pub active: bool,
}

impl InputSpec {
    pub fn active(name: &str, shape: Shape) -> Self {
        InputSpec {
            name: Arc::from(name),
            shape,
            active: true,
        }
    }

    pub fn passive(name: &str, shape: Shape) -> Self {
        InputSpec {
            name: Arc::from(name),
            shape,
            active: false,
        }
    }
}

/// Declared output of a node.
#[derive(Clone, Debug)]
pub struct OutputSpec {
    pub name: Arc<str>,
    pub shape: Shape,
}

impl OutputSpec {
    pub fn new(name: &str, shape: Shape) -> Self {
        OutputSpec {
            name: Arc::from(name),
            shape,
        }
    }
}

/// Resolved signature the wiring stage hands to the runtime for each node.
#[derive(Clone, Debug, Default)]
pub struct NodeSignature {
    pub inputs: Vec<InputSpec>,
    pub outputs: Vec<OutputSpec>,
    /// Declare an error output: captured evaluation failures tick there
    /// instead of aborting the graph.
    pub error_output: bool,
    pub capabilities: Capabilities,
    /// Render input values into captured errors.
    pub capture_inputs_on_error: bool,
}

impl NodeSignature {
    pub fn new() -> Self {
        NodeSignature::default()
    }

    pub fn with_input(mut self, spec: InputSpec) -> Self {
        self.inputs.push(spec);
        self
    }

    pub fn with_output(mut self, spec: OutputSpec) -> Self {
        self.outputs.push(spec);
        self
    }

    pub fn with_error_output(mut self) -> Self {
        self.error_output = true;
        self
    }

    pub fn with_scheduler(mut self) -> Self {
        self.capabilities.scheduler = true;
        self
    }

    pub fn with_clock(mut self) -> Self {
        self.capabilities.clock = true;
        self
    }

    pub fn with_input_capture(mut self) -> Self {
        self.capture_inputs_on_error = true;
        self
    }
}

/// Lifecycle of a node or graph.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LifecycleState {
    Constructed,
    Initialised,
    Started,
    Stopped,
    Disposed,
}

/// A node's logic. `eval` runs only when the node is scheduled-now or an
/// active input ticked; it must not block.
pub trait NodeBehaviour: Send {
    fn initialise(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        Ok(())
    }

    fn start(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        Ok(())
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError>;

    fn stop(&mut self, _ctx: &mut NodeContext<'_>) {}

    fn dispose(&mut self) {}
}

/// Everything a behaviour may reach during one lifecycle call.
pub struct NodeContext<'a> {
    pub(crate) graph: &'a mut Graph,
    pub(crate) clock: &'a mut dyn EvaluationClock,
    pub(crate) node: NodeId,
    pub(crate) at: EngineTime,
    pub(crate) scheduled_now: bool,
}

impl<'a> NodeContext<'a> {
    /// The fixed instant of the current cycle.
    pub fn engine_time(&self) -> EngineTime {
        self.at
    }

    pub fn node_name(&self) -> Arc<str> {
        self.graph.node_name(self.node)
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Path of the owning graph, for deriving child-graph paths.
    pub fn graph_path(&self) -> crate::graph::GraphPath {
        self.graph.path().clone()
    }

    /// Resolve a sibling node's output into a reference value target.
    pub fn resolve_output(&self, node_name: &str, idx: u32) -> Option<OutputId> {
        let node = self.graph.node_by_name(node_name)?;
        self.graph.output_id(node, idx)
    }

    /// Wall-adjacent instant; requires the `clock` capability.
    pub fn now(&self) -> Result<EngineTime, NodeError> {
        self.require_clock()?;
        Ok(self.clock.now())
    }

    /// Wall time spent in the current cycle; requires the `clock` capability.
    pub fn cycle_time(&self) -> Result<Duration, NodeError> {
        self.require_clock()?;
        Ok(self.clock.cycle_time())
    }

    // --- inputs ---

    pub fn input(&self, idx: u32) -> Option<&Input> {
        self.graph.input(self.node, idx)
    }

    /// Whether the input's observed value ticked this cycle.
    pub fn input_modified(&self, idx: u32) -> bool {
        self.graph.input_modified(self.node, idx, self.at)
    }

    pub fn input_valid(&self, idx: u32) -> bool {
        self.graph.input_valid(self.node, idx)
    }

    /// Scalar payload of a peered scalar input.
    pub fn input_value(&self, idx: u32) -> Option<Value> {
        self.graph.input_series(self.node, idx)?.scalar().cloned()
    }

    /// The series an input observes (peered inputs only).
    pub fn input_series(&self, idx: u32) -> Option<&TsValue> {
        self.graph.input_series(self.node, idx)
    }

    /// The input's visible delta for this cycle.
    pub fn input_delta(&self, idx: u32) -> Option<Delta> {
        self.graph.input_series(self.node, idx)?.delta(self.at)
    }

    /// Scalar payload of one leaf of a non-peered composite input.
    pub fn input_leaf_value(&self, idx: u32, slot: &ElementPath) -> Option<Value> {
        self.graph
            .input_leaf_series(self.node, idx, slot)?
            .scalar()
            .cloned()
    }

    /// Re-bind an input to a new referent, preserving its active flag.
    /// Used by reference-following nodes when the referent re-ticks.
    pub fn rebind_input(
        &mut self,
        idx: u32,
        output: OutputId,
        path: ElementPath,
    ) -> Result<(), NodeError> {
        self.graph
            .bind_input(self.node, idx, &ElementPath::root(), output, path)
            .map_err(|e| NodeError::invalid_input(e.to_string()))
    }

    // --- outputs ---

    /// Tick a scalar value on output `idx`.
    pub fn tick(&mut self, idx: u32, value: Value) -> Result<(), NodeError> {
        self.mutate(idx, ElementPath::root(), Mutation::SetScalar(value))
    }

    /// Tick a scalar at a path inside a composite output, creating dict
    /// entries along the way.
    pub fn tick_path(
        &mut self,
        idx: u32,
        path: ElementPath,
        value: Value,
    ) -> Result<(), NodeError> {
        self.mutate(idx, path, Mutation::SetScalar(value))
    }

    /// Remove the dict entry addressed by `path` (a tombstone this cycle).
    pub fn remove_key(&mut self, idx: u32, path: ElementPath) -> Result<(), NodeError> {
        self.mutate(idx, path, Mutation::Remove)
    }

    pub fn insert_elem(&mut self, idx: u32, elem: Key) -> Result<(), NodeError> {
        self.mutate(idx, ElementPath::root(), Mutation::InsertElem(elem))
    }

    pub fn remove_elem(&mut self, idx: u32, elem: Key) -> Result<(), NodeError> {
        self.mutate(idx, ElementPath::root(), Mutation::RemoveElem(elem))
    }

    /// Drop the output back to the never-ticked state; consumers observe
    /// `valid == false`.
    pub fn invalidate_output(&mut self, idx: u32) -> Result<(), NodeError> {
        self.mutate(idx, ElementPath::root(), Mutation::Invalidate)
    }

    /// The arena id of output `idx`, for building reference values.
    pub fn output_id(&self, idx: u32) -> Option<OutputId> {
        self.graph.output_id(self.node, idx)
    }

    pub fn output_series(&self, idx: u32) -> Option<&TsValue> {
        let id = self.graph.output_id(self.node, idx)?;
        Some(self.graph.output(id).series())
    }

    fn mutate(&mut self, idx: u32, path: ElementPath, m: Mutation) -> Result<(), NodeError> {
        let id = self
            .graph
            .output_id(self.node, idx)
            .ok_or_else(|| NodeError::evaluation(format!("no output {idx}")))?;
        self.graph
            .apply_mutation(id, &path, m, self.at)
            .map_err(|e| NodeError::evaluation(e.to_string()))
    }

    // --- scheduling ---

    /// True iff a scheduler entry fired for this cycle.
    pub fn is_scheduled_now(&self) -> bool {
        self.scheduled_now
    }

    pub fn is_scheduled(&self) -> Result<bool, NodeError> {
        self.require_scheduler()?;
        Ok(self.graph.scheduler(self.node).is_scheduled())
    }

    /// Schedule this node at an absolute engine time. Scheduling in the past
    /// is a misuse error raised here.
    pub fn schedule(&mut self, at: EngineTime, tag: Option<&str>) -> Result<(), NodeError> {
        self.require_scheduler()?;
        if at < self.at {
            return Err(NodeError::schedule(format!(
                "cannot schedule at {at:?}, evaluation time is {:?}",
                self.at
            )));
        }
        self.graph.scheduler_mut(self.node).schedule(at, tag);
        Ok(())
    }

    /// Schedule this node `delay` after the current evaluation time.
    pub fn schedule_in(&mut self, delay: Duration, tag: Option<&str>) -> Result<(), NodeError> {
        let at = self.at + delay;
        self.schedule(at, tag)
    }

    /// Schedule this node for the current instant (served by this cycle if
    /// the node has not run yet, otherwise by the next one).
    pub fn schedule_now(&mut self) -> Result<(), NodeError> {
        self.schedule(self.at, None)
    }

    pub fn un_schedule(&mut self, tag: &str) -> Result<(), NodeError> {
        self.require_scheduler()?;
        if !self.graph.scheduler_mut(self.node).un_schedule(tag) {
            return Err(NodeError::schedule(format!("unknown schedule tag '{tag}'")));
        }
        Ok(())
    }

    /// Request a wall-clock wake `delay` from now (real-time alarms). The
    /// node is re-evaluated in the cycle the alarm fires in. Only supported
    /// by the real-time clock.
    pub fn schedule_wall(&mut self, delay: Duration, name: &str) -> Result<(), NodeError> {
        self.require_scheduler()?;
        let at = self.clock.now() + delay;
        let wakes = self.graph.alarm_wakes();
        let node = self.node;
        self.clock
            .set_alarm(
                at,
                name,
                Box::new(move |fired_at| {
                    wakes.lock().push((node, fired_at));
                }),
            )
            .map_err(|e| NodeError::schedule(e.to_string()))
    }

    fn require_scheduler(&self) -> Result<(), NodeError> {
        if self.graph.capabilities(self.node).scheduler {
            Ok(())
        } else {
            Err(NodeError::new(
                cascade_core::NodeErrorKind::Capability,
                "signature does not declare the scheduler capability",
            ))
        }
    }

    fn require_clock(&self) -> Result<(), NodeError> {
        if self.graph.capabilities(self.node).clock {
            Ok(())
        } else {
            Err(NodeError::new(
                cascade_core::NodeErrorKind::Capability,
                "signature does not declare the clock capability",
            ))
        }
    }
}
