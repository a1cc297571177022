//! Standard node library
//!
//! Sources, operators, and sinks used to assemble pipelines. Pull sources
//! are explicit iterator state machines (`ReplayIter`), never coroutines;
//! they are restartable only when the underlying source is.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use cascade_core::{
    ElementPath, EngineTime, Key, NodeError, NodeErrorKind, Shape, Value, MIN_TD,
};
use cascade_graph::{InputSpec, NodeBehaviour, NodeContext, NodeSignature, OutputSpec};
use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// sources
// ---------------------------------------------------------------------------

/// Ticks one constant value at the run's start time.
pub struct ConstSource {
    value: Value,
}

impl ConstSource {
    pub fn new(value: Value) -> Self {
        ConstSource { value }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_output(OutputSpec::new("out", Shape::Scalar))
            .with_scheduler()
    }
}

impl NodeBehaviour for ConstSource {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        ctx.schedule_now()
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        ctx.tick(0, self.value.clone())
    }
}

/// Boundary node of a nested graph: its output is fed by the wrapping
/// construct (that key's slice of the parent inputs); it never ticks on its
/// own.
pub struct SlotSource;

impl SlotSource {
    pub fn signature() -> NodeSignature {
        NodeSignature::new().with_output(OutputSpec::new("out", Shape::Scalar))
    }
}

impl NodeBehaviour for SlotSource {
    fn eval(&mut self, _ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        Ok(())
    }
}

/// An ordered `(time, value)` replay source. `restart` returns false for
/// one-shot feeds.
pub trait ReplayIter: Send {
    fn next(&mut self) -> Option<(EngineTime, Value)>;

    fn restart(&mut self) -> bool {
        false
    }
}

/// In-memory replay over a recorded sequence; restartable.
pub struct VecReplay {
    items: Vec<(EngineTime, Value)>,
    pos: usize,
}

impl VecReplay {
    pub fn new(items: Vec<(EngineTime, Value)>) -> Self {
        VecReplay { items, pos: 0 }
    }
}

impl ReplayIter for VecReplay {
    fn next(&mut self) -> Option<(EngineTime, Value)> {
        let item = self.items.get(self.pos).cloned();
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn restart(&mut self) -> bool {
        self.pos = 0;
        true
    }
}

/// Pull source: ticks each `(time, value)` of its iterator at that time.
pub struct ReplaySource {
    iter: Box<dyn ReplayIter>,
    pending: Option<(EngineTime, Value)>,
}

impl ReplaySource {
    pub fn new(iter: impl ReplayIter + 'static) -> Self {
        ReplaySource {
            iter: Box::new(iter),
            pending: None,
        }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_output(OutputSpec::new("out", Shape::Scalar))
            .with_scheduler()
    }

    fn schedule_pending(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if let Some((at, _)) = self.pending {
            // Items at or before the current instant land next cycle.
            let at = at.max(ctx.engine_time());
            ctx.schedule(at, Some("replay"))?;
        }
        Ok(())
    }
}

impl NodeBehaviour for ReplaySource {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        self.pending = self.iter.next();
        self.schedule_pending(ctx)
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let Some((at, value)) = self.pending.take() else {
            return Ok(());
        };
        if at > ctx.engine_time() {
            // Woken early; keep waiting.
            self.pending = Some((at, value));
            return self.schedule_pending(ctx);
        }
        ctx.tick(0, value)?;
        self.pending = self.iter.next();
        self.schedule_pending(ctx)
    }
}

/// One keyed change applied to a dict output.
#[derive(Clone, Debug, Default)]
pub struct DictPatch {
    pub inserts: Vec<(Key, Value)>,
    pub removes: Vec<Key>,
}

impl DictPatch {
    pub fn insert(mut self, key: impl Into<Key>, value: impl Into<Value>) -> Self {
        self.inserts.push((key.into(), value.into()));
        self
    }

    pub fn remove(mut self, key: impl Into<Key>) -> Self {
        self.removes.push(key.into());
        self
    }
}

/// Replays dict patches onto a dict-shaped output at given times.
pub struct DictReplaySource {
    items: VecDeque<(EngineTime, DictPatch)>,
}

impl DictReplaySource {
    pub fn new(items: Vec<(EngineTime, DictPatch)>) -> Self {
        DictReplaySource {
            items: items.into(),
        }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_output(OutputSpec::new("out", Shape::dict(Shape::Scalar)))
            .with_scheduler()
    }
}

impl NodeBehaviour for DictReplaySource {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if let Some((at, _)) = self.items.front() {
            ctx.schedule((*at).max(ctx.engine_time()), Some("replay"))?;
        }
        Ok(())
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let at = ctx.engine_time();
        while let Some((when, _)) = self.items.front() {
            if *when > at {
                break;
            }
            let (_, patch) = self.items.pop_front().expect("non-empty");
            for (key, value) in patch.inserts {
                ctx.tick_path(0, ElementPath::key(key), value)?;
            }
            for key in patch.removes {
                ctx.remove_key(0, ElementPath::key(key))?;
            }
        }
        if let Some((when, _)) = self.items.front() {
            ctx.schedule((*when).max(at), Some("replay"))?;
        }
        Ok(())
    }
}

/// One change applied to a set output.
#[derive(Clone, Debug, Default)]
pub struct SetPatch {
    pub inserts: Vec<Key>,
    pub removes: Vec<Key>,
}

impl SetPatch {
    pub fn insert(mut self, elem: impl Into<Key>) -> Self {
        self.inserts.push(elem.into());
        self
    }

    pub fn remove(mut self, elem: impl Into<Key>) -> Self {
        self.removes.push(elem.into());
        self
    }
}

/// Replays set patches onto a set-shaped output at given times.
pub struct SetReplaySource {
    items: VecDeque<(EngineTime, SetPatch)>,
}

impl SetReplaySource {
    pub fn new(items: Vec<(EngineTime, SetPatch)>) -> Self {
        SetReplaySource {
            items: items.into(),
        }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_output(OutputSpec::new("out", Shape::Set))
            .with_scheduler()
    }
}

impl NodeBehaviour for SetReplaySource {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if let Some((at, _)) = self.items.front() {
            ctx.schedule((*at).max(ctx.engine_time()), Some("replay"))?;
        }
        Ok(())
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let at = ctx.engine_time();
        while let Some((when, _)) = self.items.front() {
            if *when > at {
                break;
            }
            let (_, patch) = self.items.pop_front().expect("non-empty");
            for elem in patch.inserts {
                ctx.insert_elem(0, elem)?;
            }
            for elem in patch.removes {
                ctx.remove_elem(0, elem)?;
            }
        }
        if let Some((when, _)) = self.items.front() {
            ctx.schedule((*when).max(at), Some("replay"))?;
        }
        Ok(())
    }
}

/// Emits a reference to a sibling node's output, re-resolving at start.
pub struct RefSource {
    target_node: String,
    target_output: u32,
}

impl RefSource {
    pub fn new(target_node: &str, target_output: u32) -> Self {
        RefSource {
            target_node: target_node.to_string(),
            target_output,
        }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_output(OutputSpec::new("out", Shape::Scalar))
            .with_scheduler()
    }

    /// Point at a different node; takes effect at the next evaluation.
    pub fn retarget(&mut self, target_node: &str, target_output: u32) {
        self.target_node = target_node.to_string();
        self.target_output = target_output;
    }
}

impl NodeBehaviour for RefSource {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        ctx.schedule_now()
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let output = ctx
            .resolve_output(&self.target_node, self.target_output)
            .ok_or_else(|| {
                NodeError::invalid_input(format!("unknown reference target '{}'", self.target_node))
            })?;
        ctx.tick(0, Value::Ref(cascade_core::OutputRef::new(output)))
    }
}

// ---------------------------------------------------------------------------
// operators
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// Caller-selected divide-by-zero policy. Explicit per-operation
/// configuration, never conflated with node evaluation errors.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DivPolicy {
    /// Raise a typed division-by-zero node error.
    Error,
    Nan,
    Infinity,
    /// Produce no tick for this cycle.
    Drop,
    Zero,
    One,
}

/// Binary scalar arithmetic over two active inputs.
pub struct BinaryOp {
    op: ArithOp,
    div_policy: DivPolicy,
}

impl BinaryOp {
    pub fn new(op: ArithOp) -> Self {
        BinaryOp {
            op,
            div_policy: DivPolicy::Error,
        }
    }

    pub fn with_div_policy(mut self, policy: DivPolicy) -> Self {
        self.div_policy = policy;
        self
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_input(InputSpec::active("lhs", Shape::Scalar))
            .with_input(InputSpec::active("rhs", Shape::Scalar))
            .with_output(OutputSpec::new("out", Shape::Scalar))
    }
}

impl NodeBehaviour for BinaryOp {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if !ctx.input_valid(0) || !ctx.input_valid(1) {
            return Ok(());
        }
        let lhs = ctx
            .input_value(0)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| NodeError::invalid_input("lhs is not numeric"))?;
        let rhs = ctx
            .input_value(1)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| NodeError::invalid_input("rhs is not numeric"))?;

        let result = match self.op {
            ArithOp::Add => lhs + rhs,
            ArithOp::Subtract => lhs - rhs,
            ArithOp::Multiply => lhs * rhs,
            ArithOp::Divide => {
                if rhs == 0.0 {
                    match self.div_policy {
                        DivPolicy::Error => {
                            return Err(NodeError::new(
                                NodeErrorKind::DivisionByZero,
                                format!("{lhs} / 0"),
                            ))
                        }
                        DivPolicy::Nan => f64::NAN,
                        DivPolicy::Infinity => f64::INFINITY.copysign(lhs),
                        DivPolicy::Drop => return Ok(()),
                        DivPolicy::Zero => 0.0,
                        DivPolicy::One => 1.0,
                    }
                } else {
                    lhs / rhs
                }
            }
        };
        ctx.tick(0, Value::Float(result))
    }
}

/// Unary scalar transform.
pub struct MapScalar {
    f: Box<dyn FnMut(&Value) -> Result<Value, NodeError> + Send>,
}

impl MapScalar {
    pub fn new(f: impl FnMut(&Value) -> Result<Value, NodeError> + Send + 'static) -> Self {
        MapScalar { f: Box::new(f) }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_input(InputSpec::active("in", Shape::Scalar))
            .with_output(OutputSpec::new("out", Shape::Scalar))
    }
}

impl NodeBehaviour for MapScalar {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let Some(value) = ctx.input_value(0) else {
            return Ok(());
        };
        let mapped = (self.f)(&value)?;
        ctx.tick(0, mapped)
    }
}

/// Remembers the previous tick: re-emits each input value one `MIN_TD`
/// later, so consumers see the lagged series.
pub struct LagByOne {
    pending: VecDeque<(EngineTime, Value)>,
}

impl LagByOne {
    pub fn new() -> Self {
        LagByOne {
            pending: VecDeque::new(),
        }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_input(InputSpec::active("in", Shape::Scalar))
            .with_output(OutputSpec::new("out", Shape::Scalar))
            .with_scheduler()
    }
}

impl Default for LagByOne {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeBehaviour for LagByOne {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let at = ctx.engine_time();
        while let Some((due, _)) = self.pending.front() {
            if *due > at {
                break;
            }
            let (_, value) = self.pending.pop_front().expect("non-empty");
            ctx.tick(0, value)?;
        }
        if ctx.input_modified(0) {
            if let Some(value) = ctx.input_value(0) {
                let due = at + MIN_TD;
                self.pending.push_back((due, value));
                ctx.schedule(due, None)?;
            }
        }
        Ok(())
    }
}

/// Follows a reference input: re-binds its value input whenever the
/// reference re-ticks (referent change), and forwards the referent's value
/// ticks. Distinguishes "the referent changed" from "the referent's value
/// changed".
pub struct FollowRef;

impl FollowRef {
    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_input(InputSpec::active("reference", Shape::Scalar))
            .with_input(InputSpec::active("followed", Shape::Scalar))
            .with_output(OutputSpec::new("out", Shape::Scalar))
    }
}

impl NodeBehaviour for FollowRef {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if ctx.input_modified(0) {
            let target = ctx
                .input_value(0)
                .as_ref()
                .and_then(Value::as_ref_value)
                .cloned()
                .ok_or_else(|| NodeError::invalid_input("reference input is not a Ref"))?;
            ctx.rebind_input(1, target.output, target.path)?;
            // Surface the referent's current value immediately on re-bind.
            if let Some(value) = ctx.input_value(1) {
                ctx.tick(0, value)?;
            }
            return Ok(());
        }
        if ctx.input_modified(1) {
            if let Some(value) = ctx.input_value(1) {
                ctx.tick(0, value)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// sinks
// ---------------------------------------------------------------------------

/// Shared recording cell written by sinks and read by tests/harnesses.
pub type Recorded<T> = Arc<Mutex<Vec<(EngineTime, T)>>>;

/// Records every scalar tick on its input.
pub struct CollectSink {
    cells: Recorded<Value>,
}

impl CollectSink {
    pub fn new(cells: Recorded<Value>) -> Self {
        CollectSink { cells }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new().with_input(InputSpec::active("in", Shape::Scalar))
    }
}

impl NodeBehaviour for CollectSink {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if !ctx.input_modified(0) {
            return Ok(());
        }
        if let Some(value) = ctx.input_value(0) {
            self.cells.lock().push((ctx.engine_time(), value));
        }
        Ok(())
    }
}

/// Records a full snapshot of a dict input on every tick.
pub struct DictSnapshotSink {
    cells: Recorded<BTreeMap<Key, Value>>,
}

impl DictSnapshotSink {
    pub fn new(cells: Recorded<BTreeMap<Key, Value>>) -> Self {
        DictSnapshotSink { cells }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new().with_input(InputSpec::active("in", Shape::dict(Shape::Scalar)))
    }
}

impl NodeBehaviour for DictSnapshotSink {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        if !ctx.input_modified(0) {
            return Ok(());
        }
        let Some(dict) = ctx.input_series(0).and_then(|s| s.as_dict()) else {
            return Ok(());
        };
        let snapshot: BTreeMap<Key, Value> = dict
            .iter()
            .filter_map(|(k, v)| Some((k.clone(), v.scalar()?.clone())))
            .collect();
        let at = ctx.engine_time();
        self.cells.lock().push((at, snapshot));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_graph::{GraphBuilder, GraphPath};
    use cascade_time::SimulationClock;

    fn t(ms: i64) -> EngineTime {
        EngineTime::from_millis(ms)
    }

    #[test]
    fn test_vec_replay_restarts() {
        let mut replay = VecReplay::new(vec![(t(1), Value::Int(1)), (t(2), Value::Int(2))]);
        assert_eq!(replay.next(), Some((t(1), Value::Int(1))));
        assert_eq!(replay.next(), Some((t(2), Value::Int(2))));
        assert_eq!(replay.next(), None);
        assert!(replay.restart());
        assert_eq!(replay.next(), Some((t(1), Value::Int(1))));
    }

    #[test]
    fn test_divide_policies() {
        // The policy table, exercised through a tiny graph per policy.
        let cases = [
            (DivPolicy::Nan, Some(f64::NAN)),
            (DivPolicy::Infinity, Some(f64::INFINITY)),
            (DivPolicy::Drop, None),
            (DivPolicy::Zero, Some(0.0)),
            (DivPolicy::One, Some(1.0)),
        ];
        for (policy, expected) in cases {
            let mut b = GraphBuilder::new("div");
            let lhs = b.add_node("lhs", ConstSource::signature(), ConstSource::new(4.0.into()));
            let rhs = b.add_node("rhs", ConstSource::signature(), ConstSource::new(0.0.into()));
            let div = b.add_node(
                "div",
                BinaryOp::signature(),
                BinaryOp::new(ArithOp::Divide).with_div_policy(policy),
            );
            b.connect(lhs, 0, div, 0);
            b.connect(rhs, 0, div, 1);
            let mut graph = b.build(GraphPath::root()).unwrap();
            let mut clock = SimulationClock::new(t(0));
            graph.initialise(&mut clock).unwrap();
            graph.start(&mut clock, &mut []).unwrap();
            graph.evaluate_cycle(&mut clock, &mut []).unwrap();

            let div = graph.node_by_name("div").unwrap();
            let out = graph.output_series(div, 0).unwrap();
            match expected {
                None => assert!(!out.valid(), "{policy:?} must drop the tick"),
                Some(v) if v.is_nan() => {
                    let got = out.scalar().and_then(Value::as_f64).unwrap();
                    assert!(got.is_nan(), "{policy:?}");
                }
                Some(v) => {
                    assert_eq!(out.scalar().and_then(Value::as_f64), Some(v), "{policy:?}");
                }
            }
        }
    }

    #[test]
    fn test_divide_error_policy_is_typed() {
        let mut b = GraphBuilder::new("div-error");
        let lhs = b.add_node("lhs", ConstSource::signature(), ConstSource::new(4.0.into()));
        let rhs = b.add_node("rhs", ConstSource::signature(), ConstSource::new(0.0.into()));
        let div = b.add_node(
            "div",
            BinaryOp::signature(),
            BinaryOp::new(ArithOp::Divide),
        );
        b.connect(lhs, 0, div, 0);
        b.connect(rhs, 0, div, 1);
        let mut graph = b.build(GraphPath::root()).unwrap();
        let mut clock = SimulationClock::new(t(0));
        graph.initialise(&mut clock).unwrap();
        graph.start(&mut clock, &mut []).unwrap();

        let err = graph.evaluate_cycle(&mut clock, &mut []).unwrap_err();
        match err {
            cascade_graph::GraphError::NodeFailed { source, .. } => {
                assert_eq!(source.kind, NodeErrorKind::DivisionByZero);
            }
            other => panic!("expected NodeFailed, got {other}"),
        }
    }
}
