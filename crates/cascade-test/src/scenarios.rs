//! End-to-end scenario suite
//!
//! Whole-stack checks driving built graphs through the executor:
//! - literal pipeline scenarios (add, lag, dict coalescing, map, mesh,
//!   try/except)
//! - real-time behaviour (push ordering, wall alarms, cooperative stop)
//! - cross-cutting invariants (cycle monotonicity, reference following,
//!   switch invalidation)

use std::sync::Arc;

use cascade_core::{Key, Value};
use cascade_graph::GraphBuilder;
use cascade_runtime::{
    ArithOp, BinaryOp, CollectSink, ConstSource, DictPatch, DictReplaySource, DictSnapshotSink,
    GuardNode, MapNode, MapScalar, MeshHandle, MeshLookup, MeshNode, SlotSource,
};

use crate::harness::const_node;
use crate::recorder::DictRecorder;

/// The `+1` child used by map scenarios: slot -> increment -> sink.
pub fn increment_template(_key: &Key) -> GraphBuilder {
    let mut b = GraphBuilder::new("plus-one");
    let slot = b.add_node("slot", SlotSource::signature(), SlotSource);
    let inc = b.add_node(
        "inc",
        MapScalar::signature(),
        MapScalar::new(|v| {
            v.as_i64()
                .map(|i| Value::Int(i + 1))
                .ok_or_else(|| cascade_core::NodeError::invalid_input("expected an int"))
        }),
    );
    b.connect(slot, 0, inc, 0);
    b.mark_source(slot);
    b.mark_sink(inc, 0);
    b
}

/// The recursive fibonacci child used by mesh scenarios.
pub fn fib_template(key: &Key, mesh: &MeshHandle) -> GraphBuilder {
    let n = key.as_int().expect("fib keys are ints");
    let mut b = GraphBuilder::new("fib");
    if n <= 1 {
        let base = b.add_node(
            "base",
            ConstSource::signature(),
            ConstSource::new(Value::Int(n)),
        );
        b.mark_sink(base, 0);
    } else {
        let prev = b.add_node(
            "prev",
            MeshLookup::signature(),
            mesh.lookup(key.clone(), Key::Int(n - 1)),
        );
        let prev2 = b.add_node(
            "prev2",
            MeshLookup::signature(),
            mesh.lookup(key.clone(), Key::Int(n - 2)),
        );
        let add = b.add_node("add", BinaryOp::signature(), BinaryOp::new(ArithOp::Add));
        b.connect(prev, 0, add, 0);
        b.connect(prev2, 0, add, 1);
        b.mark_sink(add, 0);
    }
    b
}

/// A map construct over an upstream dict source, with both recorders wired.
pub fn map_pipeline(
    patches: Vec<(cascade_core::EngineTime, DictPatch)>,
    recorder: &DictRecorder,
) -> GraphBuilder {
    let mut b = GraphBuilder::new("map-scenario");
    let keys = b.add_node(
        "keys",
        DictReplaySource::signature(),
        DictReplaySource::new(patches),
    );
    let map = b.add_node(
        "map",
        MapNode::signature(),
        MapNode::new(Arc::new(increment_template)),
    );
    let sink = b.add_node("sink", DictSnapshotSink::signature(), recorder.sink());
    b.connect(keys, 0, map, 0);
    b.connect(map, 0, sink, 0);
    b
}

/// Divide-by-zero child graph for the try/except scenario.
pub fn div_zero_template() -> GraphBuilder {
    let mut b = GraphBuilder::new("div-zero");
    let lhs = const_node(&mut b, "lhs", 1.0);
    let rhs = const_node(&mut b, "rhs", 0.0);
    let div = b.add_node("div", BinaryOp::signature(), BinaryOp::new(ArithOp::Divide));
    b.connect(lhs, 0, div, 0);
    b.connect(rhs, 0, div, 1);
    b.mark_sink(div, 0);
    b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{per_cycle_feed, run_simulation, t0, t0_plus_ticks, CycleTimes};
    use crate::recorder::Recorder;
    use cascade_core::{EngineTime, NodeErrorKind};
    use cascade_graph::{GraphError, GraphPath};
    use cascade_runtime::{
        push_queue, FollowRef, GraphExecutor, LagByOne, PushPolicy, PushSource, ReplaySource,
        RunConfig, RuntimeError, SetPatch, SetReplaySource, SwitchNode, VecReplay,
    };
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

    fn wall_now() -> EngineTime {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock after epoch")
            .as_micros() as i64;
        EngineTime::from_micros(micros)
    }

    // -- scenario 1: scalar add --------------------------------------------

    #[test]
    fn test_scalar_add_one_cycle() {
        let recorder = Recorder::new();
        let mut b = GraphBuilder::new("scalar-add");
        let one = const_node(&mut b, "one", 1.0);
        let two = const_node(&mut b, "two", 2.0);
        let add = b.add_node("add", BinaryOp::signature(), BinaryOp::new(ArithOp::Add));
        let sink = b.add_node("sink", CollectSink::signature(), recorder.sink());
        b.connect(one, 0, add, 0);
        b.connect(two, 0, add, 1);
        b.connect(add, 0, sink, 0);

        run_simulation(b).unwrap();

        assert_eq!(recorder.entries(), vec![(t0(), Value::Float(3.0))]);
    }

    // -- scenario 2: lag by one --------------------------------------------

    #[test]
    fn test_lag_by_one_cycle_delay() {
        let recorder = Recorder::new();
        let mut b = GraphBuilder::new("lag");
        let values: Vec<Value> = (1..=5).map(Value::Int).collect();
        let src = b.add_node(
            "src",
            ReplaySource::signature(),
            ReplaySource::new(per_cycle_feed(&values)),
        );
        let lag = b.add_node("lag", LagByOne::signature(), LagByOne::new());
        let sink = b.add_node("sink", CollectSink::signature(), recorder.sink());
        b.connect(src, 0, lag, 0);
        b.connect(lag, 0, sink, 0);

        run_simulation(b).unwrap();

        // Nothing at the first input cycle, then each value one MIN_TD
        // behind the input that carried it.
        let expected: Vec<(EngineTime, Value)> = (1..=5)
            .map(|i| (t0_plus_ticks(i as u32), Value::Int(i)))
            .collect();
        assert_eq!(recorder.entries(), expected);
        assert!(recorder.times().iter().all(|&t| t > t0()));
    }

    // -- scenario 3: dict removal coalescing -------------------------------

    #[test]
    fn test_dict_add_remove_same_cycle_is_invisible() {
        let mut b = GraphBuilder::new("dict-churn");
        let src = b.add_node(
            "src",
            DictReplaySource::signature(),
            DictReplaySource::new(vec![(
                t0(),
                DictPatch::default().insert("a", Value::Int(1)).remove("a"),
            )]),
        );
        let recorder = DictRecorder::new();
        let sink = b.add_node("sink", DictSnapshotSink::signature(), recorder.sink());
        b.connect(src, 0, sink, 0);

        let outcome = run_simulation(b).unwrap();

        let src = outcome.graph.node_by_name("src").unwrap();
        let series = outcome.graph.output_series(src, 0).unwrap();
        let dict = series.as_dict().unwrap();
        assert!(!dict.contains(&Key::str("a")));
        assert!(dict.added(t0()).is_empty());
        assert!(dict.removed(t0()).is_empty());
        assert_eq!(series.delta(t0()), None);
    }

    // -- scenario 4: map over a keyed dict ---------------------------------

    #[test]
    fn test_map_increments_each_key() {
        let recorder = DictRecorder::new();
        let patches = vec![
            (
                t0(),
                DictPatch::default()
                    .insert("x", Value::Int(1))
                    .insert("y", Value::Int(2)),
            ),
            (t0_plus_ticks(1), DictPatch::default().insert("x", Value::Int(10))),
            (t0_plus_ticks(2), DictPatch::default().remove("y")),
        ];
        let b = map_pipeline(patches, &recorder);

        run_simulation(b).unwrap();

        let snapshots = recorder.snapshots();
        assert_eq!(snapshots.len(), 3);

        let full: Vec<(Key, Value)> = snapshots[0].1.clone().into_iter().collect();
        assert_eq!(
            full,
            vec![
                (Key::str("x"), Value::Int(2)),
                (Key::str("y"), Value::Int(3)),
            ]
        );

        // Incremental per-key update afterwards.
        assert_eq!(snapshots[1].1.get(&Key::str("x")), Some(&Value::Int(11)));
        assert_eq!(snapshots[1].1.get(&Key::str("y")), Some(&Value::Int(3)));

        // Key removal tears the child down and tombstones the output.
        assert!(!snapshots[2].1.contains_key(&Key::str("y")));
    }

    // -- scenario 5: recursive mesh ----------------------------------------

    #[test]
    fn test_mesh_fibonacci_memoized() {
        let mut b = GraphBuilder::new("mesh-fib");
        let keys = b.add_node(
            "keys",
            SetReplaySource::signature(),
            SetReplaySource::new(vec![(t0(), SetPatch::default().insert(7i64))]),
        );
        let mesh = b.add_node("mesh", MeshNode::signature(), MeshNode::new(fib_template));
        b.connect(keys, 0, mesh, 0);

        let outcome = run_simulation(b).unwrap();

        let mesh = outcome.graph.node_by_name("mesh").unwrap();
        let dict = outcome
            .graph
            .output_series(mesh, 0)
            .unwrap()
            .as_dict()
            .unwrap();

        // fib(7) plus every transitive key it demanded.
        assert_eq!(
            dict.get(&Key::Int(7)).and_then(|v| v.scalar()).cloned(),
            Some(Value::Float(13.0))
        );
        for n in 0..=7i64 {
            assert!(dict.contains(&Key::Int(n)), "missing memoized key {n}");
        }
    }

    #[test]
    fn test_mesh_self_dependency_fails_fast() {
        let mut b = GraphBuilder::new("mesh-loop");
        let keys = b.add_node(
            "keys",
            SetReplaySource::signature(),
            SetReplaySource::new(vec![(t0(), SetPatch::default().insert(0i64))]),
        );
        let mesh = b.add_node(
            "mesh",
            MeshNode::signature(),
            MeshNode::new(|key: &Key, mesh: &MeshHandle| {
                let mut b = GraphBuilder::new("self-loop");
                let lookup = b.add_node(
                    "self",
                    MeshLookup::signature(),
                    mesh.lookup(key.clone(), key.clone()),
                );
                b.mark_sink(lookup, 0);
                b
            }),
        );
        b.connect(keys, 0, mesh, 0);

        let err = run_simulation(b).unwrap_err();
        match err {
            RuntimeError::Graph(GraphError::NodeFailed { source, .. }) => {
                assert_eq!(source.kind, NodeErrorKind::DependencyCycle);
            }
            other => panic!("expected a dependency-cycle failure, got {other}"),
        }
    }

    // -- scenario 6: try/except --------------------------------------------

    #[test]
    fn test_guard_captures_divide_by_zero() {
        let recorder = Recorder::new();
        let mut b = GraphBuilder::new("guarded");
        let guard = b.add_node(
            "guard",
            GuardNode::signature(),
            GuardNode::new(Arc::new(div_zero_template)),
        );
        let sink = b.add_node("errors", CollectSink::signature(), recorder.sink());
        b.connect(guard, 1, sink, 0);

        // The enclosing graph finishes normally.
        run_simulation(b).unwrap();

        let captured = recorder.last().expect("an error value was delivered");
        let err = captured.as_error().expect("scalar carries a NodeError");
        assert_eq!(err.kind, NodeErrorKind::DivisionByZero);
        assert_eq!(err.node, "div");
    }

    // -- reference indirection ---------------------------------------------

    #[test]
    fn test_reference_follow_and_value_ticks() {
        use cascade_runtime::RefSource;

        let recorder = Recorder::new();
        let mut b = GraphBuilder::new("refs");
        let _target = b.add_node(
            "target",
            ReplaySource::signature(),
            ReplaySource::new(VecReplay::new(vec![
                (t0(), Value::Float(1.0)),
                (t0_plus_ticks(1), Value::Float(5.0)),
            ])),
        );
        let reference = b.add_node("ref", RefSource::signature(), RefSource::new("target", 0));
        let follow = b.add_node("follow", FollowRef::signature(), FollowRef);
        let sink = b.add_node("sink", CollectSink::signature(), recorder.sink());
        b.connect(reference, 0, follow, 0);
        b.connect(follow, 0, sink, 0);

        run_simulation(b).unwrap();

        // First tick on re-bind, second from the referent's own value tick.
        assert_eq!(
            recorder.entries(),
            vec![
                (t0(), Value::Float(1.0)),
                (t0_plus_ticks(1), Value::Float(5.0)),
            ]
        );
    }

    // -- switch invalidation -----------------------------------------------

    #[test]
    fn test_switch_invalidates_stale_output() {
        let recorder = Recorder::new();
        let mut b = GraphBuilder::new("switch");
        let keys = b.add_node(
            "key",
            ReplaySource::signature(),
            ReplaySource::new(VecReplay::new(vec![
                (t0(), Value::str("live")),
                (t0_plus_ticks(1), Value::str("silent")),
            ])),
        );
        let switch = b.add_node(
            "switch",
            SwitchNode::signature(),
            SwitchNode::new(Arc::new(|key: &Key| {
                let mut b = GraphBuilder::new("switched");
                if key == &Key::str("live") {
                    let c = const_node(&mut b, "value", 42.0);
                    b.mark_sink(c, 0);
                } else {
                    // Never ticks its sink.
                    let slot = b.add_node("slot", SlotSource::signature(), SlotSource);
                    b.mark_sink(slot, 0);
                }
                b
            })),
        );
        let sink = b.add_node("sink", CollectSink::signature(), recorder.sink());
        b.connect(keys, 0, switch, 0);
        b.connect(switch, 0, sink, 0);

        let outcome = run_simulation(b).unwrap();

        assert_eq!(recorder.entries(), vec![(t0(), Value::Float(42.0))]);
        let switch = outcome.graph.node_by_name("switch").unwrap();
        let out = outcome.graph.output_series(switch, 0).unwrap();
        // The silent child never re-ticked, so the 42.0 was invalidated
        // rather than left stale.
        assert!(!out.valid());
    }

    // -- monotonic cycle times ---------------------------------------------

    #[test]
    fn test_cycle_times_strictly_monotonic() {
        let cycles = CycleTimes::new();
        let recorder = Recorder::new();
        let mut b = GraphBuilder::new("monotonic");
        let values: Vec<Value> = (1..=20).map(Value::Int).collect();
        let src = b.add_node(
            "src",
            ReplaySource::signature(),
            ReplaySource::new(per_cycle_feed(&values)),
        );
        let lag = b.add_node("lag", LagByOne::signature(), LagByOne::new());
        let sink = b.add_node("sink", CollectSink::signature(), recorder.sink());
        b.connect(src, 0, lag, 0);
        b.connect(lag, 0, sink, 0);

        let graph = b.build(GraphPath::root()).unwrap();
        let mut executor = GraphExecutor::new(
            graph,
            RunConfig::simulation(t0(), t0() + Duration::from_secs(60)),
        );
        executor.add_observer(cycles.observer());
        executor.run().unwrap();

        cycles.assert_monotonic();
        assert!(cycles.times().len() >= 20);
    }

    // -- real-time behaviour ------------------------------------------------

    #[test]
    fn test_realtime_push_delivery_in_order() {
        let (tx, rx) = push_queue(PushPolicy::Sequential);
        let recorder = Recorder::new();
        let mut b = GraphBuilder::new("rt-push");
        let src = b.add_node("push", PushSource::signature(), PushSource::new(rx.clone()));
        let sink = b.add_node("sink", CollectSink::signature(), recorder.sink());
        b.connect(src, 0, sink, 0);

        let start = wall_now();
        let graph = b.build(GraphPath::root()).unwrap();
        let mut executor = GraphExecutor::new(
            graph,
            RunConfig::realtime(start, start + Duration::from_millis(500)),
        );
        let push_node = executor.graph().node_by_name("push").unwrap();
        executor.attach_push(push_node, &rx);

        let producer = std::thread::spawn(move || {
            for i in 1..=3i64 {
                std::thread::sleep(Duration::from_millis(20));
                tx.send(Value::Int(i));
            }
        });

        executor.run().unwrap();
        producer.join().unwrap();

        assert_eq!(
            recorder.values(),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
        let times = recorder.times();
        assert!(times.windows(2).all(|w| w[1] > w[0]));
    }

    #[test]
    fn test_realtime_stop_handle_halts_run() {
        let recorder = Recorder::new();
        let mut b = GraphBuilder::new("rt-stop");
        let src = const_node(&mut b, "src", 1.0);
        let sink = b.add_node("sink", CollectSink::signature(), recorder.sink());
        b.connect(src, 0, sink, 0);

        let start = wall_now();
        let graph = b.build(GraphPath::root()).unwrap();
        let executor = GraphExecutor::new(
            graph,
            RunConfig::realtime(start, start + Duration::from_secs(60)),
        );
        let stop = executor.stop_handle();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            stop.request_stop();
        });

        let began = Instant::now();
        executor.run().unwrap();
        stopper.join().unwrap();

        assert!(began.elapsed() < Duration::from_secs(10));
        assert_eq!(recorder.values(), vec![Value::Float(1.0)]);
    }

    #[test]
    fn test_realtime_wall_alarm_wakes_node() {
        use cascade_core::NodeError;
        use cascade_graph::{NodeBehaviour, NodeContext, NodeSignature, OutputSpec};
        use cascade_core::Shape;

        /// Ticks once when its wall-clock alarm fires.
        struct AlarmOnce;

        impl AlarmOnce {
            fn signature() -> NodeSignature {
                NodeSignature::new()
                    .with_output(OutputSpec::new("out", Shape::Scalar))
                    .with_scheduler()
                    .with_clock()
            }
        }

        impl NodeBehaviour for AlarmOnce {
            fn start(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
                ctx.schedule_wall(Duration::from_millis(40), "wake")
            }

            fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
                ctx.tick(0, Value::Int(1))
            }
        }

        let recorder = Recorder::new();
        let mut b = GraphBuilder::new("rt-alarm");
        let src = b.add_node("alarm", AlarmOnce::signature(), AlarmOnce);
        let sink = b.add_node("sink", CollectSink::signature(), recorder.sink());
        b.connect(src, 0, sink, 0);

        let start = wall_now();
        let graph = b.build(GraphPath::root()).unwrap();
        let executor = GraphExecutor::new(
            graph,
            RunConfig::realtime(start, start + Duration::from_millis(400)),
        );
        executor.run().unwrap();

        assert_eq!(recorder.values(), vec![Value::Int(1)]);
    }

    // -- elided and batched push policies -----------------------------------

    #[test]
    fn test_push_elide_drops_intermediate_values() {
        let (tx, rx) = push_queue(PushPolicy::Elide);
        tx.send(Value::Int(1));
        tx.send(Value::Int(2));
        tx.send(Value::Int(3));

        let recorder = Recorder::new();
        let mut b = GraphBuilder::new("elide");
        let src = b.add_node("push", PushSource::signature(), PushSource::new(rx.clone()));
        let sink = b.add_node("sink", CollectSink::signature(), recorder.sink());
        b.connect(src, 0, sink, 0);

        let graph = b.build(GraphPath::root()).unwrap();
        let mut executor = GraphExecutor::new(
            graph,
            RunConfig::simulation(t0(), t0() + Duration::from_secs(1)),
        );
        let push_node = executor.graph().node_by_name("push").unwrap();
        executor.attach_push(push_node, &rx);
        executor.run().unwrap();

        assert_eq!(recorder.values(), vec![Value::Int(3)]);
    }

    #[test]
    fn test_push_sequential_spreads_across_cycles() {
        let (tx, rx) = push_queue(PushPolicy::Sequential);
        tx.send(Value::Int(1));
        tx.send(Value::Int(2));

        let recorder = Recorder::new();
        let mut b = GraphBuilder::new("sequential");
        let src = b.add_node("push", PushSource::signature(), PushSource::new(rx.clone()));
        let sink = b.add_node("sink", CollectSink::signature(), recorder.sink());
        b.connect(src, 0, sink, 0);

        let graph = b.build(GraphPath::root()).unwrap();
        let mut executor = GraphExecutor::new(
            graph,
            RunConfig::simulation(t0(), t0() + Duration::from_secs(1)),
        );
        let push_node = executor.graph().node_by_name("push").unwrap();
        executor.attach_push(push_node, &rx);
        executor.run().unwrap();

        let entries = recorder.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1, Value::Int(1));
        assert_eq!(entries[1].1, Value::Int(2));
        assert!(entries[1].0 > entries[0].0);
    }
}
