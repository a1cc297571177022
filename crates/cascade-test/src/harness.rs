//! One-call run helpers for scenario tests

use cascade_core::{EngineTime, Value, MIN_TD};
use cascade_graph::{EvaluationObserver, GraphBuilder, GraphPath, GraphView, NodeRef};
use cascade_runtime::{
    ConstSource, GraphExecutor, RunConfig, RunOutcome, RuntimeResult, VecReplay,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Start of the conventional test window.
pub fn t0() -> EngineTime {
    EngineTime::from_secs(1_600_000_000)
}

/// Instants `n` tick-granules after `t0`, for per-cycle feeds.
pub fn t0_plus_ticks(n: u32) -> EngineTime {
    let mut t = t0();
    for _ in 0..n {
        t = t.next_cycle();
    }
    t
}

/// Run a built graph in simulation over `[t0, t0 + 1h]`.
pub fn run_simulation(builder: GraphBuilder) -> RuntimeResult<RunOutcome> {
    run_simulation_window(builder, t0(), t0() + std::time::Duration::from_secs(3600))
}

pub fn run_simulation_window(
    builder: GraphBuilder,
    start: EngineTime,
    end: EngineTime,
) -> RuntimeResult<RunOutcome> {
    let graph = builder.build(GraphPath::root())?;
    let executor = GraphExecutor::new(graph, RunConfig::simulation(start, end));
    executor.run()
}

/// Add a constant scalar source node.
pub fn const_node(builder: &mut GraphBuilder, name: &str, value: impl Into<Value>) -> NodeRef {
    builder.add_node(name, ConstSource::signature(), ConstSource::new(value.into()))
}

/// A replay feed delivering one value per cycle starting at `t0`.
pub fn per_cycle_feed(values: &[Value]) -> VecReplay {
    VecReplay::new(
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (t0_plus_ticks(i as u32), v.clone()))
            .collect(),
    )
}

/// Observer capturing each cycle's evaluation time, for ordering checks.
#[derive(Clone, Default)]
pub struct CycleTimes {
    times: Arc<Mutex<Vec<EngineTime>>>,
}

impl CycleTimes {
    pub fn new() -> Self {
        CycleTimes::default()
    }

    pub fn observer(&self) -> Box<dyn EvaluationObserver> {
        Box::new(CycleTimesObserver {
            times: self.times.clone(),
        })
    }

    pub fn times(&self) -> Vec<EngineTime> {
        self.times.lock().clone()
    }

    /// Every consecutive pair of distinct cycles is at least `MIN_TD` apart.
    pub fn assert_monotonic(&self) {
        let times = self.times();
        for pair in times.windows(2) {
            assert!(
                pair[1] >= pair[0] + MIN_TD,
                "cycles {:?} and {:?} violate monotonicity",
                pair[0],
                pair[1]
            );
        }
    }
}

struct CycleTimesObserver {
    times: Arc<Mutex<Vec<EngineTime>>>,
}

impl EvaluationObserver for CycleTimesObserver {
    fn before_graph_evaluation(&mut self, _graph: &GraphView<'_>, at: EngineTime) {
        self.times.lock().push(at);
    }
}
