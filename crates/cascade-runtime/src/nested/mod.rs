//! Dynamic nested-graph constructs
//!
//! Map, switch, mesh, and try/except all follow one pattern: a node whose
//! behaviour owns child graphs, mirrors the parent's evaluation time into
//! each child's nested clock, runs due children during its own evaluation,
//! and re-schedules itself for whatever the children want next. Children are
//! initialised/started when created and stopped/disposed when torn down -
//! only ever by the construct that built them.

mod guard;
mod map;
mod mesh;
mod switch;

pub use guard::*;
pub use map::*;
pub use mesh::*;
pub use switch::*;

use std::sync::Arc;

use cascade_core::{EngineTime, Key, NodeError, TsValue, Value};
use cascade_graph::{Graph, GraphBuilder, GraphError, GraphPath};
use cascade_time::NestedClock;

/// Builds the child graph for one key of a keyed construct.
pub type KeyedTemplate = Arc<dyn Fn(&Key) -> GraphBuilder + Send + Sync>;

/// Builds the single child graph of a wrapping construct.
pub type GraphTemplate = Arc<dyn Fn() -> GraphBuilder + Send + Sync>;

/// Translate a child-graph failure into a node error on the construct, so
/// the ordinary capture rules (error outputs, try/except, fatal abort)
/// apply to nested evaluation too.
pub(crate) fn child_failure(err: GraphError) -> NodeError {
    match err {
        GraphError::NodeFailed { source, .. } => source,
        other => NodeError::evaluation(other.to_string()),
    }
}

/// One owned child graph plus its nested clock.
pub(crate) struct ChildGraph {
    pub(crate) graph: Graph,
    clock: NestedClock,
}

impl ChildGraph {
    /// Build, initialise, and start a child at the parent's current instant.
    pub(crate) fn build_started(
        builder: GraphBuilder,
        path: GraphPath,
        at: EngineTime,
    ) -> Result<Self, GraphError> {
        let mut graph = builder.build(path)?;
        let mut clock = NestedClock::new();
        clock.set_from_parent(at);
        graph.initialise(&mut clock)?;
        graph.start(&mut clock, &mut [])?;
        Ok(ChildGraph { graph, clock })
    }

    /// Feed a parent-side value into the child's boundary source.
    pub(crate) fn seed(&mut self, value: Value, at: EngineTime) -> Result<(), GraphError> {
        if let Some(source) = self.graph.boundary_source() {
            self.graph.tick_value(source, 0, value, at)?;
        }
        Ok(())
    }

    /// When the child next wants to run, `NEVER` if idle.
    pub(crate) fn next_time(&self) -> EngineTime {
        self.graph.next_scheduled_time()
    }

    /// Run one child cycle at the parent's instant if anything is due.
    /// Returns whether a cycle ran.
    pub(crate) fn run_due(&mut self, at: EngineTime) -> Result<bool, GraphError> {
        if self.graph.next_scheduled_time() > at {
            return Ok(false);
        }
        self.clock.set_from_parent(at);
        self.graph.evaluate_cycle(&mut self.clock, &mut [])?;
        Ok(true)
    }

    pub(crate) fn sink_series(&self) -> Option<&TsValue> {
        let (node, output) = self.graph.boundary_sink()?;
        self.graph.output_series(node, output).ok()
    }

    /// The boundary sink's scalar value, if it ticked at `at`.
    pub(crate) fn sink_tick(&self, at: EngineTime) -> Option<Value> {
        let series = self.sink_series()?;
        if !series.modified(at) {
            return None;
        }
        series.scalar().cloned()
    }

    pub(crate) fn stop(&mut self) -> Result<(), GraphError> {
        self.graph.stop(&mut self.clock, &mut [])
    }

    pub(crate) fn start(&mut self, at: EngineTime) -> Result<(), GraphError> {
        self.clock.set_from_parent(at);
        self.graph.start(&mut self.clock, &mut [])
    }

    /// Stop (if running) and dispose; the construct owns this child, so it
    /// is the one place the child is ever torn down.
    pub(crate) fn shutdown(mut self) {
        use cascade_graph::LifecycleState;
        if self.graph.state() == LifecycleState::Started {
            if let Err(err) = self.graph.stop(&mut self.clock, &mut []) {
                tracing::warn!(graph = %self.graph.label(), error = %err, "child stop failed");
            }
        }
        self.graph.dispose();
    }
}
