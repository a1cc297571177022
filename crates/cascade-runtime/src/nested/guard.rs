//! Try/except construct
//!
//! Wraps exactly one nested graph. The child's nodes evaluate exactly as in
//! a plain cycle; any node failure escaping that cycle is converted into a
//! typed error value on the construct's `error` output instead of
//! propagating, and the enclosing graph keeps running.

use std::sync::Arc;

use cascade_core::{NodeError, Shape, Value};
use cascade_graph::{NodeBehaviour, NodeContext, NodeSignature, OutputSpec};

use super::{child_failure, ChildGraph, GraphTemplate};

pub struct GuardNode {
    template: GraphTemplate,
    child: Option<ChildGraph>,
    next_slot: u32,
    /// A failed child is torn down; the guard goes quiet afterwards.
    failed: bool,
}

impl GuardNode {
    pub fn new(template: GraphTemplate) -> Self {
        GuardNode {
            template,
            child: None,
            next_slot: 0,
            failed: false,
        }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_output(OutputSpec::new("out", Shape::Scalar))
            .with_output(OutputSpec::new("error", Shape::Scalar))
            .with_scheduler()
    }
}

impl NodeBehaviour for GuardNode {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let at = ctx.engine_time();
        match self.child.as_mut() {
            None => {
                let builder = (self.template)();
                let path = ctx.graph_path().child(self.next_slot);
                self.next_slot += 1;
                let child =
                    ChildGraph::build_started(builder, path, at).map_err(child_failure)?;
                self.child = Some(child);
            }
            Some(child) => {
                if child.graph.state() == cascade_graph::LifecycleState::Stopped {
                    child.start(at).map_err(child_failure)?;
                }
            }
        }
        if let Some(child) = &self.child {
            let next = child.next_time();
            if next != cascade_core::EngineTime::NEVER {
                ctx.schedule(next.max(at), Some("child"))?;
            }
        }
        Ok(())
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let at = ctx.engine_time();
        let Some(child) = self.child.as_mut() else {
            return Ok(());
        };
        if self.failed {
            return Ok(());
        }
        match child.run_due(at) {
            Ok(ran) => {
                if ran {
                    if let Some(value) = child.sink_tick(at) {
                        ctx.tick(0, value)?;
                    }
                }
                let next = child.next_time();
                if next != cascade_core::EngineTime::NEVER {
                    ctx.schedule(next.max(at.next_cycle()), Some("child"))?;
                }
            }
            Err(err) => {
                // Convert the child's failure into an ordinary value on the
                // error output; the enclosing graph is untouched.
                let captured = child_failure(err);
                tracing::warn!(error = %captured, "guard: captured nested failure");
                self.failed = true;
                if let Some(child) = self.child.take() {
                    child.shutdown();
                }
                ctx.tick(1, Value::Error(Arc::new(captured)))?;
            }
        }
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut NodeContext<'_>) {
        if let Some(child) = self.child.as_mut() {
            if let Err(err) = child.stop() {
                tracing::warn!(error = %err, "guard: child stop failed");
            }
        }
    }

    fn dispose(&mut self) {
        if let Some(child) = self.child.take() {
            child.shutdown();
        }
    }
}
