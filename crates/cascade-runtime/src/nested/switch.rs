//! Type-switch construct
//!
//! At most one child graph lives at a time, chosen by the current value of
//! the key input. A key change stops and disposes the old child and builds
//! and starts the new one. If the fresh child does not re-tick the output in
//! the cycle it takes over, the stale previous value is invalidated rather
//! than left visible.

use cascade_core::{Key, NodeError, Shape, Value};
use cascade_graph::{InputSpec, NodeBehaviour, NodeContext, NodeSignature, OutputSpec};

use super::{child_failure, ChildGraph, KeyedTemplate};

pub struct SwitchNode {
    template: KeyedTemplate,
    /// Rebuild the child on every key tick, not only on change.
    reload_on_tick: bool,
    current: Option<(Key, ChildGraph)>,
    next_slot: u32,
}

impl SwitchNode {
    pub fn new(template: KeyedTemplate) -> Self {
        SwitchNode {
            template,
            reload_on_tick: false,
            current: None,
            next_slot: 0,
        }
    }

    pub fn with_reload_on_tick(mut self) -> Self {
        self.reload_on_tick = true;
        self
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_input(InputSpec::active("key", Shape::Scalar))
            .with_output(OutputSpec::new("out", Shape::Scalar))
            .with_scheduler()
    }

    pub fn current_key(&self) -> Option<&Key> {
        self.current.as_ref().map(|(k, _)| k)
    }
}

impl NodeBehaviour for SwitchNode {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let at = ctx.engine_time();
        let mut switched = false;

        if ctx.input_modified(0) {
            let key = ctx
                .input_value(0)
                .as_ref()
                .and_then(Value::to_key)
                .ok_or_else(|| NodeError::invalid_input("switch key is not hashable"))?;
            let key_changed = self.current_key() != Some(&key);
            if key_changed || self.reload_on_tick {
                if let Some((old_key, old_child)) = self.current.take() {
                    tracing::debug!(key = %old_key, "switch: tearing down child");
                    old_child.shutdown();
                }
                tracing::debug!(key = %key, "switch: building child");
                let builder = (self.template)(&key);
                let path = ctx.graph_path().child(self.next_slot);
                self.next_slot += 1;
                let child =
                    ChildGraph::build_started(builder, path, at).map_err(child_failure)?;
                self.current = Some((key, child));
                switched = true;
            }
        }

        let mut ticked = false;
        if let Some((_, child)) = self.current.as_mut() {
            if child.run_due(at).map_err(child_failure)? {
                if let Some(value) = child.sink_tick(at) {
                    ticked = true;
                    ctx.tick(0, value)?;
                }
            }
            let next = child.next_time();
            if next != cascade_core::EngineTime::NEVER {
                ctx.schedule(next.max(at.next_cycle()), Some("child"))?;
            }
        }

        // The new graph did not immediately re-tick: drop the previous
        // graph's value rather than leaving it stale.
        if switched && !ticked {
            ctx.invalidate_output(0)?;
        }
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut NodeContext<'_>) {
        if let Some((_, child)) = self.current.as_mut() {
            if let Err(err) = child.stop() {
                tracing::warn!(error = %err, "switch: child stop failed");
            }
        }
    }

    fn start(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let at = ctx.engine_time();
        if let Some((_, child)) = self.current.as_mut() {
            if child.graph.state() == cascade_graph::LifecycleState::Stopped {
                child.start(at).map_err(child_failure)?;
            }
        }
        Ok(())
    }

    fn dispose(&mut self) {
        if let Some((_, child)) = self.current.take() {
            child.shutdown();
        }
    }
}
