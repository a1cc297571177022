//! Keyed map construct
//!
//! One child graph per key of a dict-shaped input. Keys added instantiate,
//! initialise, and start a child wired to that key's slice of the input;
//! keys removed stop, unwire, and dispose it. The construct's own output is
//! a dict of the children's sink values.

use std::collections::BTreeMap;

use cascade_core::{ElementPath, Key, NodeError, Shape, Value};
use cascade_graph::{InputSpec, NodeBehaviour, NodeContext, NodeSignature, OutputSpec};

use super::{child_failure, ChildGraph, KeyedTemplate};

pub struct MapNode {
    template: KeyedTemplate,
    children: BTreeMap<Key, ChildGraph>,
    next_slot: u32,
}

impl MapNode {
    pub fn new(template: KeyedTemplate) -> Self {
        MapNode {
            template,
            children: BTreeMap::new(),
            next_slot: 0,
        }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_input(InputSpec::active("keys", Shape::dict(Shape::Scalar)))
            .with_output(OutputSpec::new("out", Shape::dict(Shape::Scalar)))
            .with_scheduler()
    }

    pub fn active_keys(&self) -> impl Iterator<Item = &Key> {
        self.children.keys()
    }
}

impl NodeBehaviour for MapNode {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let at = ctx.engine_time();

        // Snapshot this cycle's key-set changes before touching children.
        let (added, removed, updated) = match ctx.input_series(0).and_then(|s| s.as_dict()) {
            Some(dict) => {
                let added: Vec<(Key, Option<Value>)> = dict
                    .added(at)
                    .into_iter()
                    .map(|k| {
                        let v = dict.get(&k).and_then(|e| e.scalar().cloned());
                        (k, v)
                    })
                    .collect();
                let updated: Vec<(Key, Option<Value>)> = dict
                    .modified_keys(at)
                    .into_iter()
                    .map(|k| {
                        let v = dict.get(&k).and_then(|e| e.scalar().cloned());
                        (k, v)
                    })
                    .collect();
                (added, dict.removed(at), updated)
            }
            None => (Vec::new(), Vec::new(), Vec::new()),
        };

        for key in removed {
            if let Some(child) = self.children.remove(&key) {
                tracing::debug!(key = %key, "map: tearing down child");
                child.shutdown();
            }
            ctx.remove_key(0, ElementPath::key(key))?;
        }

        for (key, value) in added.into_iter().chain(updated) {
            if !self.children.contains_key(&key) {
                tracing::debug!(key = %key, "map: creating child");
                let builder = (self.template)(&key);
                let path = ctx.graph_path().child(self.next_slot);
                self.next_slot += 1;
                let child =
                    ChildGraph::build_started(builder, path, at).map_err(child_failure)?;
                self.children.insert(key.clone(), child);
            }
            if let (Some(child), Some(value)) = (self.children.get_mut(&key), value) {
                child.seed(value, at).map_err(child_failure)?;
            }
        }

        // Run whichever children are due at this instant and surface their
        // sink ticks on the keyed output.
        let mut ticks: Vec<(Key, Value)> = Vec::new();
        for (key, child) in self.children.iter_mut() {
            if child.run_due(at).map_err(child_failure)? {
                if let Some(value) = child.sink_tick(at) {
                    ticks.push((key.clone(), value));
                }
            }
        }
        for (key, value) in ticks {
            ctx.tick_path(0, ElementPath::key(key), value)?;
        }

        // Adopt the children's future work as our own schedule.
        let next = self
            .children
            .values()
            .map(ChildGraph::next_time)
            .min()
            .unwrap_or(cascade_core::EngineTime::NEVER);
        if next != cascade_core::EngineTime::NEVER {
            ctx.schedule(next.max(at.next_cycle()), Some("children"))?;
        }
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut NodeContext<'_>) {
        for child in self.children.values_mut() {
            if let Err(err) = child.stop() {
                tracing::warn!(error = %err, "map: child stop failed");
            }
        }
    }

    fn start(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        // Children exist only after the first key tick, except across a
        // stop/start pair.
        let at = ctx.engine_time();
        for child in self.children.values_mut() {
            if child.graph.state() == cascade_graph::LifecycleState::Stopped {
                child.start(at).map_err(child_failure)?;
            }
        }
        Ok(())
    }

    fn dispose(&mut self) {
        for (_, child) in std::mem::take(&mut self.children) {
            child.shutdown();
        }
    }
}
