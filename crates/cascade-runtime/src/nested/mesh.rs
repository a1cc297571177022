//! Demand-driven mesh construct
//!
//! Like map, but child graphs may be created on demand by *any* child
//! referencing a not-yet-existing key, enabling recursive and memoized
//! definitions. Each child carries a rank bucket (distinct from static
//! wiring rank) ordering evaluation among mesh children: when child A first
//! reads missing child B, B is created at rank 0 and the edge A -> B is
//! recorded; if B's rank is not strictly below A's, A is re-ranked to
//! B.rank + 1 and the re-rank propagates to everything depending on A. A
//! dependency path back to itself fails fast with a descriptive error.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cascade_core::{ElementPath, EngineTime, Key, NodeError, NodeErrorKind, Shape, Value};
use cascade_graph::{
    GraphBuilder, InputSpec, NodeBehaviour, NodeContext, NodeId, NodeSignature, OutputSpec,
};
use parking_lot::Mutex;

use super::{child_failure, ChildGraph};

/// Builds the child graph for one mesh key. The handle is how the template
/// wires lookups of other keys into the child.
pub type MeshTemplate = Arc<dyn Fn(&Key, &MeshHandle) -> GraphBuilder + Send + Sync>;

#[derive(Default)]
struct MeshState {
    /// Memoized sink value per child key.
    results: HashMap<Key, Value>,
    /// Dependency edges discovered since the last drain: (from, to).
    requests: Vec<(Key, Key)>,
    /// target key -> lookup nodes to wake when its result changes.
    watchers: HashMap<Key, Vec<(Key, NodeId)>>,
}

/// Shared lookup table handed to mesh templates.
#[derive(Clone)]
pub struct MeshHandle {
    shared: Arc<Mutex<MeshState>>,
}

impl MeshHandle {
    /// A lookup node reading `target`'s mesh result from inside the child
    /// graph for `own_key`.
    pub fn lookup(&self, own_key: Key, target: Key) -> MeshLookup {
        MeshLookup {
            shared: self.shared.clone(),
            own_key,
            target,
        }
    }
}

/// Reads another mesh child's result. Referencing a missing key records a
/// demand that makes the mesh create it.
pub struct MeshLookup {
    shared: Arc<Mutex<MeshState>>,
    own_key: Key,
    target: Key,
}

impl MeshLookup {
    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_output(OutputSpec::new("out", Shape::Scalar))
            .with_scheduler()
    }
}

impl NodeBehaviour for MeshLookup {
    fn start(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        {
            let mut shared = self.shared.lock();
            shared
                .watchers
                .entry(self.target.clone())
                .or_default()
                .push((self.own_key.clone(), ctx.node_id()));
            shared
                .requests
                .push((self.own_key.clone(), self.target.clone()));
        }
        ctx.schedule_now()
    }

    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let result = self.shared.lock().results.get(&self.target).cloned();
        match result {
            Some(value) => ctx.tick(0, value),
            // Not there yet; the mesh wakes this node once it is.
            None => Ok(()),
        }
    }
}

struct MeshChild {
    child: ChildGraph,
    /// Rank bucket among mesh children, not a wiring rank.
    rank: u32,
    deps: HashSet<Key>,
    dependents: HashSet<Key>,
    /// Present in the externally requested key set.
    external: bool,
}

pub struct MeshNode {
    template: MeshTemplate,
    shared: Arc<Mutex<MeshState>>,
    children: HashMap<Key, MeshChild>,
    next_slot: u32,
}

impl MeshNode {
    pub fn new<F>(template: F) -> Self
    where
        F: Fn(&Key, &MeshHandle) -> GraphBuilder + Send + Sync + 'static,
    {
        MeshNode {
            template: Arc::new(template),
            shared: Arc::new(Mutex::new(MeshState::default())),
            children: HashMap::new(),
            next_slot: 0,
        }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_input(InputSpec::active("keys", Shape::Set))
            .with_output(OutputSpec::new("out", Shape::dict(Shape::Scalar)))
            .with_scheduler()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    fn create_child(
        &mut self,
        ctx: &mut NodeContext<'_>,
        key: &Key,
        external: bool,
        at: EngineTime,
    ) -> Result<(), NodeError> {
        if let Some(existing) = self.children.get_mut(key) {
            existing.external = existing.external || external;
            return Ok(());
        }
        tracing::debug!(key = %key, external, "mesh: creating child");
        let handle = MeshHandle {
            shared: self.shared.clone(),
        };
        let builder = (self.template)(key, &handle);
        let path = ctx.graph_path().child(self.next_slot);
        self.next_slot += 1;
        let child = ChildGraph::build_started(builder, path, at).map_err(child_failure)?;
        self.children.insert(
            key.clone(),
            MeshChild {
                child,
                rank: 0,
                deps: HashSet::new(),
                dependents: HashSet::new(),
                external,
            },
        );
        Ok(())
    }

    /// Raise `key`'s rank bucket to at least `min_rank`, propagating
    /// transitively through its dependents. A path back to a key already
    /// being raised is a dependency cycle.
    fn raise_rank(
        &mut self,
        key: &Key,
        min_rank: u32,
        stack: &mut Vec<Key>,
    ) -> Result<(), NodeError> {
        let Some(child) = self.children.get_mut(key) else {
            return Ok(());
        };
        if child.rank >= min_rank {
            return Ok(());
        }
        if stack.iter().any(|k| k == key) {
            let mut cycle: Vec<String> = stack.iter().map(Key::to_string).collect();
            cycle.push(key.to_string());
            return Err(NodeError::new(
                NodeErrorKind::DependencyCycle,
                format!("mesh dependency cycle: {}", cycle.join(" -> ")),
            ));
        }
        child.rank = min_rank;
        stack.push(key.clone());
        let dependents: Vec<Key> = self.children[key].dependents.iter().cloned().collect();
        for dependent in dependents {
            self.raise_rank(&dependent, min_rank + 1, stack)?;
        }
        stack.pop();
        Ok(())
    }

    /// Record a discovered edge and keep rank buckets consistent.
    fn record_edge(&mut self, from: &Key, to: &Key) -> Result<(), NodeError> {
        if let Some(child) = self.children.get_mut(from) {
            child.deps.insert(to.clone());
        }
        if let Some(child) = self.children.get_mut(to) {
            child.dependents.insert(from.clone());
        }
        let to_rank = self.children.get(to).map(|c| c.rank).unwrap_or(0);
        let from_rank = self.children.get(from).map(|c| c.rank).unwrap_or(0);
        if from_rank <= to_rank {
            self.raise_rank(from, to_rank + 1, &mut Vec::new())?;
        }
        Ok(())
    }

    /// Children without external demand or internal dependents are torn
    /// down, cascading until a fixpoint.
    fn teardown_unreferenced(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        loop {
            let Some(key) = self
                .children
                .iter()
                .find(|(_, c)| !c.external && c.dependents.is_empty())
                .map(|(k, _)| k.clone())
            else {
                return Ok(());
            };
            tracing::debug!(key = %key, "mesh: tearing down unreferenced child");
            let child = self.children.remove(&key).expect("present");
            for dep in &child.deps {
                if let Some(target) = self.children.get_mut(dep) {
                    target.dependents.remove(&key);
                }
            }
            {
                let mut shared = self.shared.lock();
                shared.results.remove(&key);
                shared.watchers.remove(&key);
                for watchers in shared.watchers.values_mut() {
                    watchers.retain(|(from, _)| from != &key);
                }
            }
            child.child.shutdown();
            ctx.remove_key(0, ElementPath::key(key))?;
        }
    }
}

impl NodeBehaviour for MeshNode {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let at = ctx.engine_time();

        // External key-set changes.
        let (added, removed) = match ctx.input_series(0).and_then(|s| s.as_set()) {
            Some(set) => (set.added(at), set.removed(at)),
            None => (Vec::new(), Vec::new()),
        };
        for key in added {
            self.create_child(ctx, &key, true, at)?;
        }
        for key in removed {
            if let Some(child) = self.children.get_mut(&key) {
                child.external = false;
            }
        }

        // Drain demand, create children, re-rank, evaluate in bucket order;
        // repeat until the mesh stabilises for this instant.
        let mut passes = 0u32;
        loop {
            let edges: Vec<(Key, Key)> = self.shared.lock().requests.drain(..).collect();
            for (from, to) in &edges {
                self.create_child(ctx, to, false, at)?;
                self.record_edge(from, to)?;
            }

            let mut order: Vec<(u32, Key)> = self
                .children
                .iter()
                .map(|(k, c)| (c.rank, k.clone()))
                .collect();
            order.sort();

            let mut ran_any = false;
            for (_, key) in order {
                let child = self.children.get_mut(&key).expect("present");
                if child.child.run_due(at).map_err(child_failure)? {
                    ran_any = true;
                    if let Some(value) = child.child.sink_tick(at) {
                        let changed = {
                            let mut shared = self.shared.lock();
                            let changed = shared.results.get(&key) != Some(&value);
                            shared.results.insert(key.clone(), value.clone());
                            changed
                        };
                        if changed {
                            ctx.tick_path(0, ElementPath::key(key.clone()), value)?;
                            let watchers: Vec<(Key, NodeId)> = self
                                .shared
                                .lock()
                                .watchers
                                .get(&key)
                                .cloned()
                                .unwrap_or_default();
                            for (from, node) in watchers {
                                if let Some(dependent) = self.children.get_mut(&from) {
                                    dependent.child.graph.request_node(node, at);
                                }
                            }
                        }
                    }
                }
            }

            let pending = !self.shared.lock().requests.is_empty();
            if !ran_any && !pending {
                break;
            }
            passes += 1;
            if passes > 10_000 {
                return Err(NodeError::evaluation(
                    "mesh did not stabilise within one cycle",
                ));
            }
        }

        self.teardown_unreferenced(ctx)?;

        let next = self
            .children
            .values()
            .map(|c| c.child.next_time())
            .min()
            .unwrap_or(EngineTime::NEVER);
        if next != EngineTime::NEVER {
            ctx.schedule(next.max(at.next_cycle()), Some("children"))?;
        }
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut NodeContext<'_>) {
        for child in self.children.values_mut() {
            if let Err(err) = child.child.stop() {
                tracing::warn!(error = %err, "mesh: child stop failed");
            }
        }
    }

    fn start(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        let at = ctx.engine_time();
        for child in self.children.values_mut() {
            if child.child.graph.state() == cascade_graph::LifecycleState::Stopped {
                child.child.start(at).map_err(child_failure)?;
            }
        }
        Ok(())
    }

    fn dispose(&mut self) {
        for (_, child) in std::mem::take(&mut self.children) {
            child.child.shutdown();
        }
    }
}
