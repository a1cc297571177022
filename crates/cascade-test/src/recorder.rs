//! Recorders - shared cells bridging sink nodes and test assertions

use std::collections::BTreeMap;
use std::sync::Arc;

use cascade_core::{EngineTime, Key, Value};
use cascade_runtime::{CollectSink, DictSnapshotSink, Recorded};
use parking_lot::Mutex;

/// Records every scalar tick delivered to its sink node.
#[derive(Clone, Default)]
pub struct Recorder {
    cells: Recorded<Value>,
}

impl Recorder {
    pub fn new() -> Self {
        Recorder {
            cells: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The sink behaviour to wire into a graph.
    pub fn sink(&self) -> CollectSink {
        CollectSink::new(self.cells.clone())
    }

    pub fn entries(&self) -> Vec<(EngineTime, Value)> {
        self.cells.lock().clone()
    }

    pub fn values(&self) -> Vec<Value> {
        self.cells.lock().iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn times(&self) -> Vec<EngineTime> {
        self.cells.lock().iter().map(|(t, _)| *t).collect()
    }

    pub fn last(&self) -> Option<Value> {
        self.cells.lock().last().map(|(_, v)| v.clone())
    }

    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.lock().is_empty()
    }
}

/// Records full dict snapshots delivered to its sink node.
#[derive(Clone, Default)]
pub struct DictRecorder {
    cells: Recorded<BTreeMap<Key, Value>>,
}

impl DictRecorder {
    pub fn new() -> Self {
        DictRecorder {
            cells: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sink(&self) -> DictSnapshotSink {
        DictSnapshotSink::new(self.cells.clone())
    }

    pub fn snapshots(&self) -> Vec<(EngineTime, BTreeMap<Key, Value>)> {
        self.cells.lock().clone()
    }

    pub fn last(&self) -> Option<BTreeMap<Key, Value>> {
        self.cells.lock().last().map(|(_, d)| d.clone())
    }
}
