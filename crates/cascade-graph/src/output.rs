//! Output slots - the write side of time-series edges
//!
//! Outputs live in an arena owned by their graph; nodes and parent layers
//! reference them by `OutputId`. Subscriber lists are non-owning
//! back-references, removed explicitly on unbind or dispose.

use cascade_core::{ElementPath, TsValue};

use crate::graph::NodeId;

/// A non-owning back-reference from an output to an active input.
#[derive(Clone, PartialEq, Debug)]
pub struct Subscription {
    pub node: NodeId,
    pub input: u32,
    /// The path within the output the input observes. A mutation is
    /// delivered iff its path and this path are prefix-related.
    pub path: ElementPath,
}

/// The write side of one edge: the value tree plus its subscribers.
#[derive(Debug)]
pub struct Output {
    pub(crate) owner: NodeId,
    pub(crate) series: TsValue,
    pub(crate) subscribers: Vec<Subscription>,
}

impl Output {
    pub(crate) fn new(owner: NodeId, series: TsValue) -> Self {
        Output {
            owner,
            series,
            subscribers: Vec::new(),
        }
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    pub fn series(&self) -> &TsValue {
        &self.series
    }

    /// Add a back-reference; duplicates are ignored so that re-binding an
    /// already-bound input stays a no-op.
    pub(crate) fn subscribe(&mut self, sub: Subscription) {
        if !self.subscribers.contains(&sub) {
            self.subscribers.push(sub);
        }
    }

    pub(crate) fn unsubscribe(&mut self, node: NodeId, input: u32, path: &ElementPath) {
        self.subscribers
            .retain(|s| !(s.node == node && s.input == input && s.path == *path));
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
