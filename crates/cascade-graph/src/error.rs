//! Error types for graph construction and evaluation

use cascade_core::{NodeError, SeriesError};
use thiserror::Error;

use crate::node::LifecycleState;

/// Graph-level failures.
#[derive(Error, Debug)]
pub enum GraphError {
    // Wiring errors
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{node}' has no input {input}")]
    UnknownInput { node: String, input: u32 },

    #[error("node '{node}' has no output {output}")]
    UnknownOutput { node: String, output: u32 },

    #[error("wiring cycle involving node '{0}'")]
    WiringCycle(String),

    #[error("input slot {slot} does not exist on input {input} of node '{node}'")]
    BadInputSlot {
        node: String,
        input: u32,
        slot: String,
    },

    // Lifecycle errors
    #[error("graph is {actual:?}, expected {expected:?}")]
    Lifecycle {
        expected: LifecycleState,
        actual: LifecycleState,
    },

    // Value-model misuse surfaced through a node's outputs
    #[error("series error at node '{node}': {source}")]
    Series {
        node: String,
        #[source]
        source: SeriesError,
    },

    /// Fatal abort: a node failed without a declared error output. Reports
    /// the originating node's identity and rank path.
    #[error("node '{node}' (rank {rank}, graph {path}) failed: {source}")]
    NodeFailed {
        node: String,
        rank: u32,
        path: String,
        #[source]
        source: NodeError,
    },
}

/// Result type for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;
