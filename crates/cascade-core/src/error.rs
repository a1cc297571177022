//! Error taxonomy for the engine core
//!
//! Two families live here. `SeriesError` covers misuse of the value model
//! (bad paths, shape mismatches) and is always a programming error at the
//! wiring boundary. `NodeError` is the typed capture of a failure inside a
//! node's own logic; it is a first-class value (`Value::Error`) that can be
//! routed on an error output instead of aborting the graph.

use thiserror::Error;

/// Classification of a captured node failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeErrorKind {
    /// The node's evaluation logic failed.
    Evaluation,
    /// Divide-by-zero under the `Error` policy.
    DivisionByZero,
    /// A mesh child transitively depends on itself.
    DependencyCycle,
    /// An input carried a value the node cannot interpret.
    InvalidInput,
    /// The node used a capability its signature does not declare.
    Capability,
    /// Scheduling misuse (past alarm, unknown tag).
    Schedule,
}

impl std::fmt::Display for NodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeErrorKind::Evaluation => "evaluation error",
            NodeErrorKind::DivisionByZero => "division by zero",
            NodeErrorKind::DependencyCycle => "dependency cycle",
            NodeErrorKind::InvalidInput => "invalid input",
            NodeErrorKind::Capability => "undeclared capability",
            NodeErrorKind::Schedule => "scheduling misuse",
        };
        f.write_str(name)
    }
}

/// A failure raised while a node's logic ran, captured at the node boundary.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} in node '{node}': {message}")]
pub struct NodeError {
    pub kind: NodeErrorKind,
    /// Identity of the failing node; filled in by the engine at capture time.
    pub node: String,
    pub message: String,
    /// Rendering of the node's input values at the moment of failure, when
    /// the signature asked for capture.
    pub captured_inputs: Option<String>,
}

impl NodeError {
    pub fn new(kind: NodeErrorKind, message: impl Into<String>) -> Self {
        NodeError {
            kind,
            node: String::new(),
            message: message.into(),
            captured_inputs: None,
        }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        NodeError::new(NodeErrorKind::Evaluation, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        NodeError::new(NodeErrorKind::InvalidInput, message)
    }

    pub fn schedule(message: impl Into<String>) -> Self {
        NodeError::new(NodeErrorKind::Schedule, message)
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = node.into();
        self
    }

    pub fn with_captured_inputs(mut self, rendered: impl Into<String>) -> Self {
        self.captured_inputs = Some(rendered.into());
        self
    }
}

/// Misuse of the time-series value model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SeriesError {
    #[error("no element at {path}")]
    MissingElement { path: String },

    #[error("expected a {expected} series, found {actual}")]
    ShapeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("value is not usable as a dict key or set element")]
    UnhashableValue,

    #[error("list arity is fixed at {arity}, index {index} is out of range")]
    IndexOutOfRange { arity: usize, index: usize },

    #[error("bundle schema is fixed, unknown field '{field}'")]
    UnknownField { field: String },
}

/// Result alias for value-model operations.
pub type SeriesResult<T> = Result<T, SeriesError>;
