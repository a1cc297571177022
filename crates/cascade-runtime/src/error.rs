//! Runtime-level errors

use cascade_graph::GraphError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("run window is empty: start {start} is not before end {end}")]
    EmptyRunWindow { start: String, end: String },
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
