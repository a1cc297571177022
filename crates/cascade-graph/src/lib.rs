//! Cascade Graph - graph structure, binding, and the cycle evaluator
//!
//! This crate owns the single-threaded heart of the engine:
//! - Output/Input binding with non-owning subscriber back-references
//! - The per-node scheduler
//! - The node model (signatures, behaviours, evaluation context)
//! - The graph: rank-ordered cycle evaluation and the lifecycle state machine
//! - The builder consumed from the wiring front end

pub mod builder;
pub mod error;
pub mod graph;
pub mod input;
pub mod node;
pub mod observer;
pub mod output;
pub mod scheduler;

pub use builder::*;
pub use error::*;
pub use graph::*;
pub use input::*;
pub use node::*;
pub use observer::*;
pub use output::*;
pub use scheduler::*;
