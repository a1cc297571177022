//! Cascade Runtime - driving graphs through time
//!
//! This crate owns everything above the cycle evaluator:
//! - The executor: run modes (simulation / real time), stop handle, run stats
//! - The push queue: the engine's only cross-thread bridge
//! - Dynamic nested-graph constructs: map, switch, mesh, try/except
//! - A small library of source, operator, and sink behaviours
//! - A tracing-backed lifecycle observer

pub mod error;
pub mod executor;
pub mod nested;
pub mod nodes;
pub mod observer;
pub mod push;

pub use error::*;
pub use executor::*;
pub use nested::*;
pub use nodes::*;
pub use observer::*;
pub use push::*;
