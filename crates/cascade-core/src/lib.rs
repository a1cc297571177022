//! Cascade Core - Fundamental types for the dataflow engine
//!
//! This crate defines the types shared by every layer of the engine:
//! - Time primitives (EngineTime, MIN_TD)
//! - The value model (Value, Key, output references)
//! - Time-series stores with delta semantics (scalar/list/bundle/dict/set)
//! - The error taxonomy

pub mod error;
pub mod series;
pub mod time;
pub mod value;

pub use error::*;
pub use series::*;
pub use time::*;
pub use value::*;
