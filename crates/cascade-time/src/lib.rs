//! Cascade Time - Evaluation clocks
//!
//! A graph runs against exactly one clock. Three implementations of one
//! contract:
//! - `SimulationClock`: jumps straight to the next scheduled instant,
//!   deterministic and replayable, never blocks
//! - `RealTimeClock`: blocks on a condition variable until the wall clock
//!   catches up or an external producer signals, and fires wall-clock alarms
//! - `NestedClock`: delegates time to a parent graph while tracking its own
//!   sub-graph scheduling

pub mod clock;
pub mod nested;
pub mod realtime;

pub use clock::*;
pub use nested::*;
pub use realtime::*;
