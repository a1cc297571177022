//! Nested evaluation clock
//!
//! Child graphs created by dynamic constructs (map, switch, mesh, try/except)
//! never advance time themselves: the construct mirrors the parent's
//! evaluation time into the child's clock each parent cycle. What the nested
//! clock tracks independently is whether - and when - the child sub-graph has
//! scheduled future work, so the construct can re-schedule itself for it.

use std::time::{Duration, Instant};

use cascade_core::EngineTime;

use crate::clock::EvaluationClock;

pub struct NestedClock {
    evaluation_time: EngineTime,
    next_scheduled: EngineTime,
    cycle_started: Instant,
}

impl NestedClock {
    pub fn new() -> Self {
        NestedClock {
            evaluation_time: EngineTime::MIN,
            next_scheduled: EngineTime::NEVER,
            cycle_started: Instant::now(),
        }
    }

    /// Adopt the parent's evaluation time for the coming child cycle.
    pub fn set_from_parent(&mut self, at: EngineTime) {
        self.evaluation_time = at;
        self.cycle_started = Instant::now();
    }

    /// When the child sub-graph next wants to run, `NEVER` if idle.
    pub fn next_scheduled_time(&self) -> EngineTime {
        self.next_scheduled
    }

    /// Clear the child's scheduling request once the construct has adopted it.
    pub fn clear_next_scheduled(&mut self) {
        self.next_scheduled = EngineTime::NEVER;
    }
}

impl Default for NestedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl EvaluationClock for NestedClock {
    fn evaluation_time(&self) -> EngineTime {
        self.evaluation_time
    }

    fn now(&self) -> EngineTime {
        self.evaluation_time + self.cycle_time()
    }

    fn cycle_time(&self) -> Duration {
        self.cycle_started.elapsed()
    }

    fn update_next_scheduled_evaluation_time(&mut self, t: EngineTime) {
        let proposed = t.max(self.next_cycle_evaluation_time());
        self.next_scheduled = self.next_scheduled.min(proposed);
    }

    fn advance_to_next_scheduled_time(&mut self) {
        // Time is delegated: the parent advances, the construct mirrors it
        // through set_from_parent.
    }
}
