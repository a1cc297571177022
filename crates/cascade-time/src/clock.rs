//! The evaluation clock contract and the simulation implementation

use std::time::{Duration, Instant};

use cascade_core::EngineTime;
use thiserror::Error;

/// Clock misuse, raised at the call site.
#[derive(Error, Debug)]
pub enum TimeError {
    #[error("alarm '{name}' scheduled in the past ({at:?} <= {now:?})")]
    AlarmInPast {
        name: String,
        at: EngineTime,
        now: EngineTime,
    },

    #[error("unknown alarm '{0}'")]
    UnknownAlarm(String),

    #[error("this clock does not support wall-clock alarms")]
    AlarmsUnsupported,
}

/// Governs "now" for one graph.
///
/// `evaluation_time` is the same for every node within one cycle.
/// `update_next_scheduled_evaluation_time` may only clamp the candidate next
/// time downward, and never below `next_cycle_evaluation_time`.
pub trait EvaluationClock {
    /// The fixed instant of the current cycle.
    fn evaluation_time(&self) -> EngineTime;

    /// Wall-adjacent instant for telemetry and external timestamps.
    fn now(&self) -> EngineTime;

    /// Wall time spent so far in the current cycle.
    fn cycle_time(&self) -> Duration;

    /// The earliest instant the next cycle may run at.
    fn next_cycle_evaluation_time(&self) -> EngineTime {
        self.evaluation_time().next_cycle()
    }

    /// Clamp the candidate next evaluation time downward toward `t`.
    fn update_next_scheduled_evaluation_time(&mut self, t: EngineTime);

    /// Move `evaluation_time` forward to the accepted candidate. Only this
    /// call may block, and only in real time.
    fn advance_to_next_scheduled_time(&mut self);

    /// Request wall-clock-relative firing instead of engine-time firing.
    /// Only the real-time clock supports this; everything else rejects it.
    fn set_alarm(
        &mut self,
        _at: EngineTime,
        _name: &str,
        _callback: Box<dyn FnOnce(EngineTime) + Send>,
    ) -> Result<(), TimeError> {
        Err(TimeError::AlarmsUnsupported)
    }
}

/// Simulation clock: historical runs, as fast as possible.
///
/// `advance_to_next_scheduled_time` unconditionally adopts the previously
/// computed next time. Deterministic and replayable.
pub struct SimulationClock {
    evaluation_time: EngineTime,
    next_scheduled: EngineTime,
    cycle_started: Instant,
}

impl SimulationClock {
    pub fn new(start: EngineTime) -> Self {
        SimulationClock {
            evaluation_time: start,
            next_scheduled: EngineTime::NEVER,
            cycle_started: Instant::now(),
        }
    }

    /// The accepted candidate for the next cycle, `NEVER` if none.
    pub fn next_scheduled_time(&self) -> EngineTime {
        self.next_scheduled
    }
}

impl EvaluationClock for SimulationClock {
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
        if self.next_scheduled != EngineTime::NEVER {
            self.evaluation_time = self.next_scheduled;
        }
        self.next_scheduled = EngineTime::NEVER;
        self.cycle_started = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::MIN_TD;

    #[test]
    fn test_simulation_advance_is_exact() {
        let start = EngineTime::from_secs(100);
        let mut clock = SimulationClock::new(start);

        clock.update_next_scheduled_evaluation_time(EngineTime::from_secs(105));
        clock.advance_to_next_scheduled_time();

        assert_eq!(clock.evaluation_time(), EngineTime::from_secs(105));
        assert_eq!(clock.next_scheduled_time(), EngineTime::NEVER);
    }

    #[test]
    fn test_update_clamps_downward_only() {
        let mut clock = SimulationClock::new(EngineTime::from_secs(0));

        clock.update_next_scheduled_evaluation_time(EngineTime::from_secs(10));
        clock.update_next_scheduled_evaluation_time(EngineTime::from_secs(5));
        clock.update_next_scheduled_evaluation_time(EngineTime::from_secs(20));

        clock.advance_to_next_scheduled_time();
        assert_eq!(clock.evaluation_time(), EngineTime::from_secs(5));
    }

    #[test]
    fn test_never_clamped_below_next_cycle() {
        let start = EngineTime::from_secs(1);
        let mut clock = SimulationClock::new(start);

        // A request for the current instant lands one MIN_TD later.
        clock.update_next_scheduled_evaluation_time(start);
        clock.advance_to_next_scheduled_time();

        assert_eq!(clock.evaluation_time(), start + MIN_TD);
    }

    #[test]
    fn test_monotonic_over_many_cycles() {
        let mut clock = SimulationClock::new(EngineTime::from_secs(0));
        let mut previous = clock.evaluation_time();

        for step in 0..1000 {
            // Requests that alternately target the past and the future.
            let target = if step % 3 == 0 {
                previous // in the past once advanced
            } else {
                previous + Duration::from_micros(step)
            };
            clock.update_next_scheduled_evaluation_time(target);
            clock.advance_to_next_scheduled_time();

            let current = clock.evaluation_time();
            assert!(current >= previous + MIN_TD);
            previous = current;
        }
    }
}
