//! Real-time evaluation clock
//!
//! The only object in the engine with cross-thread state: producer threads
//! (push queues, alarm setters) share a mutex/condvar pair with the engine
//! thread. Everything else is single-writer by construction.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use cascade_core::EngineTime;
use parking_lot::{Condvar, Mutex};

use crate::clock::{EvaluationClock, TimeError};

/// Tunables for the real-time clock.
#[derive(Clone, Debug)]
pub struct RealTimeConfig {
    /// How long a pending push event may be deferred in favour of more
    /// urgently scheduled nodes before the clock delivers it anyway.
    /// A fairness heuristic, not a contract.
    pub starvation_window: Duration,
}

impl Default for RealTimeConfig {
    fn default() -> Self {
        RealTimeConfig {
            starvation_window: Duration::from_secs(15),
        }
    }
}

/// A wall-clock alarm: fires once on the engine thread during
/// `advance_to_next_scheduled_time`.
struct Alarm {
    at: EngineTime,
    name: String,
    callback: Option<Box<dyn FnOnce(EngineTime) + Send>>,
}

#[derive(Default)]
struct RtState {
    push_pending: bool,
    push_since: Option<Instant>,
    /// Sorted ascending by firing time.
    alarms: Vec<Alarm>,
}

struct RtShared {
    state: Mutex<RtState>,
    wake: Condvar,
}

/// Cross-thread handle used by push-queue producers to wake a blocked
/// engine. Cheap to clone; safe to call from any thread.
#[derive(Clone)]
pub struct ClockWaker {
    shared: Arc<RtShared>,
}

impl ClockWaker {
    /// Signal that a push event is waiting for the engine.
    pub fn notify_push(&self) {
        let mut state = self.shared.state.lock();
        state.push_pending = true;
        state.push_since.get_or_insert_with(Instant::now);
        self.shared.wake.notify_all();
    }
}

/// Real-time clock: the engine waits for the wall clock, external producers
/// and alarms can cut the wait short.
pub struct RealTimeClock {
    evaluation_time: EngineTime,
    next_scheduled: EngineTime,
    cycle_started: Instant,
    /// Anchor mapping the monotonic clock onto `EngineTime`.
    epoch_instant: Instant,
    epoch_time: EngineTime,
    shared: Arc<RtShared>,
    config: RealTimeConfig,
}

impl RealTimeClock {
    pub fn new(start: EngineTime) -> Self {
        Self::with_config(start, RealTimeConfig::default())
    }

    pub fn with_config(start: EngineTime, config: RealTimeConfig) -> Self {
        let epoch_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| EngineTime::from_micros(d.as_micros() as i64))
            .unwrap_or(EngineTime::from_micros(0));
        RealTimeClock {
            evaluation_time: start,
            next_scheduled: EngineTime::NEVER,
            cycle_started: Instant::now(),
            epoch_instant: Instant::now(),
            epoch_time,
            shared: Arc::new(RtShared {
                state: Mutex::new(RtState::default()),
                wake: Condvar::new(),
            }),
            config,
        }
    }

    /// Current wall-clock instant on the engine time axis.
    pub fn wall_now(&self) -> EngineTime {
        self.epoch_time + self.epoch_instant.elapsed()
    }

    /// Handle for producer threads.
    pub fn waker(&self) -> ClockWaker {
        ClockWaker {
            shared: self.shared.clone(),
        }
    }

    pub fn next_scheduled_time(&self) -> EngineTime {
        self.next_scheduled
    }

    /// Register a wall-clock alarm. The callback runs on the engine thread
    /// when the wall clock reaches `at`; a later alarm with the same name
    /// replaces the earlier one.
    pub fn set_alarm(
        &self,
        at: EngineTime,
        name: impl Into<String>,
        callback: impl FnOnce(EngineTime) + Send + 'static,
    ) -> Result<(), TimeError> {
        let name = name.into();
        let now = self.wall_now();
        if at <= now {
            return Err(TimeError::AlarmInPast { name, at, now });
        }
        let mut state = self.shared.state.lock();
        state.alarms.retain(|a| a.name != name);
        let pos = state.alarms.partition_point(|a| a.at <= at);
        state.alarms.insert(
            pos,
            Alarm {
                at,
                name,
                callback: Some(Box::new(callback)),
            },
        );
        // The engine may be waiting past the new alarm.
        self.shared.wake.notify_all();
        Ok(())
    }

    /// Remove a pending alarm by name.
    pub fn cancel_alarm(&self, name: &str) -> Result<(), TimeError> {
        let mut state = self.shared.state.lock();
        let before = state.alarms.len();
        state.alarms.retain(|a| a.name != name);
        if state.alarms.len() == before {
            return Err(TimeError::UnknownAlarm(name.to_string()));
        }
        Ok(())
    }

    /// Whether a push event is currently pending delivery.
    pub fn push_pending(&self) -> bool {
        self.shared.state.lock().push_pending
    }

    fn drain_due_alarms(&self) -> Vec<Alarm> {
        let wall = self.wall_now();
        let mut state = self.shared.state.lock();
        let due = state.alarms.partition_point(|a| a.at <= wall);
        state.alarms.drain(..due).collect()
    }
}

impl EvaluationClock for RealTimeClock {
    fn evaluation_time(&self) -> EngineTime {
        self.evaluation_time
    }

    fn now(&self) -> EngineTime {
        self.wall_now()
    }

    fn cycle_time(&self) -> Duration {
        self.cycle_started.elapsed()
    }

    fn update_next_scheduled_evaluation_time(&mut self, t: EngineTime) {
        let proposed = t.max(self.next_cycle_evaluation_time());
        self.next_scheduled = self.next_scheduled.min(proposed);
    }

    fn advance_to_next_scheduled_time(&mut self) {
        let target = self.next_scheduled;
        let next_cycle = self.next_cycle_evaluation_time();

        loop {
            // Alarms fire outside the lock; callbacks may re-enter (e.g. to
            // signal a push). A fired alarm is itself a scheduled event, so
            // the engine runs a cycle for it.
            let due = self.drain_due_alarms();
            let fired = !due.is_empty();
            for mut alarm in due {
                let wall = self.wall_now();
                tracing::debug!(alarm = %alarm.name, "firing wall-clock alarm");
                if let Some(callback) = alarm.callback.take() {
                    callback(wall);
                }
            }
            if fired {
                let wall = self.wall_now();
                self.evaluation_time = target.min(next_cycle.max(wall));
                break;
            }

            let mut state = self.shared.state.lock();
            let wall = self.wall_now();

            if state.push_pending {
                let starved = state
                    .push_since
                    .map(|since| since.elapsed() >= self.config.starvation_window)
                    .unwrap_or(false);
                let node_due_first = target <= wall;
                if !node_due_first || starved {
                    state.push_pending = false;
                    state.push_since = None;
                    self.evaluation_time = target.min(next_cycle.max(wall));
                    break;
                }
            }

            if target != EngineTime::NEVER && wall >= target {
                self.evaluation_time = target.min(next_cycle.max(wall));
                break;
            }

            // Sleep until the earliest of: scheduled target, next alarm,
            // push starvation deadline. An external notify cuts this short.
            let mut deadline: Option<Duration> = None;
            if target != EngineTime::NEVER {
                deadline = Some(target.since(wall));
            }
            if let Some(alarm) = state.alarms.first() {
                let until = alarm.at.since(wall);
                deadline = Some(deadline.map_or(until, |d| d.min(until)));
            }
            if state.push_pending {
                if let Some(since) = state.push_since {
                    let remaining = self
                        .config
                        .starvation_window
                        .saturating_sub(since.elapsed());
                    deadline = Some(deadline.map_or(remaining, |d| d.min(remaining)));
                }
            }

            match deadline {
                Some(timeout) => {
                    self.shared.wake.wait_for(&mut state, timeout);
                }
                None => {
                    self.shared.wake.wait(&mut state);
                }
            }
        }

        self.next_scheduled = EngineTime::NEVER;
        self.cycle_started = Instant::now();
    }

    fn set_alarm(
        &mut self,
        at: EngineTime,
        name: &str,
        callback: Box<dyn FnOnce(EngineTime) + Send>,
    ) -> Result<(), TimeError> {
        RealTimeClock::set_alarm(self, at, name, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_alarm_in_past_is_rejected() {
        let clock = RealTimeClock::new(EngineTime::from_secs(0));
        let past = clock.wall_now() - Duration::from_secs(1);
        let err = clock.set_alarm(past, "late", |_| {}).unwrap_err();
        assert!(matches!(err, TimeError::AlarmInPast { .. }));
    }

    #[test]
    fn test_cancel_unknown_alarm() {
        let clock = RealTimeClock::new(EngineTime::from_secs(0));
        assert!(matches!(
            clock.cancel_alarm("nothing"),
            Err(TimeError::UnknownAlarm(_))
        ));
    }

    #[test]
    fn test_push_wakes_blocked_advance() {
        let start = EngineTime::from_secs(0);
        let mut clock = RealTimeClock::new(start);
        let waker = clock.waker();

        let sender = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            waker.notify_push();
        });

        let before = Instant::now();
        // Nothing scheduled: only the push can end the wait.
        clock.advance_to_next_scheduled_time();
        sender.join().unwrap();

        assert!(before.elapsed() >= Duration::from_millis(25));
        assert!(before.elapsed() < Duration::from_secs(5));
        assert!(clock.evaluation_time() > start);
        assert!(!clock.push_pending());
    }

    #[test]
    fn test_scheduled_node_beats_push() {
        let mut clock = RealTimeClock::new(EngineTime::from_secs(0));
        let waker = clock.waker();
        waker.notify_push();

        // A node is due immediately: the push must wait for the next cycle.
        let target = clock.wall_now() - Duration::from_millis(1);
        clock.update_next_scheduled_evaluation_time(target);
        clock.advance_to_next_scheduled_time();

        assert!(clock.push_pending());
    }

    #[test]
    fn test_starved_push_wins() {
        let mut clock = RealTimeClock::with_config(
            EngineTime::from_secs(0),
            RealTimeConfig {
                starvation_window: Duration::ZERO,
            },
        );
        let waker = clock.waker();
        waker.notify_push();

        let target = clock.wall_now() - Duration::from_millis(1);
        clock.update_next_scheduled_evaluation_time(target);
        clock.advance_to_next_scheduled_time();

        // Zero starvation window: the push is consumed immediately even
        // though a node was due first.
        assert!(!clock.push_pending());
    }

    #[test]
    fn test_alarm_fires_callback() {
        let mut clock = RealTimeClock::new(EngineTime::from_secs(0));
        let fired = Arc::new(Mutex::new(false));
        let flag = fired.clone();
        let waker = clock.waker();

        clock
            .set_alarm(
                clock.wall_now() + Duration::from_millis(20),
                "tick",
                move |_| {
                    *flag.lock() = true;
                    waker.notify_push();
                },
            )
            .unwrap();

        clock.advance_to_next_scheduled_time();
        assert!(*fired.lock());
    }
}
