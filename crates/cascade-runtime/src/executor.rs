//! The executor - drives one graph through its run window
//!
//! Single-threaded cooperative loop: evaluate every due node, recompute the
//! next scheduled instant, hand control to the clock. Only the real-time
//! clock ever blocks. A cooperative stop is checked once per cycle and never
//! interrupts a cycle in progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use cascade_core::EngineTime;
use cascade_graph::{EvaluationObserver, Graph, NodeId};
use cascade_time::{EvaluationClock, RealTimeClock, RealTimeConfig, SimulationClock};

use crate::error::RuntimeResult;
use crate::push::PushReceiver;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RunMode {
    /// Historical run: jump from instant to instant as fast as possible.
    Simulation,
    /// Wall-clock run with external event injection.
    RealTime,
}

/// Plain configuration consumed at graph-run time.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub mode: RunMode,
    pub start: EngineTime,
    pub end: EngineTime,
    pub realtime: RealTimeConfig,
}

impl RunConfig {
    pub fn simulation(start: EngineTime, end: EngineTime) -> Self {
        RunConfig {
            mode: RunMode::Simulation,
            start,
            end,
            realtime: RealTimeConfig::default(),
        }
    }

    pub fn realtime(start: EngineTime, end: EngineTime) -> Self {
        RunConfig {
            mode: RunMode::RealTime,
            start,
            end,
            realtime: RealTimeConfig::default(),
        }
    }
}

/// Counters for one run.
#[derive(Clone, Debug, Default)]
pub struct RunStats {
    pub cycles: u64,
    pub node_evaluations: u64,
    pub last_cycle_duration: Duration,
}

/// Cooperative shutdown token. Cheap to clone; any thread may request a
/// stop, honoured between cycles (an in-progress cycle is never
/// interrupted). In real time the request also wakes a blocked clock.
#[derive(Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<parking_lot::Mutex<Option<cascade_time::ClockWaker>>>,
}

impl StopHandle {
    pub fn new() -> Self {
        StopHandle::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::Release);
        if let Some(waker) = self.waker.lock().as_ref() {
            waker.notify_push();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    fn attach_waker(&self, waker: cascade_time::ClockWaker) {
        *self.waker.lock() = Some(waker);
    }
}

/// What a finished run hands back: the graph (for inspection) plus counters.
pub struct RunOutcome {
    pub graph: Graph,
    pub stats: RunStats,
}

impl std::fmt::Debug for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOutcome")
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// Drives one graph through one run window.
pub struct GraphExecutor {
    graph: Graph,
    config: RunConfig,
    observers: Vec<Box<dyn EvaluationObserver>>,
    stop: StopHandle,
    push_sources: Vec<(NodeId, PushReceiver)>,
}

impl GraphExecutor {
    pub fn new(graph: Graph, config: RunConfig) -> Self {
        GraphExecutor {
            graph,
            config,
            observers: Vec::new(),
            stop: StopHandle::new(),
            push_sources: Vec::new(),
        }
    }

    pub fn add_observer(&mut self, observer: Box<dyn EvaluationObserver>) {
        self.observers.push(observer);
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Register a push-fed source so pending sends wake its node before a
    /// cycle. In real time the queue also gets the clock's waker.
    pub fn attach_push(&mut self, node: NodeId, receiver: &PushReceiver) {
        self.push_sources.push((node, receiver.clone()));
    }

    pub fn run(mut self) -> RuntimeResult<RunOutcome> {
        if self.config.start >= self.config.end {
            return Err(crate::error::RuntimeError::EmptyRunWindow {
                start: format!("{:?}", self.config.start),
                end: format!("{:?}", self.config.end),
            });
        }
        tracing::info!(
            graph = %self.graph.label(),
            mode = ?self.config.mode,
            "starting graph run"
        );
        let mut stats = RunStats::default();
        match self.config.mode {
            RunMode::Simulation => {
                let mut clock = SimulationClock::new(self.config.start);
                self.run_loop(&mut clock, &mut stats)?;
            }
            RunMode::RealTime => {
                let mut clock =
                    RealTimeClock::with_config(self.config.start, self.config.realtime.clone());
                for (_, receiver) in &self.push_sources {
                    receiver.set_waker(clock.waker());
                }
                self.stop.attach_waker(clock.waker());
                // Bound any idle wait by the run window's end.
                let _ = clock.set_alarm(self.config.end, "run-end", |_| {});
                self.run_loop(&mut clock, &mut stats)?;
            }
        }
        tracing::info!(
            graph = %self.graph.label(),
            cycles = stats.cycles,
            "graph run finished"
        );
        Ok(RunOutcome {
            graph: self.graph,
            stats,
        })
    }

    fn run_loop(
        &mut self,
        clock: &mut dyn EvaluationClock,
        stats: &mut RunStats,
    ) -> RuntimeResult<()> {
        self.graph.initialise(clock)?;
        self.graph.start(clock, &mut self.observers)?;

        let mut last_evaluated: Option<EngineTime> = None;
        loop {
            if self.stop.is_requested() {
                tracing::info!(graph = %self.graph.label(), "cooperative stop requested");
                break;
            }

            self.graph.absorb_alarm_wakes();
            let now = clock.evaluation_time();
            for (node, receiver) in &self.push_sources {
                if receiver.has_pending() {
                    self.graph.request_node(*node, now);
                }
            }

            let next = self.graph.next_scheduled_time();
            if next <= now && last_evaluated != Some(now) {
                // First cycle at the start bound, or work that landed at the
                // current instant: evaluate without advancing.
                stats.node_evaluations +=
                    self.graph.evaluate_cycle(clock, &mut self.observers)? as u64;
                stats.cycles += 1;
                stats.last_cycle_duration = clock.cycle_time();
                last_evaluated = Some(now);
                continue;
            }

            if next == EngineTime::NEVER {
                match self.config.mode {
                    // A quiescent simulation is finished.
                    RunMode::Simulation => break,
                    // Block until a push or alarm arrives.
                    RunMode::RealTime => {
                        if clock.now() >= self.config.end {
                            break;
                        }
                        clock.advance_to_next_scheduled_time();
                        if clock.evaluation_time() > self.config.end {
                            break;
                        }
                        continue;
                    }
                }
            }

            if next > self.config.end {
                break;
            }

            clock.update_next_scheduled_evaluation_time(next);
            clock.advance_to_next_scheduled_time();
            if clock.evaluation_time() > self.config.end {
                break;
            }
        }

        self.graph.stop(clock, &mut self.observers)?;
        Ok(())
    }
}
