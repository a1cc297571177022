//! Push queue - the cross-thread bridge
//!
//! The one place where another thread talks to the engine: a producer calls
//! `PushSender::send` (thread-safe, non-blocking), the real-time clock wakes,
//! and the `PushSource` node drains pending items into its output before the
//! evaluation loop continues.

use std::collections::VecDeque;
use std::sync::Arc;

use cascade_core::{ElementPath, Key, NodeError, Shape, Value, MIN_TD};
use cascade_graph::{NodeBehaviour, NodeContext, NodeSignature, OutputSpec};
use cascade_time::ClockWaker;
use parking_lot::Mutex;

/// What happens when several sends are pending at one wake.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PushPolicy {
    /// Deliver one send per cycle, in arrival order.
    Sequential,
    /// Coalesce everything pending into a single-cycle delta.
    Batch,
    /// Drop all but the last pending value.
    Elide,
}

/// One queued send: a path into the source output plus the value.
#[derive(Clone, Debug)]
struct PushItem {
    path: ElementPath,
    value: Value,
}

struct PushState {
    queue: VecDeque<PushItem>,
    waker: Option<ClockWaker>,
}

struct PushInner {
    state: Mutex<PushState>,
    capacity: usize,
}

/// Producer half: `Clone + Send`, callable from any thread.
#[derive(Clone)]
pub struct PushSender {
    inner: Arc<PushInner>,
}

impl PushSender {
    /// Queue a scalar value for the source output.
    pub fn send(&self, value: Value) {
        self.push(PushItem {
            path: ElementPath::root(),
            value,
        });
    }

    /// Queue a keyed value for a dict-shaped source output.
    pub fn send_keyed(&self, key: Key, value: Value) {
        self.push(PushItem {
            path: ElementPath::key(key),
            value,
        });
    }

    fn push(&self, item: PushItem) {
        let mut state = self.inner.state.lock();
        if state.queue.len() >= self.inner.capacity {
            state.queue.pop_front();
            tracing::warn!("push queue full, dropping oldest item");
        }
        state.queue.push_back(item);
        if let Some(waker) = &state.waker {
            waker.notify_push();
        }
    }
}

/// Engine half, held by the `PushSource` node and the executor's registry.
#[derive(Clone)]
pub struct PushReceiver {
    inner: Arc<PushInner>,
    policy: PushPolicy,
}

impl PushReceiver {
    pub fn has_pending(&self) -> bool {
        !self.inner.state.lock().queue.is_empty()
    }

    /// Install the real-time clock's waker so later sends interrupt a
    /// blocked engine.
    pub fn set_waker(&self, waker: ClockWaker) {
        self.inner.state.lock().waker = Some(waker);
    }

    fn drain(&self) -> Vec<PushItem> {
        let mut state = self.inner.state.lock();
        match self.policy {
            PushPolicy::Sequential => state.queue.pop_front().into_iter().collect(),
            PushPolicy::Batch => state.queue.drain(..).collect(),
            PushPolicy::Elide => {
                let last = state.queue.drain(..).last();
                last.into_iter().collect()
            }
        }
    }
}

/// Create a connected sender/receiver pair.
pub fn push_queue(policy: PushPolicy) -> (PushSender, PushReceiver) {
    push_queue_with_capacity(policy, 1024)
}

pub fn push_queue_with_capacity(
    policy: PushPolicy,
    capacity: usize,
) -> (PushSender, PushReceiver) {
    let inner = Arc::new(PushInner {
        state: Mutex::new(PushState {
            queue: VecDeque::new(),
            waker: None,
        }),
        capacity,
    });
    (
        PushSender {
            inner: inner.clone(),
        },
        PushReceiver { inner, policy },
    )
}

/// Source node fed from a push queue. Ticks pending sends onto output 0 and
/// re-schedules itself while items remain.
pub struct PushSource {
    receiver: PushReceiver,
}

impl PushSource {
    pub fn new(receiver: PushReceiver) -> Self {
        PushSource { receiver }
    }

    pub fn signature() -> NodeSignature {
        NodeSignature::new()
            .with_output(OutputSpec::new("out", Shape::Scalar))
            .with_scheduler()
    }

    pub fn keyed_signature() -> NodeSignature {
        NodeSignature::new()
            .with_output(OutputSpec::new("out", Shape::dict(Shape::Scalar)))
            .with_scheduler()
    }
}

impl NodeBehaviour for PushSource {
    fn eval(&mut self, ctx: &mut NodeContext<'_>) -> Result<(), NodeError> {
        for item in self.receiver.drain() {
            ctx.tick_path(0, item.path, item.value)?;
        }
        if self.receiver.has_pending() {
            ctx.schedule_in(MIN_TD, Some("push-drain"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_values(receiver: &PushReceiver) -> Vec<Value> {
        receiver.drain().into_iter().map(|i| i.value).collect()
    }

    #[test]
    fn test_sequential_delivers_one_per_drain() {
        let (tx, rx) = push_queue(PushPolicy::Sequential);
        tx.send(Value::Int(1));
        tx.send(Value::Int(2));

        assert_eq!(drain_values(&rx), vec![Value::Int(1)]);
        assert!(rx.has_pending());
        assert_eq!(drain_values(&rx), vec![Value::Int(2)]);
        assert!(!rx.has_pending());
    }

    #[test]
    fn test_batch_coalesces_into_one_drain() {
        let (tx, rx) = push_queue(PushPolicy::Batch);
        tx.send(Value::Int(1));
        tx.send(Value::Int(2));
        tx.send(Value::Int(3));

        assert_eq!(
            drain_values(&rx),
            vec![Value::Int(1), Value::Int(2), Value::Int(3)]
        );
        assert!(!rx.has_pending());
    }

    #[test]
    fn test_elide_keeps_only_last() {
        let (tx, rx) = push_queue(PushPolicy::Elide);
        tx.send(Value::Int(1));
        tx.send(Value::Int(2));
        tx.send(Value::Int(3));

        assert_eq!(drain_values(&rx), vec![Value::Int(3)]);
        assert!(!rx.has_pending());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let (tx, rx) = push_queue_with_capacity(PushPolicy::Batch, 2);
        tx.send(Value::Int(1));
        tx.send(Value::Int(2));
        tx.send(Value::Int(3));

        assert_eq!(drain_values(&rx), vec![Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_send_from_another_thread() {
        let (tx, rx) = push_queue(PushPolicy::Sequential);
        let handle = std::thread::spawn(move || {
            tx.send(Value::Float(9.5));
        });
        handle.join().unwrap();
        assert!(rx.has_pending());
    }
}
