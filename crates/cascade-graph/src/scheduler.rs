//! Per-node future-activation scheduler
//!
//! Each node owns a sorted collection of `(time, tag)` entries. Anonymous
//! tags accumulate; a named tag replaces any earlier entry with the same
//! name, so periodic nodes can re-schedule without duplicating work.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use cascade_core::EngineTime;

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Tag {
    Anon(u64),
    Named(Arc<str>),
}

#[derive(Debug, Default)]
pub struct Scheduler {
    entries: BTreeSet<(EngineTime, Tag)>,
    named: HashMap<Arc<str>, EngineTime>,
    next_anon: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler::default()
    }

    /// Add an activation at `at`. A named tag replaces its earlier entry.
    pub fn schedule(&mut self, at: EngineTime, tag: Option<&str>) {
        match tag {
            Some(name) => {
                let name: Arc<str> = Arc::from(name);
                if let Some(previous) = self.named.insert(name.clone(), at) {
                    self.entries.remove(&(previous, Tag::Named(name.clone())));
                }
                self.entries.insert((at, Tag::Named(name)));
            }
            None => {
                let tag = Tag::Anon(self.next_anon);
                self.next_anon += 1;
                self.entries.insert((at, tag));
            }
        }
    }

    /// Remove a named activation. Returns whether it existed.
    pub fn un_schedule(&mut self, tag: &str) -> bool {
        match self.named.remove(tag) {
            Some(at) => self.entries.remove(&(at, Tag::Named(Arc::from(tag)))),
            None => false,
        }
    }

    /// True iff an entry equals the graph's current evaluation time.
    pub fn is_scheduled_now(&self, at: EngineTime) -> bool {
        self.entries
            .range(..(at.next_cycle(), Tag::Anon(0)))
            .next_back()
            .map(|(t, _)| *t == at)
            .unwrap_or(false)
    }

    /// True iff any entry exists.
    pub fn is_scheduled(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Earliest pending activation, `NEVER` if none.
    pub fn next_time(&self) -> EngineTime {
        self.entries
            .first()
            .map(|(t, _)| *t)
            .unwrap_or(EngineTime::NEVER)
    }

    /// Consume every entry at or before `at` (they are being served by the
    /// current cycle).
    pub fn pop_due(&mut self, at: EngineTime) {
        while let Some((t, _)) = self.entries.first() {
            if *t > at {
                break;
            }
            let (t, tag) = self.entries.pop_first().expect("non-empty");
            if let Tag::Named(name) = &tag {
                // Only drop the name if it still refers to this entry.
                if self.named.get(name) == Some(&t) {
                    self.named.remove(name);
                }
            }
        }
    }
}
