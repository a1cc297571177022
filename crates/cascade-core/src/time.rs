//! Time primitives for the Cascade engine
//!
//! Every graph runs against a single `EngineTime` axis:
//! - totally monotonic within one graph run
//! - `MIN` marks "never ticked", `NEVER` marks "no future work"
//! - `MIN_TD` is both the tie-break unit and the default "one cycle later"
//!   increment

use std::ops::{Add, Sub};
use std::time::Duration;

/// Minimum tick granularity. Two distinct evaluation cycles are always at
/// least this far apart.
pub const MIN_TD: Duration = Duration::from_micros(1);

/// Engine time - microseconds since the Unix epoch
/// INVARIANT: within one graph run, evaluation time NEVER decreases
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EngineTime(pub i64);

impl EngineTime {
    /// Smallest representable instant; also the `last_modified_time` of an
    /// output that has never ticked.
    pub const MIN: EngineTime = EngineTime(i64::MIN);
    /// The "never" sentinel used for absent scheduling entries.
    pub const NEVER: EngineTime = EngineTime(i64::MAX);

    #[inline]
    pub fn from_micros(micros: i64) -> Self {
        EngineTime(micros)
    }

    #[inline]
    pub fn from_millis(millis: i64) -> Self {
        EngineTime(millis * 1000)
    }

    #[inline]
    pub fn from_secs(secs: i64) -> Self {
        EngineTime(secs * 1_000_000)
    }

    #[inline]
    pub fn as_micros(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn as_millis(self) -> i64 {
        self.0 / 1000
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    /// The earliest instant a later cycle may run at.
    #[inline]
    pub fn next_cycle(self) -> EngineTime {
        self.saturating_add(MIN_TD)
    }

    #[inline]
    pub fn saturating_add(self, duration: Duration) -> Self {
        if self == EngineTime::NEVER {
            return self;
        }
        EngineTime(self.0.saturating_add(duration.as_micros() as i64))
    }

    #[inline]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        EngineTime(self.0.saturating_sub(duration.as_micros() as i64))
    }

    /// Duration from `earlier` to `self`, zero if `earlier` is ahead.
    #[inline]
    pub fn since(self, earlier: EngineTime) -> Duration {
        let diff = self.0.saturating_sub(earlier.0);
        if diff >= 0 {
            Duration::from_micros(diff as u64)
        } else {
            Duration::ZERO
        }
    }

    /// Whether this is a real instant rather than one of the sentinels.
    #[inline]
    pub fn is_instant(self) -> bool {
        self != EngineTime::MIN && self != EngineTime::NEVER
    }
}

impl Add<Duration> for EngineTime {
    type Output = EngineTime;

    #[inline]
    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl Sub<Duration> for EngineTime {
    type Output = EngineTime;

    #[inline]
    fn sub(self, rhs: Duration) -> Self::Output {
        self.saturating_sub(rhs)
    }
}

impl std::fmt::Debug for EngineTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            EngineTime::MIN => write!(f, "t(MIN)"),
            EngineTime::NEVER => write!(f, "t(NEVER)"),
            t => write!(f, "t({}us)", t.0),
        }
    }
}

impl std::fmt::Display for EngineTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_cycle_strictly_later() {
        let t = EngineTime::from_millis(100);
        assert!(t.next_cycle() > t);
        assert_eq!(t.next_cycle().since(t), MIN_TD);
    }

    #[test]
    fn test_never_absorbs_addition() {
        assert_eq!(EngineTime::NEVER.next_cycle(), EngineTime::NEVER);
        assert_eq!(
            EngineTime::NEVER + Duration::from_secs(1),
            EngineTime::NEVER
        );
    }

    #[test]
    fn test_sentinels_are_not_instants() {
        assert!(!EngineTime::MIN.is_instant());
        assert!(!EngineTime::NEVER.is_instant());
        assert!(EngineTime::from_secs(1).is_instant());
    }

    #[test]
    fn test_since_saturates_at_zero() {
        let t1 = EngineTime::from_millis(10);
        let t2 = EngineTime::from_millis(20);
        assert_eq!(t2.since(t1), Duration::from_millis(10));
        assert_eq!(t1.since(t2), Duration::ZERO);
    }
}
