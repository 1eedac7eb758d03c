//! Per-entity baselines for turning cumulative counters into rates.
//!
//! Owned by a single consumer thread; never shared.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::sample::{Counter, DeltaError};

/// Outcome of feeding one snapshot to a [`RateTracker`].
#[derive(Debug, PartialEq)]
pub enum Observed<R> {
    /// First snapshot for the entity; stored, nothing to forward.
    Baseline,
    /// Rate since the previous snapshot; the new snapshot is now the baseline.
    Rate(R),
    /// Counter went backwards; baseline replaced, nothing to forward.
    Reset(DeltaError),
}

/// Keeps exactly one previous snapshot per entity.
#[derive(Debug)]
pub struct RateTracker<C: Counter> {
    baselines: HashMap<C::Key, C>,
}

impl<C: Counter> Default for RateTracker<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Counter> RateTracker<C> {
    pub fn new() -> Self {
        Self {
            baselines: HashMap::new(),
        }
    }

    pub fn observe(&mut self, snapshot: C) -> Observed<C::Rate> {
        match self.baselines.entry(snapshot.key()) {
            Entry::Vacant(slot) => {
                slot.insert(snapshot);
                Observed::Baseline
            }
            Entry::Occupied(mut slot) => {
                let result = snapshot.rate_since(slot.get());
                slot.insert(snapshot);
                match result {
                    Ok(rate) => Observed::Rate(rate),
                    Err(e) => Observed::Reset(e),
                }
            }
        }
    }

    /// Observes one whole tick, then forgets every entity the tick did not
    /// contain. An entity that comes back later starts from a new baseline.
    pub fn observe_tick(&mut self, tick: Vec<C>) -> Vec<Observed<C::Rate>> {
        let mut present = HashSet::with_capacity(tick.len());
        let observed = tick
            .into_iter()
            .map(|snapshot| {
                present.insert(snapshot.key());
                self.observe(snapshot)
            })
            .collect();
        self.baselines.retain(|key, _| present.contains(key));
        observed
    }

    /// Number of entities with a stored baseline.
    pub fn tracked(&self) -> usize {
        self.baselines.len()
    }

    pub fn clear(&mut self) {
        self.baselines.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sample::{Point, Sample, delta, same_entity};
    use serde::Serialize;

    /// Two-field counter used by pipeline tests.
    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub(crate) struct Ticks {
        pub timestamp_ns: i64,
        pub id: u32,
        pub value: u64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub(crate) struct TicksDelta {
        pub timestamp_ns: i64,
        pub id: u32,
        pub value: u64,
    }

    impl Sample for Ticks {
        fn timestamp_ns(&self) -> i64 {
            self.timestamp_ns
        }

        fn point(&self) -> Point {
            Point::new("ticks", self.timestamp_ns)
                .tag("id", self.id.to_string())
                .field("value", self.value)
        }
    }

    impl Sample for TicksDelta {
        fn timestamp_ns(&self) -> i64 {
            self.timestamp_ns
        }

        fn point(&self) -> Point {
            Point::new("ticks", self.timestamp_ns)
                .tag("id", self.id.to_string())
                .field("delta", self.value)
        }
    }

    impl Counter for Ticks {
        type Key = u32;
        type Rate = TicksDelta;

        fn key(&self) -> u32 {
            self.id
        }

        fn rate_since(&self, earlier: &Self) -> Result<TicksDelta, DeltaError> {
            same_entity(&self.id, &earlier.id)?;
            Ok(TicksDelta {
                timestamp_ns: self.timestamp_ns,
                id: self.id,
                value: delta("value", self.value, earlier.value)?,
            })
        }
    }

    pub(crate) fn ticks(ts: i64, id: u32, value: u64) -> Ticks {
        Ticks {
            timestamp_ns: ts,
            id,
            value,
        }
    }

    #[test]
    fn test_first_snapshot_is_baseline_second_is_rate() {
        let mut tracker = RateTracker::new();
        assert_eq!(tracker.observe(ticks(1, 0, 100)), Observed::Baseline);
        assert_eq!(
            tracker.observe(ticks(2, 0, 130)),
            Observed::Rate(TicksDelta {
                timestamp_ns: 2,
                id: 0,
                value: 30
            })
        );
        // New baseline is the second snapshot.
        assert!(matches!(
            tracker.observe(ticks(3, 0, 131)),
            Observed::Rate(TicksDelta { value: 1, .. })
        ));
    }

    #[test]
    fn test_entities_are_independent() {
        let mut tracker = RateTracker::new();
        assert_eq!(tracker.observe(ticks(1, 0, 10)), Observed::Baseline);
        assert_eq!(tracker.observe(ticks(1, 1, 50)), Observed::Baseline);
        assert!(matches!(
            tracker.observe(ticks(2, 1, 55)),
            Observed::Rate(TicksDelta { id: 1, value: 5, .. })
        ));
        assert_eq!(tracker.tracked(), 2);
    }

    #[test]
    fn test_regression_resets_baseline() {
        let mut tracker = RateTracker::new();
        tracker.observe(ticks(1, 0, 1000));
        assert!(matches!(
            tracker.observe(ticks(2, 0, 5)),
            Observed::Reset(DeltaError::CounterRegression { field: "value", .. })
        ));
        assert!(matches!(
            tracker.observe(ticks(3, 0, 8)),
            Observed::Rate(TicksDelta { value: 3, .. })
        ));
    }

    #[test]
    fn test_rate_between_different_entities_fails() {
        let err = ticks(2, 1, 10).rate_since(&ticks(1, 0, 5)).unwrap_err();
        assert!(matches!(err, DeltaError::EntityMismatch { .. }));
    }

    #[test]
    fn test_vanished_entity_is_forgotten() {
        let mut tracker = RateTracker::new();
        tracker.observe_tick(vec![ticks(1, 0, 10), ticks(1, 7, 500)]);
        assert_eq!(tracker.tracked(), 2);

        let observed = tracker.observe_tick(vec![ticks(2, 0, 12)]);
        assert!(matches!(
            observed.as_slice(),
            [Observed::Rate(TicksDelta { id: 0, value: 2, .. })]
        ));
        assert_eq!(tracker.tracked(), 1);

        // Same id again, lower counter: a fresh baseline, not a regression.
        let observed = tracker.observe_tick(vec![ticks(3, 0, 14), ticks(3, 7, 3)]);
        assert!(matches!(observed[1], Observed::Baseline));
        assert_eq!(tracker.tracked(), 2);
    }

    #[test]
    fn test_churning_entities_do_not_accumulate() {
        let mut tracker = RateTracker::new();
        for i in 0..5000u32 {
            tracker.observe_tick(vec![ticks(i64::from(i), i, 1)]);
        }
        assert_eq!(tracker.tracked(), 1);
    }

    #[test]
    fn test_clear_forgets_baselines() {
        let mut tracker = RateTracker::new();
        tracker.observe(ticks(1, 0, 1));
        tracker.clear();
        assert_eq!(tracker.observe(ticks(2, 0, 2)), Observed::Baseline);
    }
}
