//! Per-detector event storage.
//!
//! An [`EventList`] holds the events of one detector for one period, either
//! as exact time-stamped events or as weight-compressed events. Lists are
//! tagged with the sort order the producing task observed so downstream
//! consumers can skip redundant sorting.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One exact raw event: time-of-flight plus the absolute pulse timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TofEvent {
    /// Time-of-flight in microseconds.
    pub tof: f64,
    /// Pulse timestamp, nanoseconds relative to the run start.
    pub pulse_time: i64,
}

/// A weight-compressed event standing in for one or more raw events.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct WeightedEvent {
    /// Time-of-flight in microseconds (bin center for compressed events).
    pub tof: f64,
    /// Pulse timestamp; zero for events produced by bin compression.
    pub pulse_time: i64,
    /// Event weight (count for compressed events).
    pub weight: f32,
    /// Squared error on the weight.
    pub error_sq: f32,
}

impl WeightedEvent {
    /// A compressed event representing `count` raw events in one fine bin.
    #[must_use]
    pub fn from_count(tof: f64, count: u64) -> Self {
        #[allow(clippy::cast_precision_loss)]
        let weight = count as f32;
        Self {
            tof,
            pulse_time: 0,
            weight,
            error_sq: weight,
        }
    }
}

/// Sort order observed on an event list or accumulator output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EventSortOrder {
    /// No ordering guarantee.
    #[default]
    Unsorted,
    /// Ascending time-of-flight.
    TofSorted,
    /// Ascending pulse time.
    PulseTimeSorted,
}

/// Which representation an [`EventList`] stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Exact time-stamped events.
    Tof,
    /// Weight-compressed events.
    Weighted,
}

#[derive(Debug, Clone, PartialEq)]
enum EventStorage {
    Tof(Vec<TofEvent>),
    Weighted(Vec<WeightedEvent>),
}

/// Per-detector, per-period event collection.
#[derive(Debug, Clone, PartialEq)]
pub struct EventList {
    storage: EventStorage,
    order: EventSortOrder,
}

impl Default for EventList {
    fn default() -> Self {
        Self {
            storage: EventStorage::Tof(Vec::new()),
            order: EventSortOrder::Unsorted,
        }
    }
}

impl EventList {
    /// Number of stored events (compressed events count once).
    #[must_use]
    pub fn len(&self) -> usize {
        match &self.storage {
            EventStorage::Tof(v) => v.len(),
            EventStorage::Weighted(v) => v.len(),
        }
    }

    /// Returns true when no events are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current storage representation.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        match &self.storage {
            EventStorage::Tof(_) => EventType::Tof,
            EventStorage::Weighted(_) => EventType::Weighted,
        }
    }

    /// Observed sort order.
    #[must_use]
    pub fn order(&self) -> EventSortOrder {
        self.order
    }

    /// Record the sort order observed by the producing task.
    pub fn set_order(&mut self, order: EventSortOrder) {
        self.order = order;
    }

    /// Switch the storage representation.
    ///
    /// Existing exact events are carried over with unit weight; weighted
    /// events cannot be demoted and are kept as-is.
    pub fn switch_to(&mut self, kind: EventType) {
        match (&mut self.storage, kind) {
            (EventStorage::Tof(events), EventType::Weighted) => {
                let weighted = events
                    .drain(..)
                    .map(|e| WeightedEvent {
                        tof: e.tof,
                        pulse_time: e.pulse_time,
                        weight: 1.0,
                        error_sq: 1.0,
                    })
                    .collect();
                self.storage = EventStorage::Weighted(weighted);
            }
            (EventStorage::Weighted(events), EventType::Tof) if events.is_empty() => {
                self.storage = EventStorage::Tof(Vec::new());
            }
            _ => {}
        }
    }

    /// Reserve room for `extra` further events.
    pub fn reserve(&mut self, extra: usize) {
        match &mut self.storage {
            EventStorage::Tof(v) => v.reserve(extra),
            EventStorage::Weighted(v) => v.reserve(extra),
        }
    }

    /// Append one exact event. On weighted storage the event is appended
    /// with unit weight.
    pub fn push_tof(&mut self, tof: f64, pulse_time: i64) {
        match &mut self.storage {
            EventStorage::Tof(v) => v.push(TofEvent { tof, pulse_time }),
            EventStorage::Weighted(v) => v.push(WeightedEvent {
                tof,
                pulse_time,
                weight: 1.0,
                error_sq: 1.0,
            }),
        }
    }

    /// Append one weighted event. On plain storage the weight is dropped
    /// after switching the list to weighted storage.
    pub fn push_weighted(&mut self, event: WeightedEvent) {
        if let EventStorage::Tof(_) = self.storage {
            self.switch_to(EventType::Weighted);
        }
        if let EventStorage::Weighted(v) = &mut self.storage {
            v.push(event);
        }
    }

    /// Exact events, if the list stores them.
    #[must_use]
    pub fn tof_events(&self) -> Option<&[TofEvent]> {
        match &self.storage {
            EventStorage::Tof(v) => Some(v),
            EventStorage::Weighted(_) => None,
        }
    }

    /// Weighted events, if the list stores them.
    #[must_use]
    pub fn weighted_events(&self) -> Option<&[WeightedEvent]> {
        match &self.storage {
            EventStorage::Weighted(v) => Some(v),
            EventStorage::Tof(_) => None,
        }
    }

    /// Sum of event weights (event count for exact lists).
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        match &self.storage {
            #[allow(clippy::cast_precision_loss)]
            EventStorage::Tof(v) => v.len() as f64,
            EventStorage::Weighted(v) => v.iter().map(|e| f64::from(e.weight)).sum(),
        }
    }

    /// Compress an exact list in place into weighted events on a linear
    /// tof grid of width `tolerance`. Pulse times are dropped. No-op for
    /// already-weighted lists or a non-positive tolerance.
    #[allow(clippy::cast_precision_loss)]
    pub fn compress(&mut self, tolerance: f64) {
        if tolerance <= 0.0 {
            return;
        }
        let EventStorage::Tof(events) = &mut self.storage else {
            return;
        };
        if events.is_empty() {
            self.storage = EventStorage::Weighted(Vec::new());
            self.order = EventSortOrder::TofSorted;
            return;
        }

        let mut tofs: Vec<f64> = events.iter().map(|e| e.tof).collect();
        tofs.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let mut out = Vec::new();
        let bin_of = |tof: f64| (tof / tolerance).floor();
        let mut current_bin = bin_of(tofs[0]);
        let mut sum = 0.0;
        let mut count = 0u64;
        for tof in tofs {
            let bin = bin_of(tof);
            #[allow(clippy::float_cmp)]
            if bin != current_bin && count > 0 {
                out.push(WeightedEvent::from_count(sum / count as f64, count));
                current_bin = bin;
                sum = 0.0;
                count = 0;
            }
            sum += tof;
            count += 1;
        }
        if count > 0 {
            out.push(WeightedEvent::from_count(sum / count as f64, count));
        }

        self.storage = EventStorage::Weighted(out);
        self.order = EventSortOrder::TofSorted;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn push_and_switch() {
        let mut list = EventList::default();
        assert!(list.is_empty());
        list.push_tof(10.0, 100);
        list.push_tof(20.0, 200);
        assert_eq!(list.len(), 2);
        assert_eq!(list.event_type(), EventType::Tof);

        list.switch_to(EventType::Weighted);
        assert_eq!(list.event_type(), EventType::Weighted);
        let weighted = list.weighted_events().unwrap();
        assert_eq!(weighted.len(), 2);
        assert_relative_eq!(f64::from(weighted[0].weight), 1.0);
        assert_eq!(weighted[1].pulse_time, 200);
    }

    #[test]
    fn compress_groups_by_tolerance() {
        let mut list = EventList::default();
        for &tof in &[10.0, 11.0, 12.0, 50.0] {
            list.push_tof(tof, 0);
        }
        list.compress(20.0);

        let weighted = list.weighted_events().unwrap();
        assert_eq!(weighted.len(), 2);
        assert_relative_eq!(weighted[0].tof, 11.0);
        assert_relative_eq!(f64::from(weighted[0].weight), 3.0);
        assert_relative_eq!(weighted[1].tof, 50.0);
        assert_eq!(list.order(), EventSortOrder::TofSorted);
        assert_relative_eq!(list.total_weight(), 4.0);
    }

    #[test]
    fn compress_ignores_weighted_lists() {
        let mut list = EventList::default();
        list.push_weighted(WeightedEvent::from_count(5.0, 3));
        list.compress(1.0);
        assert_eq!(list.len(), 1);
        assert_relative_eq!(list.total_weight(), 3.0);
    }
}
