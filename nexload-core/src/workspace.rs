//! Output workspace: per-period, per-detector event storage.

use crate::event::{EventList, EventType};
use std::sync::Mutex;

/// Offset-adjusted lookup from detector id to a workspace slot.
///
/// Built once by the loader, either from the instrument's detector ids or
/// from spectrum numbers; ids outside a requested spectrum sub-range map
/// to nothing, which downstream code treats as "intentionally excluded"
/// rather than an error.
#[derive(Debug, Clone)]
pub struct DetectorIndexMap {
    min_id: u32,
    slots: Vec<Option<u32>>,
    mapped: usize,
}

impl DetectorIndexMap {
    /// Build a map over `ids`, optionally clamped to an inclusive
    /// `[min, max]` id sub-range. Slot order follows ascending id.
    #[must_use]
    pub fn from_ids(ids: &[u32], bounds: Option<(u32, u32)>) -> Self {
        let mut sorted: Vec<u32> = ids
            .iter()
            .copied()
            .filter(|&id| bounds.is_none_or(|(lo, hi)| id >= lo && id <= hi))
            .collect();
        sorted.sort_unstable();
        sorted.dedup();

        let min_id = sorted.first().copied().unwrap_or(0);
        let max_id = sorted.last().copied().unwrap_or(0);
        let span = (max_id - min_id) as usize + 1;
        let mut slots = vec![None; if sorted.is_empty() { 0 } else { span }];
        for (slot, &id) in sorted.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let slot = slot as u32;
            slots[(id - min_id) as usize] = Some(slot);
        }
        Self {
            min_id,
            slots,
            mapped: sorted.len(),
        }
    }

    /// Build a map over the full inclusive id span `[min_id, max_id]`,
    /// optionally clamped to a spectrum sub-range. Every id in the
    /// (clamped) span gets a slot; used when the detector universe is
    /// known only as a range.
    #[must_use]
    pub fn from_span(min_id: u32, max_id: u32, bounds: Option<(u32, u32)>) -> Self {
        let (min_id, max_id) = match bounds {
            Some((lo, hi)) => (min_id.max(lo), max_id.min(hi)),
            None => (min_id, max_id),
        };
        if min_id > max_id {
            return Self {
                min_id: 0,
                slots: Vec::new(),
                mapped: 0,
            };
        }
        let span = (max_id - min_id) as usize + 1;
        #[allow(clippy::cast_possible_truncation)]
        let slots = (0..span).map(|i| Some(i as u32)).collect();
        Self {
            min_id,
            slots,
            mapped: span,
        }
    }

    /// Number of mapped detectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mapped
    }

    /// Returns true when no detector is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mapped == 0
    }

    /// Inclusive id span covered by the map, `(min_id, max_id)`.
    #[must_use]
    pub fn id_span(&self) -> (u32, u32) {
        if self.slots.is_empty() {
            (0, 0)
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let max = self.min_id + (self.slots.len() - 1) as u32;
            (self.min_id, max)
        }
    }

    /// Workspace slot for `id`, or `None` when the detector is excluded.
    #[must_use]
    pub fn index_of(&self, id: u32) -> Option<usize> {
        let local = id.checked_sub(self.min_id)? as usize;
        self.slots.get(local).copied().flatten().map(|s| s as usize)
    }
}

/// Per-period, per-detector event store.
///
/// Each list sits behind its own mutex. Tasks partition the detector-id
/// space into disjoint sub-ranges, so the locks are uncontended in
/// practice; they exist to make the partitioning sound rather than fast.
#[derive(Debug)]
pub struct EventWorkspace {
    map: DetectorIndexMap,
    periods: Vec<Vec<Mutex<EventList>>>,
}

impl EventWorkspace {
    /// Allocate empty lists for every (period, detector) pair.
    #[must_use]
    pub fn new(map: DetectorIndexMap, num_periods: usize) -> Self {
        let num_periods = num_periods.max(1);
        let periods = (0..num_periods)
            .map(|_| (0..map.len()).map(|_| Mutex::new(EventList::default())).collect())
            .collect();
        Self { map, periods }
    }

    /// Detector id lookup.
    #[must_use]
    pub fn index_map(&self) -> &DetectorIndexMap {
        &self.map
    }

    /// Number of periods.
    #[must_use]
    pub fn num_periods(&self) -> usize {
        self.periods.len()
    }

    /// Number of detector slots per period.
    #[must_use]
    pub fn num_detectors(&self) -> usize {
        self.map.len()
    }

    /// The event list for `(period, slot)`.
    ///
    /// # Panics
    /// Panics when the lock is poisoned; a poisoned list means a producing
    /// task panicked and the workspace contents are not trustworthy.
    #[must_use]
    pub fn list(&self, period: usize, slot: usize) -> &Mutex<EventList> {
        &self.periods[period][slot]
    }

    /// Switch every list to the given storage representation.
    pub fn switch_to(&self, kind: EventType) {
        for period in &self.periods {
            for list in period {
                list.lock().expect("event list lock poisoned").switch_to(kind);
            }
        }
    }

    /// Total events across all periods and detectors.
    #[must_use]
    pub fn total_events(&self) -> usize {
        self.periods
            .iter()
            .flatten()
            .map(|list| list.lock().expect("event list lock poisoned").len())
            .sum()
    }

    /// Total event weight across all periods and detectors.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        self.periods
            .iter()
            .flatten()
            .map(|list| list.lock().expect("event list lock poisoned").total_weight())
            .sum()
    }
}
