//! Mapping between raw event-array positions and pulses.

use crate::error::{Error, Result};
use std::sync::Arc;

/// Maps a (possibly chunk-offset) event-array position to its owning
/// pulse, and a pulse to its half-open event-index range local to the
/// chunk.
///
/// Constructed from a bank's cumulative `event_index` array, the absolute
/// index of the chunk's first event, and the chunk's event count.
/// Iterating pulses in increasing order and concatenating their ranges
/// tiles `[0, num_events)` exactly.
#[derive(Debug, Clone)]
pub struct PulseIndexer {
    event_index: Arc<Vec<u64>>,
    first_event_index: u64,
    num_events: usize,
}

impl PulseIndexer {
    /// Build an indexer over a non-decreasing `event_index` array.
    ///
    /// # Errors
    /// Returns [`Error::UnsortedEventIndex`] when the array decreases
    /// anywhere; a decreasing cumulative offset is a corrupt bank.
    pub fn new(
        event_index: Arc<Vec<u64>>,
        first_event_index: u64,
        num_events: usize,
    ) -> Result<Self> {
        if let Some(p) = event_index.windows(2).position(|w| w[0] > w[1]) {
            return Err(Error::UnsortedEventIndex(p + 1));
        }
        Ok(Self {
            event_index,
            first_event_index,
            num_events,
        })
    }

    /// Number of pulses covered by the `event_index` array.
    #[must_use]
    pub fn num_pulses(&self) -> usize {
        self.event_index.len()
    }

    /// Events in the chunk this indexer describes.
    #[must_use]
    pub fn num_events(&self) -> usize {
        self.num_events
    }

    /// First pulse whose event range intersects the chunk's first event.
    ///
    /// A linear scan; repeated or zero entries (an instrument reporting no
    /// real pulse boundaries) resolve to the first pulse with a non-empty
    /// range containing the offset.
    #[must_use]
    pub fn first_pulse_index(&self) -> usize {
        let mut p = 0;
        while p + 1 < self.event_index.len() && self.event_index[p + 1] <= self.first_event_index {
            p += 1;
        }
        p
    }

    /// Half-open event range of `pulse`, local to the chunk. Degenerate
    /// ranges (`start == end`) mean the pulse owns no events within the
    /// chunk.
    #[must_use]
    pub fn event_range(&self, pulse: usize) -> (usize, usize) {
        let local = |abs: u64| -> usize {
            let shifted = abs.saturating_sub(self.first_event_index);
            usize::try_from(shifted)
                .unwrap_or(self.num_events)
                .min(self.num_events)
        };
        let end = if pulse + 1 < self.event_index.len() {
            local(self.event_index[pulse + 1])
        } else {
            self.num_events
        };
        let start = local(self.event_index[pulse]).min(end);
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexer(index: &[u64], first: u64, num_events: usize) -> PulseIndexer {
        PulseIndexer::new(Arc::new(index.to_vec()), first, num_events).unwrap()
    }

    #[test]
    fn pulse_tiling_with_empty_pulse() {
        let idx = indexer(&[0, 2, 2, 5], 0, 5);
        assert_eq!(idx.first_pulse_index(), 0);
        assert_eq!(idx.event_range(0), (0, 2));
        assert_eq!(idx.event_range(1), (2, 2));
        assert_eq!(idx.event_range(2), (2, 5));
        assert_eq!(idx.event_range(3), (5, 5));
    }

    #[test]
    fn chunked_offset() {
        let idx = indexer(&[10, 12, 15, 18], 10, 8);
        assert_eq!(idx.first_pulse_index(), 0);
        assert_eq!(idx.event_range(0), (0, 2));
        assert_eq!(idx.event_range(1), (2, 5));
        assert_eq!(idx.event_range(2), (5, 8));
        assert_eq!(idx.event_range(3), (8, 8));
    }

    #[test]
    fn offset_into_later_pulse() {
        let idx = indexer(&[0, 4, 8, 12], 6, 6);
        assert_eq!(idx.first_pulse_index(), 1);
        assert_eq!(idx.event_range(0), (0, 0));
        assert_eq!(idx.event_range(1), (0, 2));
        assert_eq!(idx.event_range(2), (2, 6));
        assert_eq!(idx.event_range(3), (6, 6));
    }

    #[test]
    fn zero_entries_resolve_to_owning_pulse() {
        let idx = indexer(&[0, 0, 0, 5], 0, 5);
        assert_eq!(idx.first_pulse_index(), 2);
        assert_eq!(idx.event_range(0), (0, 0));
        assert_eq!(idx.event_range(1), (0, 0));
        assert_eq!(idx.event_range(2), (0, 5));
    }

    #[test]
    fn ranges_tile_exactly() {
        let cases: &[(&[u64], u64, usize)] = &[
            (&[0, 2, 2, 5], 0, 5),
            (&[10, 12, 15, 18], 10, 8),
            (&[0, 0, 7, 7, 9], 3, 6),
            (&[5], 5, 4),
        ];
        for &(index, first, num_events) in cases {
            let idx = indexer(index, first, num_events);
            let mut next = 0usize;
            for p in 0..idx.num_pulses() {
                let (start, end) = idx.event_range(p);
                assert!(start <= end, "inverted range at pulse {p}");
                if start < end {
                    assert_eq!(start, next, "gap or overlap at pulse {p}");
                    next = end;
                }
            }
            assert_eq!(next, num_events, "ranges do not cover the chunk");
        }
    }

    #[test]
    fn rejects_decreasing_index() {
        let err = PulseIndexer::new(Arc::new(vec![0, 5, 3]), 0, 5).unwrap_err();
        assert!(matches!(err, Error::UnsortedEventIndex(2)));
    }
}
