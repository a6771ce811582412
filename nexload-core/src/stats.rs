//! Cross-task load statistics.

use std::sync::Mutex;

/// Per-task statistics, accumulated lock-free and merged into
/// [`LoadStats`] once at task end.
#[derive(Debug, Clone, Copy)]
pub struct LocalStats {
    /// Shortest accepted time-of-flight, microseconds.
    pub shortest_tof: f64,
    /// Longest accepted time-of-flight, microseconds.
    pub longest_tof: f64,
    /// Accepted events.
    pub accepted_events: u64,
    /// Events dropped by id/tof filters or a null destination.
    pub discarded_events: u64,
}

impl Default for LocalStats {
    fn default() -> Self {
        Self {
            shortest_tof: f64::INFINITY,
            longest_tof: f64::NEG_INFINITY,
            accepted_events: 0,
            discarded_events: 0,
        }
    }
}

impl LocalStats {
    /// Record one accepted event.
    pub fn accept(&mut self, tof: f64) {
        self.accepted_events += 1;
        if tof < self.shortest_tof {
            self.shortest_tof = tof;
        }
        if tof > self.longest_tof {
            self.longest_tof = tof;
        }
    }

    /// Record one dropped event.
    pub fn discard(&mut self) {
        self.discarded_events += 1;
    }
}

/// Mutex-guarded aggregate shared by all bank tasks.
///
/// Owned by the orchestrator and passed by shared reference into each
/// task; tasks touch the lock exactly once, when merging their
/// [`LocalStats`], so contention stays negligible.
#[derive(Debug, Default)]
pub struct LoadStats {
    inner: Mutex<StatsSnapshot>,
}

/// A point-in-time copy of the aggregate.
#[derive(Debug, Clone, Copy)]
pub struct StatsSnapshot {
    /// Shortest accepted time-of-flight, microseconds.
    pub shortest_tof: f64,
    /// Longest accepted time-of-flight, microseconds.
    pub longest_tof: f64,
    /// Accepted events across all tasks.
    pub accepted_events: u64,
    /// Discarded events across all tasks.
    pub discarded_events: u64,
}

impl Default for StatsSnapshot {
    fn default() -> Self {
        Self {
            shortest_tof: f64::INFINITY,
            longest_tof: f64::NEG_INFINITY,
            accepted_events: 0,
            discarded_events: 0,
        }
    }
}

impl LoadStats {
    /// Fold one task's statistics into the aggregate.
    pub fn merge(&self, local: &LocalStats) {
        let mut inner = self.inner.lock().expect("stats lock poisoned");
        inner.shortest_tof = inner.shortest_tof.min(local.shortest_tof);
        inner.longest_tof = inner.longest_tof.max(local.longest_tof);
        inner.accepted_events += local.accepted_events;
        inner.discarded_events += local.discarded_events;
    }

    /// Copy out the current aggregate.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        *self.inner.lock().expect("stats lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn merge_tracks_extrema_and_counts() {
        let stats = LoadStats::default();

        let mut a = LocalStats::default();
        a.accept(10.0);
        a.accept(50.0);
        a.discard();

        let mut b = LocalStats::default();
        b.accept(5.0);

        stats.merge(&a);
        stats.merge(&b);

        let snap = stats.snapshot();
        assert_relative_eq!(snap.shortest_tof, 5.0);
        assert_relative_eq!(snap.longest_tof, 50.0);
        assert_eq!(snap.accepted_events, 3);
        assert_eq!(snap.discarded_events, 1);
    }

    #[test]
    fn empty_snapshot_has_inverted_extrema() {
        let snap = LoadStats::default().snapshot();
        assert!(snap.shortest_tof > snap.longest_tof);
        assert_eq!(snap.accepted_events, 0);
    }
}
