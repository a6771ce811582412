//! Online per-detector event compression.
//!
//! A [`CompressAccumulator`] ingests raw tof values for one detector and
//! one period, binning them on a shared [`FineBins`] grid, and later drains
//! into weight-compressed events. Two shapes exist: a sparse list of
//! per-event bin indices for detectors expected to see few events, and a
//! dense counter array for busy detectors. The factory picks the shape by
//! comparing the expected event count to the number of fine bins; both
//! shapes conserve total weight for identical input.

use crate::bins::FineBins;
use crate::event::{EventSortOrder, WeightedEvent};
use rayon::prelude::*;
use std::sync::Arc;

/// Below this many events the sparse finalizer groups by partition
/// instead of sorting.
const SORT_THRESHOLD: usize = 1000;
/// Above this many events sorting goes parallel.
const PARALLEL_SORT_THRESHOLD: usize = 100_000;

/// Per-detector online histogram, sparse or dense.
#[derive(Debug)]
pub enum CompressAccumulator {
    /// Growing list of per-event fine-bin indices.
    Sparse(SparseAccumulator),
    /// One counter per fine bin.
    Dense(DenseAccumulator),
}

impl CompressAccumulator {
    /// Factory: sparse when the expected event count is smaller than the
    /// number of fine bins, dense otherwise. A locality heuristic, not a
    /// correctness requirement.
    #[must_use]
    pub fn create(bins: Arc<FineBins>, expected_events: usize) -> Self {
        if expected_events < bins.num_bins() {
            Self::Sparse(SparseAccumulator::new(bins))
        } else {
            Self::Dense(DenseAccumulator::new(bins))
        }
    }

    /// Bin one raw tof value. Returns false when the value falls outside
    /// the fine-bin span and was dropped.
    pub fn add_event(&mut self, tof: f64) -> bool {
        match self {
            Self::Sparse(acc) => acc.add_event(tof),
            Self::Dense(acc) => acc.add_event(tof),
        }
    }

    /// Pre-sort internal state so the later drain is cheap and emits
    /// tof-ordered events. No-op for the dense shape.
    pub fn sort(&mut self) {
        if let Self::Sparse(acc) = self {
            acc.sort();
        }
    }

    /// Drain into weighted events, clearing internal state. A second call
    /// on an unrefilled accumulator emits nothing.
    pub fn create_weighted_events(&mut self, out: &mut Vec<WeightedEvent>) {
        match self {
            Self::Sparse(acc) => acc.create_weighted_events(out),
            Self::Dense(acc) => acc.create_weighted_events(out),
        }
    }

    /// Sum of currently held counts.
    #[must_use]
    pub fn total_weight(&self) -> f64 {
        match self {
            Self::Sparse(acc) => acc.total_weight(),
            Self::Dense(acc) => acc.total_weight(),
        }
    }

    /// Ordering of the events the last drain produced (or will produce).
    #[must_use]
    pub fn sort_type(&self) -> EventSortOrder {
        match self {
            Self::Sparse(acc) => acc.order,
            Self::Dense(_) => EventSortOrder::TofSorted,
        }
    }
}

/// Sparse shape: per-event bin indices.
#[derive(Debug)]
pub struct SparseAccumulator {
    bins: Arc<FineBins>,
    indices: Vec<u32>,
    sorted: bool,
    order: EventSortOrder,
}

impl SparseAccumulator {
    fn new(bins: Arc<FineBins>) -> Self {
        Self {
            bins,
            indices: Vec::new(),
            sorted: false,
            order: EventSortOrder::Unsorted,
        }
    }

    fn add_event(&mut self, tof: f64) -> bool {
        match self.bins.find_bin(tof) {
            Some(bin) => {
                #[allow(clippy::cast_possible_truncation)]
                self.indices.push(bin as u32);
                self.sorted = false;
                true
            }
            None => false,
        }
    }

    fn sort(&mut self) {
        if self.sorted || self.indices.len() < 2 {
            self.sorted = true;
            return;
        }
        if self.indices.len() > PARALLEL_SORT_THRESHOLD {
            self.indices.par_sort_unstable();
        } else {
            self.indices.sort_unstable();
        }
        self.sorted = true;
    }

    fn create_weighted_events(&mut self, out: &mut Vec<WeightedEvent>) {
        let n = self.indices.len();
        if n == 0 {
            return;
        }
        if n == 1 {
            let bin = self.indices[0] as usize;
            out.push(WeightedEvent::from_count(self.bins.center(bin), 1));
            self.indices.clear();
            self.order = EventSortOrder::TofSorted;
            return;
        }

        if !self.sorted && n < SORT_THRESHOLD {
            // Partition-based grouping: cheap for tiny n, avoids the sort,
            // emits in first-seen (unsorted) bin order.
            let mut indices = std::mem::take(&mut self.indices);
            while let Some(&bin) = indices.first() {
                let before = indices.len();
                indices.retain(|&b| b != bin);
                let count = (before - indices.len()) as u64;
                out.push(WeightedEvent::from_count(
                    self.bins.center(bin as usize),
                    count,
                ));
            }
            self.order = EventSortOrder::Unsorted;
            return;
        }

        self.sort();
        for run in self.indices.chunk_by(|a, b| a == b) {
            out.push(WeightedEvent::from_count(
                self.bins.center(run[0] as usize),
                run.len() as u64,
            ));
        }
        self.indices.clear();
        self.order = EventSortOrder::TofSorted;
    }

    #[allow(clippy::cast_precision_loss)]
    fn total_weight(&self) -> f64 {
        self.indices.len() as f64
    }
}

/// Dense shape: one counter per fine bin, allocated lazily on the first
/// event. Counters are 32-bit; an 8-bit counter would silently wrap at
/// realistic per-bin event rates.
#[derive(Debug)]
pub struct DenseAccumulator {
    bins: Arc<FineBins>,
    counts: Option<Vec<u32>>,
}

impl DenseAccumulator {
    fn new(bins: Arc<FineBins>) -> Self {
        Self { bins, counts: None }
    }

    fn add_event(&mut self, tof: f64) -> bool {
        match self.bins.find_bin(tof) {
            Some(bin) => {
                let counts = self
                    .counts
                    .get_or_insert_with(|| vec![0; self.bins.num_bins()]);
                counts[bin] = counts[bin].saturating_add(1);
                true
            }
            None => false,
        }
    }

    fn create_weighted_events(&mut self, out: &mut Vec<WeightedEvent>) {
        let Some(counts) = self.counts.take() else {
            return;
        };
        for (bin, &count) in counts.iter().enumerate() {
            if count > 0 {
                out.push(WeightedEvent::from_count(
                    self.bins.center(bin),
                    u64::from(count),
                ));
            }
        }
    }

    fn total_weight(&self) -> f64 {
        match &self.counts {
            Some(counts) => counts.iter().map(|&c| f64::from(c)).sum(),
            None => 0.0,
        }
    }
}
