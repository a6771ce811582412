//! Compressed bank processing: per-detector accumulators, then flush.

use crate::bank::{ProcessOptions, RawEventBank};
use crate::process::{pulse_info, CANCEL_CHECK_PULSES};
use crate::{Error, Result};
use nexload_core::bins::FineBins;
use nexload_core::compress::CompressAccumulator;
use nexload_core::event::EventSortOrder;
use nexload_core::indexer::PulseIndexer;
use nexload_core::pulse::BankPulseTimes;
use nexload_core::stats::{LoadStats, LocalStats};
use nexload_core::workspace::EventWorkspace;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Detectors handled between cancellation checks in flush loops.
const CANCEL_CHECK_DETECTORS: usize = 20;

/// Convert one bank's raw arrays into weight-compressed per-detector
/// events.
///
/// Iterates pulses exactly like the direct path but feeds one
/// [`CompressAccumulator`] per (period, detector) instead of appending.
/// After accumulation the sparse accumulators are sorted in parallel,
/// then drained in detector-id order into the workspace's weighted
/// storage; every populated list comes out tof-sorted.
///
/// # Errors
/// Returns an error when the bank's `event_index` is not non-decreasing,
/// or when the flush meets a detector id with no accumulator (a
/// partitioning bug, not a data problem).
#[allow(clippy::too_many_lines)]
pub fn process_bank_compressed(
    bank: &RawEventBank,
    pulses: &BankPulseTimes,
    id_range: (u32, u32),
    bins: &Arc<FineBins>,
    workspace: &EventWorkspace,
    options: &ProcessOptions,
    stats: &LoadStats,
    cancel: &AtomicBool,
) -> Result<()> {
    let indexer = PulseIndexer::new(bank.event_index.clone(), bank.first_event_index, bank.len())?;
    let map = workspace.index_map();
    let num_periods = workspace.num_periods();
    let (range_min, range_max) = id_range;
    let span = (range_max - range_min) as usize + 1;
    let expected_per_detector = bank.len() / span.max(1);
    let mut local = LocalStats::default();

    // One accumulator per (period, id-in-range), indexed by id offset so
    // the hot loop avoids the workspace map.
    let mut accumulators: Vec<Vec<CompressAccumulator>> = (0..num_periods)
        .map(|_| {
            (0..span)
                .map(|_| CompressAccumulator::create(bins.clone(), expected_per_detector))
                .collect()
        })
        .collect();

    let first_pulse = indexer.first_pulse_index();
    for (i, pulse) in (first_pulse..indexer.num_pulses()).enumerate() {
        if i % CANCEL_CHECK_PULSES == 0 && cancel.load(Ordering::Relaxed) {
            stats.merge(&local);
            return Ok(());
        }
        let (start, end) = indexer.event_range(pulse);
        if start >= end {
            continue;
        }
        let (pulse_time, period) = pulse_info(pulses, pulse);
        if !options.pulse_allowed(pulse_time) {
            continue;
        }
        let period = period.min(num_periods - 1);

        for ev in start..end {
            let id = bank.detector_ids[ev];
            if id < range_min || id > range_max {
                continue;
            }
            let tof = bank.tofs[ev];
            if !options.tof_allowed(tof) {
                local.discard();
                continue;
            }
            if map.index_of(id).is_none() {
                local.discard();
                continue;
            }
            let offset = (id - range_min) as usize;
            if accumulators[period][offset].add_event(tof) {
                local.accept(tof);
            } else {
                // Outside the fine-bin span.
                local.discard();
            }
        }
    }

    // Parallel pre-sort, one task per detector, checking cancellation
    // between small groups.
    for period_accs in &mut accumulators {
        period_accs
            .par_chunks_mut(CANCEL_CHECK_DETECTORS)
            .for_each(|group| {
                if cancel.load(Ordering::Relaxed) {
                    return;
                }
                for acc in group {
                    acc.sort();
                }
            });
    }
    if cancel.load(Ordering::Relaxed) {
        stats.merge(&local);
        return Ok(());
    }

    // Drain in detector-id order.
    let mut out = Vec::new();
    for (period, period_accs) in accumulators.iter_mut().enumerate() {
        for (handled, id) in (range_min..=range_max).enumerate() {
            if handled % CANCEL_CHECK_DETECTORS == 0 && cancel.load(Ordering::Relaxed) {
                stats.merge(&local);
                return Ok(());
            }
            let Some(slot) = map.index_of(id) else {
                continue;
            };
            let acc = period_accs
                .get_mut((id - range_min) as usize)
                .ok_or_else(|| {
                    Error::CoreError(nexload_core::Error::AccumulatorError(format!(
                        "no accumulator for detector {id} in range [{range_min}, {range_max}]"
                    )))
                })?;
            out.clear();
            acc.create_weighted_events(&mut out);
            if out.is_empty() {
                continue;
            }
            let mut list = workspace
                .list(period, slot)
                .lock()
                .expect("event list lock poisoned");
            list.reserve(out.len());
            for &event in &out {
                list.push_weighted(event);
            }
            list.set_order(EventSortOrder::TofSorted);
        }
    }

    stats.merge(&local);
    Ok(())
}
