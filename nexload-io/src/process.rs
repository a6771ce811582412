//! Direct (uncompressed) bank processing: exact per-detector appends.

use crate::bank::{ProcessOptions, RawEventBank};
use crate::Result;
use nexload_core::event::{EventSortOrder, WeightedEvent};
use nexload_core::indexer::PulseIndexer;
use nexload_core::pulse::BankPulseTimes;
use nexload_core::stats::{LoadStats, LocalStats};
use nexload_core::workspace::EventWorkspace;
use std::sync::atomic::{AtomicBool, Ordering};

/// Pulses processed between cancellation checks.
pub(crate) const CANCEL_CHECK_PULSES: usize = 6000;

/// Pulse timestamp and period, clamped to the last pulse when the
/// `event_index` array outruns the pulse table.
pub(crate) fn pulse_info(pulses: &BankPulseTimes, pulse: usize) -> (i64, usize) {
    if pulses.is_empty() {
        return (0, 0);
    }
    let i = pulse.min(pulses.len() - 1);
    (pulses.pulse_time(i), pulses.period_number(i))
}

/// Convert one bank's raw arrays into exact per-detector events.
///
/// Only events whose detector id lies in the inclusive `id_range`
/// partition are handled; ids outside it belong to a sibling task over
/// the complementary sub-range. Events whose id has no workspace slot or
/// whose tof fails the filter are dropped and counted. Returns early,
/// without error, when cancellation is observed; the workspace is then
/// partially filled and must be discarded wholesale.
///
/// # Errors
/// Returns an error when the bank's `event_index` is not non-decreasing.
pub fn process_bank_data(
    bank: &RawEventBank,
    pulses: &BankPulseTimes,
    id_range: (u32, u32),
    workspace: &EventWorkspace,
    options: &ProcessOptions,
    stats: &LoadStats,
    cancel: &AtomicBool,
) -> Result<()> {
    let indexer = PulseIndexer::new(bank.event_index.clone(), bank.first_event_index, bank.len())?;
    let map = workspace.index_map();
    let num_slots = workspace.num_detectors();
    let num_periods = workspace.num_periods();
    let (range_min, range_max) = id_range;
    let mut local = LocalStats::default();

    if options.precount && num_periods == 1 {
        let mut counts = vec![0usize; num_slots];
        for &id in &bank.detector_ids {
            if id < range_min || id > range_max {
                continue;
            }
            if let Some(slot) = map.index_of(id) {
                counts[slot] += 1;
            }
        }
        for (slot, &count) in counts.iter().enumerate() {
            if count > 0 {
                workspace
                    .list(0, slot)
                    .lock()
                    .expect("event list lock poisoned")
                    .reserve(count);
            }
        }
    }

    let mut touched = vec![false; num_periods * num_slots];
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
            let Some(slot) = map.index_of(id) else {
                local.discard();
                continue;
            };
            {
                let mut list = workspace
                    .list(period, slot)
                    .lock()
                    .expect("event list lock poisoned");
                match &bank.weights {
                    Some(weights) => {
                        let weight = weights[ev];
                        list.push_weighted(WeightedEvent {
                            tof,
                            pulse_time,
                            weight,
                            error_sq: weight * weight,
                        });
                    }
                    None => list.push_tof(tof, pulse_time),
                }
            }
            touched[period * num_slots + slot] = true;
            local.accept(tof);
        }
    }

    let order = if pulses.is_increasing() {
        EventSortOrder::PulseTimeSorted
    } else {
        EventSortOrder::Unsorted
    };
    for period in 0..num_periods {
        for slot in 0..num_slots {
            if !touched[period * num_slots + slot] {
                continue;
            }
            let mut list = workspace
                .list(period, slot)
                .lock()
                .expect("event list lock poisoned");
            list.set_order(order);
            if let Some(tolerance) = options.post_compress_tolerance {
                list.compress(tolerance.abs());
            }
        }
    }

    stats.merge(&local);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nexload_core::workspace::DetectorIndexMap;
    use std::sync::Arc;

    fn bank(ids: Vec<u32>, tofs: Vec<f64>, event_index: Vec<u64>) -> RawEventBank {
        let min_id = ids.iter().copied().min().unwrap_or(0);
        let max_id = ids.iter().copied().max().unwrap_or(0);
        RawEventBank {
            name: "bank1_events".to_string(),
            detector_ids: ids,
            tofs,
            weights: None,
            event_index: Arc::new(event_index),
            first_event_index: 0,
            min_id,
            max_id,
        }
    }

    fn pulses(times: &[i64]) -> BankPulseTimes {
        BankPulseTimes::new("2024-03-01T00:00:00+00:00".to_string(), times.to_vec(), None)
    }

    fn run(
        bank: &RawEventBank,
        pulses: &BankPulseTimes,
        options: &ProcessOptions,
    ) -> (EventWorkspace, LoadStats) {
        let map = DetectorIndexMap::from_span(bank.min_id, bank.max_id, None);
        let workspace = EventWorkspace::new(map, 1);
        let stats = LoadStats::default();
        let cancel = AtomicBool::new(false);
        process_bank_data(
            bank,
            pulses,
            (bank.min_id, bank.max_id),
            &workspace,
            options,
            &stats,
            &cancel,
        )
        .unwrap();
        (workspace, stats)
    }

    #[test]
    fn events_land_on_their_pulse_and_detector() {
        let bank = bank(
            vec![10, 11, 10, 12, 11],
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![0, 2, 2, 5],
        );
        let pulses = pulses(&[0, 100, 200, 300]);
        let (ws, stats) = run(&bank, &pulses, &ProcessOptions::default());

        let slot10 = ws.index_map().index_of(10).unwrap();
        let list = ws.list(0, slot10).lock().unwrap();
        let events = list.tof_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_relative_eq!(events[0].tof, 1.0);
        assert_eq!(events[0].pulse_time, 0);
        // Third event belongs to pulse 2 (pulse 1 is empty).
        assert_relative_eq!(events[1].tof, 3.0);
        assert_eq!(events[1].pulse_time, 200);
        assert_eq!(list.order(), EventSortOrder::PulseTimeSorted);
        drop(list);

        assert_eq!(ws.total_events(), 5);
        let snap = stats.snapshot();
        assert_eq!(snap.accepted_events, 5);
        assert_eq!(snap.discarded_events, 0);
        assert_relative_eq!(snap.shortest_tof, 1.0);
        assert_relative_eq!(snap.longest_tof, 5.0);
    }

    #[test]
    fn filters_drop_and_count_exactly_once() {
        let bank = bank(
            vec![10, 11, 99, 10],
            vec![1.0, 50.0, 2.0, 3.0],
            vec![0],
        );
        let pulses = pulses(&[0]);
        let options = ProcessOptions {
            tof_min: 0.0,
            tof_max: 10.0,
            ..ProcessOptions::default()
        };

        // Map excludes id 99 even though it sits in the bank span.
        let map = DetectorIndexMap::from_span(10, 99, Some((10, 12)));
        let workspace = EventWorkspace::new(map, 1);
        let stats = LoadStats::default();
        let cancel = AtomicBool::new(false);
        process_bank_data(
            &bank,
            &pulses,
            (10, 99),
            &workspace,
            &options,
            &stats,
            &cancel,
        )
        .unwrap();

        // tof 50 filtered, id 99 unmapped; two discards, two accepts.
        let snap = stats.snapshot();
        assert_eq!(snap.accepted_events, 2);
        assert_eq!(snap.discarded_events, 2);
        assert_eq!(workspace.total_events(), 2);
    }

    #[test]
    fn sibling_range_events_are_skipped_silently() {
        let bank = bank(vec![10, 11, 12, 13], vec![1.0; 4], vec![0]);
        let pulses = pulses(&[0]);
        let map = DetectorIndexMap::from_span(10, 13, None);
        let workspace = EventWorkspace::new(map, 1);
        let stats = LoadStats::default();
        let cancel = AtomicBool::new(false);

        // Two sibling tasks over the two halves of the id span.
        for range in [(10, 11), (12, 13)] {
            process_bank_data(
                &bank,
                &pulses,
                range,
                &workspace,
                &ProcessOptions::default(),
                &stats,
                &cancel,
            )
            .unwrap();
        }

        let snap = stats.snapshot();
        assert_eq!(snap.accepted_events, 4);
        assert_eq!(snap.discarded_events, 0);
        assert_eq!(workspace.total_events(), 4);
    }

    #[test]
    fn time_filter_skips_whole_pulses() {
        let bank = bank(vec![10, 10, 10], vec![1.0, 2.0, 3.0], vec![0, 1, 2]);
        let pulses = pulses(&[0, 100, 200]);
        let options = ProcessOptions {
            time_filter: Some((50, 150)),
            ..ProcessOptions::default()
        };
        let (ws, stats) = run(&bank, &pulses, &options);
        assert_eq!(ws.total_events(), 1);
        assert_relative_eq!(stats.snapshot().shortest_tof, 2.0);
    }

    #[test]
    fn simulated_weights_append_weighted_events() {
        let mut bank = bank(vec![10, 10], vec![1.0, 2.0], vec![0]);
        bank.weights = Some(vec![0.5, 2.0]);
        let pulses = pulses(&[0]);
        let (ws, _) = run(&bank, &pulses, &ProcessOptions::default());

        let slot = ws.index_map().index_of(10).unwrap();
        let list = ws.list(0, slot).lock().unwrap();
        let events = list.weighted_events().unwrap();
        assert_relative_eq!(f64::from(events[0].weight), 0.5);
        assert_relative_eq!(f64::from(events[1].error_sq), 4.0);
    }

    #[test]
    fn post_compress_tolerance_converts_lists() {
        let bank = bank(vec![10, 10, 10], vec![1.0, 1.5, 9.0], vec![0]);
        let pulses = pulses(&[0]);
        let options = ProcessOptions {
            post_compress_tolerance: Some(2.0),
            ..ProcessOptions::default()
        };
        let (ws, _) = run(&bank, &pulses, &options);

        let slot = ws.index_map().index_of(10).unwrap();
        let list = ws.list(0, slot).lock().unwrap();
        let events = list.weighted_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_relative_eq!(f64::from(events[0].weight), 2.0);
    }

    #[test]
    fn cancellation_returns_early_without_error() {
        let bank = bank(vec![10, 10], vec![1.0, 2.0], vec![0, 1]);
        let pulses = pulses(&[0, 100]);
        let map = DetectorIndexMap::from_span(10, 10, None);
        let workspace = EventWorkspace::new(map, 1);
        let stats = LoadStats::default();
        let cancel = AtomicBool::new(true);
        process_bank_data(
            &bank,
            &pulses,
            (10, 10),
            &workspace,
            &ProcessOptions::default(),
            &stats,
            &cancel,
        )
        .unwrap();
        assert_eq!(workspace.total_events(), 0);
    }

    #[test]
    fn unsorted_event_index_is_fatal() {
        let bank = bank(vec![10, 10, 10], vec![1.0; 3], vec![0, 2, 1]);
        let pulses = pulses(&[0, 1, 2]);
        let map = DetectorIndexMap::from_span(10, 10, None);
        let workspace = EventWorkspace::new(map, 1);
        let stats = LoadStats::default();
        let cancel = AtomicBool::new(false);
        let err = process_bank_data(
            &bank,
            &pulses,
            (10, 10),
            &workspace,
            &ProcessOptions::default(),
            &stats,
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::CoreError(nexload_core::Error::UnsortedEventIndex(_))
        ));
    }
}
