//! Raw per-bank event arrays and processing options.

use crate::{Error, Result};

/// One bank's raw event arrays as read from disk.
///
/// Shared read-only across the task(s) processing the bank and dropped
/// when the last one finishes. `first_event_index` is the absolute index
/// of the first event in this chunk, so the arrays may cover only a slice
/// of the bank for partial loads.
#[derive(Debug, Clone)]
pub struct RawEventBank {
    /// Bank group name.
    pub name: String,
    /// Per-event detector ids.
    pub detector_ids: Vec<u32>,
    /// Per-event time-of-flight, microseconds.
    pub tofs: Vec<f64>,
    /// Optional simulated per-event weights.
    pub weights: Option<Vec<f32>>,
    /// Cumulative event offset per pulse, absolute within the bank.
    pub event_index: std::sync::Arc<Vec<u64>>,
    /// Absolute index of the first event in this chunk.
    pub first_event_index: u64,
    /// Smallest detector id seen in the chunk.
    pub min_id: u32,
    /// Largest detector id seen in the chunk.
    pub max_id: u32,
}

impl RawEventBank {
    /// Number of events in the chunk.
    #[must_use]
    pub fn len(&self) -> usize {
        self.detector_ids.len()
    }

    /// Returns true when the chunk holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.detector_ids.is_empty()
    }

    /// Structural validation: parallel arrays must agree in length.
    ///
    /// # Errors
    /// Returns [`Error::InvalidFormat`] on any length mismatch.
    pub fn validate(&self) -> Result<()> {
        if self.tofs.len() != self.detector_ids.len() {
            return Err(Error::InvalidFormat(format!(
                "bank {}: event_id has {} entries but event_time_offset has {}",
                self.name,
                self.detector_ids.len(),
                self.tofs.len()
            )));
        }
        if let Some(weights) = &self.weights {
            if weights.len() != self.detector_ids.len() {
                return Err(Error::InvalidFormat(format!(
                    "bank {}: event_weight has {} entries but event_id has {}",
                    self.name,
                    weights.len(),
                    self.detector_ids.len()
                )));
            }
        }
        if self.event_index.is_empty() {
            return Err(Error::InvalidFormat(format!(
                "bank {}: event_index is empty",
                self.name
            )));
        }
        Ok(())
    }
}

/// Filter and behavior options shared by both processing paths.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Inclusive accepted tof window, microseconds.
    pub tof_min: f64,
    /// Inclusive accepted tof window, microseconds.
    pub tof_max: f64,
    /// Wall-clock pulse filter `[start, stop)`, run-relative nanoseconds.
    pub time_filter: Option<(i64, i64)>,
    /// Excluded (bad-pulse) wall-clock windows `[start, stop)`.
    pub bad_pulse_windows: Vec<(i64, i64)>,
    /// Pre-count events per detector to pre-size destination buffers.
    pub precount: bool,
    /// Post-hoc linear compression tolerance for the direct path.
    pub post_compress_tolerance: Option<f64>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            tof_min: f64::NEG_INFINITY,
            tof_max: f64::INFINITY,
            time_filter: None,
            bad_pulse_windows: Vec::new(),
            precount: true,
            post_compress_tolerance: None,
        }
    }
}

impl ProcessOptions {
    /// Returns true when a pulse at `time_ns` passes the wall-clock filter
    /// and falls in no bad-pulse window.
    #[must_use]
    pub fn pulse_allowed(&self, time_ns: i64) -> bool {
        if let Some((start, stop)) = self.time_filter {
            if time_ns < start || time_ns >= stop {
                return false;
            }
        }
        !self
            .bad_pulse_windows
            .iter()
            .any(|&(start, stop)| time_ns >= start && time_ns < stop)
    }

    /// Returns true when `tof` passes the tof filter.
    #[must_use]
    pub fn tof_allowed(&self, tof: f64) -> bool {
        tof >= self.tof_min && tof <= self.tof_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bank() -> RawEventBank {
        RawEventBank {
            name: "bank1_events".to_string(),
            detector_ids: vec![1, 2],
            tofs: vec![1.0, 2.0],
            weights: None,
            event_index: Arc::new(vec![0]),
            first_event_index: 0,
            min_id: 1,
            max_id: 2,
        }
    }

    #[test]
    fn validate_checks_lengths() {
        assert!(bank().validate().is_ok());

        let mut short_tofs = bank();
        short_tofs.tofs.pop();
        assert!(matches!(
            short_tofs.validate(),
            Err(Error::InvalidFormat(_))
        ));

        let mut bad_weights = bank();
        bad_weights.weights = Some(vec![1.0]);
        assert!(bad_weights.validate().is_err());

        let mut no_index = bank();
        no_index.event_index = Arc::new(Vec::new());
        assert!(no_index.validate().is_err());
    }

    #[test]
    fn pulse_and_tof_filters() {
        let options = ProcessOptions {
            tof_min: 10.0,
            tof_max: 20.0,
            time_filter: Some((100, 200)),
            bad_pulse_windows: vec![(150, 160)],
            ..ProcessOptions::default()
        };
        assert!(options.pulse_allowed(100));
        assert!(!options.pulse_allowed(99));
        assert!(!options.pulse_allowed(200));
        assert!(!options.pulse_allowed(155));
        assert!(options.tof_allowed(10.0));
        assert!(options.tof_allowed(20.0));
        assert!(!options.tof_allowed(20.001));
    }
}
