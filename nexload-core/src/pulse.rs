//! Per-bank pulse timestamp tables.

/// Period number assigned when a file carries no period log.
pub const FIRST_PERIOD: usize = 0;

/// Immutable per-bank table of pulse timestamps and period numbers.
///
/// Pulse times are nanoseconds relative to the run start named by the
/// bank's ISO-8601 `offset` attribute. Banks reporting an identical
/// `(pulse_count, start_time)` signature share one instance; the loader
/// checks [`BankPulseTimes::equals`] before reading a duplicate table.
#[derive(Debug, Clone)]
pub struct BankPulseTimes {
    start_time: String,
    pulse_times: Vec<i64>,
    periods: Vec<usize>,
}

impl BankPulseTimes {
    /// Build a table from in-memory vectors. Used both for file-backed
    /// pulse datasets and for the instrument-wide proton-charge fallback
    /// when a bank has no pulse data of its own. A missing or mis-sized
    /// period vector falls back to [`FIRST_PERIOD`] everywhere.
    #[must_use]
    pub fn new(start_time: String, pulse_times: Vec<i64>, periods: Option<Vec<usize>>) -> Self {
        let periods = match periods {
            Some(p) if p.len() == pulse_times.len() => p,
            Some(p) => {
                log::warn!(
                    "period log has {} entries for {} pulses, assuming first period",
                    p.len(),
                    pulse_times.len()
                );
                vec![FIRST_PERIOD; pulse_times.len()]
            }
            None => vec![FIRST_PERIOD; pulse_times.len()],
        };
        Self {
            start_time,
            pulse_times,
            periods,
        }
    }

    /// Number of pulses.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pulse_times.len()
    }

    /// Returns true when the table holds no pulses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pulse_times.is_empty()
    }

    /// ISO-8601 run start the pulse times are relative to.
    #[must_use]
    pub fn start_time(&self) -> &str {
        &self.start_time
    }

    /// Timestamp of pulse `i`, nanoseconds relative to the run start.
    #[must_use]
    pub fn pulse_time(&self, i: usize) -> i64 {
        self.pulse_times[i]
    }

    /// Period number of pulse `i`.
    #[must_use]
    pub fn period_number(&self, i: usize) -> usize {
        self.periods[i]
    }

    /// Highest period number present, plus one.
    #[must_use]
    pub fn num_periods(&self) -> usize {
        self.periods.iter().max().map_or(1, |&p| p + 1)
    }

    /// Structural equality used to share one table across banks: same
    /// pulse count and same run start. Value equality, not identity.
    #[must_use]
    pub fn equals(&self, pulse_count: usize, start_time: &str) -> bool {
        self.pulse_times.len() == pulse_count && self.start_time == start_time
    }

    /// Returns true when pulse times are non-decreasing.
    #[must_use]
    pub fn is_increasing(&self) -> bool {
        self.pulse_times.windows(2).all(|w| w[0] <= w[1])
    }

    /// Pulse-index ranges `[first, last)` whose timestamps fall inside the
    /// wall-clock window `[start, stop)`.
    ///
    /// Scans linearly rather than bisecting, so sawtooth (non-monotonic)
    /// pulse-time sequences still yield correct coverage; the returned
    /// ranges are in increasing index order and non-adjacent.
    #[must_use]
    pub fn roi(&self, start: i64, stop: i64) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut open: Option<usize> = None;
        for (i, &t) in self.pulse_times.iter().enumerate() {
            let inside = t >= start && t < stop;
            match (inside, open) {
                (true, None) => open = Some(i),
                (false, Some(first)) => {
                    ranges.push((first, i));
                    open = None;
                }
                _ => {}
            }
        }
        if let Some(first) = open {
            ranges.push((first, self.pulse_times.len()));
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(times: &[i64]) -> BankPulseTimes {
        BankPulseTimes::new("2024-03-01T00:00:00+00:00".to_string(), times.to_vec(), None)
    }

    #[test]
    fn equality_is_structural() {
        let a = table(&[0, 10, 20]);
        assert!(a.equals(3, "2024-03-01T00:00:00+00:00"));
        assert!(!a.equals(2, "2024-03-01T00:00:00+00:00"));
        assert!(!a.equals(3, "2024-03-02T00:00:00+00:00"));
    }

    #[test]
    fn mismatched_periods_fall_back_to_first() {
        let t = BankPulseTimes::new(String::new(), vec![0, 10], Some(vec![1]));
        assert_eq!(t.period_number(0), FIRST_PERIOD);
        assert_eq!(t.period_number(1), FIRST_PERIOD);
        assert_eq!(t.num_periods(), 1);

        let t = BankPulseTimes::new(String::new(), vec![0, 10], Some(vec![0, 2]));
        assert_eq!(t.period_number(1), 2);
        assert_eq!(t.num_periods(), 3);
    }

    #[test]
    fn roi_on_monotonic_times() {
        let t = table(&[0, 10, 20, 30, 40]);
        assert_eq!(t.roi(10, 35), vec![(1, 4)]);
        assert_eq!(t.roi(100, 200), Vec::<(usize, usize)>::new());
        assert_eq!(t.roi(0, 100), vec![(0, 5)]);
    }

    #[test]
    fn roi_on_sawtooth_times() {
        // A resetting clock: the window covers two separate index ranges.
        let t = table(&[0, 10, 20, 5, 15, 25]);
        assert_eq!(t.roi(10, 21), vec![(1, 3), (4, 5)]);
    }

    #[test]
    fn increasing_detection() {
        assert!(table(&[0, 10, 10, 20]).is_increasing());
        assert!(!table(&[0, 10, 5]).is_increasing());
        assert!(table(&[]).is_increasing());
    }
}
