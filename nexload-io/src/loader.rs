//! Load orchestration: per-bank disk tasks on a worker pool.

use crate::bank::{ProcessOptions, RawEventBank};
use crate::compressed::process_bank_compressed;
use crate::nexus::{
    self, discover_banks, open_entry, read_event_ids, read_event_index, read_event_tofs,
    read_event_weights, read_pulse_signature, BankInfo,
};
use crate::process::process_bank_data;
use crate::{Error, Result};
use hdf5::Group;
use log::{debug, info, warn};
use nexload_core::bins::{generate_edges, FineBins};
use nexload_core::event::EventType;
use nexload_core::pulse::BankPulseTimes;
use nexload_core::stats::{LoadStats, StatsSnapshot};
use nexload_core::workspace::{DetectorIndexMap, EventWorkspace};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Which chunk of a partial load this run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChunkSelection {
    /// Zero-based chunk index.
    pub index: usize,
    /// Total number of chunks.
    pub total: usize,
}

impl ChunkSelection {
    /// The `[start, stop)` event slice of a bank with `len` events that
    /// belongs to this chunk.
    #[must_use]
    pub fn slice(&self, len: usize) -> (usize, usize) {
        if self.total <= 1 {
            return (0, len);
        }
        let start = len * self.index / self.total;
        let stop = len * (self.index + 1) / self.total;
        (start, stop)
    }
}

/// Loader configuration, consumed from the hosting application.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LoadConfig {
    /// Compress events while loading rather than storing them exactly.
    pub compress_on_load: bool,
    /// Signed compression divisor: positive for linear fine bins of that
    /// width, negative for logarithmic bins of that ratio, zero for none.
    pub compress_tolerance: f64,
    /// Inclusive accepted tof window, microseconds.
    pub tof_filter: Option<(f64, f64)>,
    /// Wall-clock pulse filter `[start, stop)`, run-relative nanoseconds.
    pub time_filter: Option<(i64, i64)>,
    /// Excluded (bad-pulse) wall-clock windows.
    pub bad_pulse_windows: Vec<(i64, i64)>,
    /// Partial-load chunk selection.
    pub chunk: Option<ChunkSelection>,
    /// Pre-count events per detector to pre-size destination buffers.
    pub precount: bool,
    /// Clamp the loaded detector ids to an inclusive sub-range.
    pub spectrum_bounds: Option<(u32, u32)>,
    /// Number of measurement periods in the output workspace.
    pub num_periods: usize,
    /// Worker threads; defaults to the available parallelism.
    pub parallelism: Option<usize>,
    /// Known detector-id universe; discovered from the file when absent.
    pub detector_ids: Option<Vec<u32>>,
    /// Instrument-wide pulse table used when a bank carries no
    /// `event_time_zero` dataset (the proton-charge fallback).
    #[cfg_attr(feature = "serde", serde(skip))]
    pub fallback_pulse_times: Option<Arc<BankPulseTimes>>,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            compress_on_load: false,
            compress_tolerance: 0.0,
            tof_filter: None,
            time_filter: None,
            bad_pulse_windows: Vec::new(),
            chunk: None,
            precount: true,
            spectrum_bounds: None,
            num_periods: 1,
            parallelism: None,
            detector_ids: None,
            fallback_pulse_times: None,
        }
    }
}

impl LoadConfig {
    /// Request compress-on-load with the given signed divisor.
    #[must_use]
    pub fn with_compression(mut self, tolerance: f64) -> Self {
        self.compress_on_load = true;
        self.compress_tolerance = tolerance;
        self
    }

    /// Accept only tofs inside the inclusive `[min, max]` window.
    #[must_use]
    pub fn with_tof_filter(mut self, min: f64, max: f64) -> Self {
        self.tof_filter = Some((min, max));
        self
    }

    /// Accept only pulses inside the wall-clock `[start, stop)` window.
    #[must_use]
    pub fn with_time_filter(mut self, start: i64, stop: i64) -> Self {
        self.time_filter = Some((start, stop));
        self
    }

    /// Load only the given chunk of each bank.
    #[must_use]
    pub fn with_chunk(mut self, index: usize, total: usize) -> Self {
        self.chunk = Some(ChunkSelection { index, total });
        self
    }

    /// Set the worker-thread count. Values below 1 clamp to 1.
    #[must_use]
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads.max(1));
        self
    }

    /// Returns true when the compressed path is requested at all.
    #[must_use]
    pub fn compression_requested(&self) -> bool {
        self.compress_on_load && self.compress_tolerance != 0.0
    }
}

/// What the load did, for logging and callers.
#[derive(Debug, Clone, Copy)]
pub struct LoadSummary {
    /// Banks fully processed.
    pub banks_loaded: usize,
    /// Banks skipped because of structural or format problems.
    pub banks_skipped: usize,
    /// Events appended across all periods and detectors.
    pub total_events: usize,
    /// Cross-task statistics.
    pub stats: StatsSnapshot,
    /// The load was cancelled; the workspace contents are not valid.
    pub cancelled: bool,
}

/// Split an inclusive id range at its midpoint into two disjoint halves.
pub(crate) fn split_range(min: u32, max: u32) -> ((u32, u32), (u32, u32)) {
    let mid = min + (max - min) / 2;
    ((min, mid), (mid + 1, max))
}

struct LoaderContext<'a> {
    config: &'a LoadConfig,
    workspace: &'a EventWorkspace,
    stats: &'a LoadStats,
    cancel: &'a AtomicBool,
    disk: Mutex<()>,
    pulse_cache: Mutex<Vec<Arc<BankPulseTimes>>>,
    loaded: AtomicUsize,
    skipped: AtomicUsize,
    split_banks: bool,
}

/// Orchestrates a whole-file event load.
#[derive(Debug, Clone, Default)]
pub struct EventLoader {
    config: LoadConfig,
}

impl EventLoader {
    /// Build a loader with the given configuration.
    #[must_use]
    pub fn new(config: LoadConfig) -> Self {
        Self { config }
    }

    /// Load every event bank of `path` into a fresh workspace.
    ///
    /// Corrupt banks are skipped with a warning and the rest of the load
    /// continues. `cancel` is polled cooperatively; after a cancelled
    /// load the returned workspace is partially filled and must be
    /// discarded wholesale.
    ///
    /// # Errors
    /// Returns an error when the file has no entry group, when the
    /// thread pool cannot be built, or when every bank that carried
    /// events failed ([`Error::NoBanksLoaded`]).
    pub fn load<P: AsRef<Path>>(
        &self,
        path: P,
        cancel: &AtomicBool,
    ) -> Result<(EventWorkspace, LoadSummary)> {
        let (_file, entry) = open_entry(&path)?;
        let mut banks = discover_banks(&entry)?;
        banks.retain(|b| b.event_count > 0);
        let had_events = !banks.is_empty();

        let map = self.detector_map(&entry, &banks)?;
        let workspace = EventWorkspace::new(map, self.config.num_periods);
        if self.config.compression_requested() {
            workspace.switch_to(EventType::Weighted);
        }

        if self.config.chunk.is_some() {
            // Biggest banks first so the pool drains evenly.
            banks.sort_by(|a, b| b.event_count.cmp(&a.event_count));
        }

        let threads = self.config.parallelism.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| {
                Error::CoreError(nexload_core::Error::ConfigError(format!(
                    "cannot build worker pool: {e}"
                )))
            })?;

        let stats = LoadStats::default();
        let ctx = LoaderContext {
            config: &self.config,
            workspace: &workspace,
            stats: &stats,
            cancel,
            disk: Mutex::new(()),
            pulse_cache: Mutex::new(Vec::new()),
            loaded: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            split_banks: banks.len() < threads,
        };

        info!(
            "loading {} event bank(s) on {threads} worker thread(s)",
            banks.len()
        );
        pool.scope(|scope| {
            for info in &banks {
                let ctx = &ctx;
                let entry = &entry;
                scope.spawn(move |_| load_bank_task(ctx, entry, info));
            }
        });

        let cancelled = cancel.load(Ordering::Relaxed);
        let summary = LoadSummary {
            banks_loaded: ctx.loaded.load(Ordering::Relaxed),
            banks_skipped: ctx.skipped.load(Ordering::Relaxed),
            total_events: workspace.total_events(),
            stats: stats.snapshot(),
            cancelled,
        };

        if had_events && summary.banks_loaded == 0 && !cancelled {
            return Err(Error::NoBanksLoaded);
        }
        Ok((workspace, summary))
    }

    /// Build the detector-id map, from configured ids or by scanning the
    /// file for the overall id span.
    fn detector_map(&self, entry: &Group, banks: &[BankInfo]) -> Result<DetectorIndexMap> {
        if let Some(ids) = &self.config.detector_ids {
            return Ok(DetectorIndexMap::from_ids(ids, self.config.spectrum_bounds));
        }
        let mut min_id = u32::MAX;
        let mut max_id = 0u32;
        for info in banks {
            let bank = entry.group(&info.name)?;
            let ids = read_event_ids(&bank, 0, info.event_count)?;
            for &id in &ids {
                min_id = min_id.min(id);
                max_id = max_id.max(id);
            }
        }
        if min_id > max_id {
            return Ok(DetectorIndexMap::from_ids(&[], self.config.spectrum_bounds));
        }
        debug!("detector id span scanned from file: [{min_id}, {max_id}]");
        Ok(DetectorIndexMap::from_span(
            min_id,
            max_id,
            self.config.spectrum_bounds,
        ))
    }
}

/// Read one bank from disk and hand it to a processing path. Failures
/// are contained here: they log, bump the skip counter, and return.
fn load_bank_task(ctx: &LoaderContext<'_>, entry: &Group, info: &BankInfo) {
    if ctx.cancel.load(Ordering::Relaxed) {
        return;
    }
    let slice = ctx
        .config
        .chunk
        .map_or((0, info.event_count), |c| c.slice(info.event_count));
    if slice.0 >= slice.1 {
        // This chunk owns none of the bank's events.
        ctx.loaded.fetch_add(1, Ordering::Relaxed);
        return;
    }

    let read = read_bank(ctx, entry, info, slice);
    let (bank, pulses) = match read {
        Ok(Some(pair)) => pair,
        Ok(None) => {
            ctx.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        Err(e) => {
            warn!("skipping bank {}: {e}", info.name);
            ctx.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    match process_bank(ctx, &bank, &pulses) {
        Ok(()) => {
            ctx.loaded.fetch_add(1, Ordering::Relaxed);
            debug!("bank {} processed ({} events)", bank.name, bank.len());
        }
        Err(e) => {
            warn!("skipping bank {}: {e}", bank.name);
            ctx.skipped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Read a bank's raw arrays behind the shared disk mutex. Returns
/// `Ok(None)` when the bank's ids have no overlap with the known
/// detector universe.
fn read_bank(
    ctx: &LoaderContext<'_>,
    entry: &Group,
    info: &BankInfo,
    slice: (usize, usize),
) -> Result<Option<(Arc<RawEventBank>, Arc<BankPulseTimes>)>> {
    let group = entry.group(&info.name)?;
    let (start, stop) = slice;

    let _disk = ctx.disk.lock().expect("disk lock poisoned");
    let pulses = read_pulse_table(ctx, &group, info)?;
    let event_index = read_event_index(&group)?;
    let detector_ids = read_event_ids(&group, start, stop)?;
    let (tofs, had_units) = read_event_tofs(&group, start, stop)?;
    let weights = read_event_weights(&group, start, stop)?;
    drop(_disk);

    if !had_units {
        warn!(
            "bank {}: event_time_offset has no units attribute, assuming microseconds",
            info.name
        );
    }

    let min_id = detector_ids.iter().copied().min().unwrap_or(0);
    let max_id = detector_ids.iter().copied().max().unwrap_or(0);
    let bank = RawEventBank {
        name: info.name.clone(),
        detector_ids,
        tofs,
        weights,
        event_index: Arc::new(event_index),
        first_event_index: start as u64,
        min_id,
        max_id,
    };
    bank.validate()?;

    let (span_min, span_max) = ctx.workspace.index_map().id_span();
    if ctx.workspace.index_map().is_empty() || bank.max_id < span_min || bank.min_id > span_max {
        warn!(
            "skipping bank {}: detector ids [{}, {}] outside the known range [{span_min}, {span_max}]",
            bank.name, bank.min_id, bank.max_id
        );
        return Ok(None);
    }

    Ok(Some((Arc::new(bank), pulses)))
}

/// Fetch the bank's pulse table, reusing an equal cached table when one
/// exists and falling back to the instrument-wide table (or an empty
/// one) when the bank has no pulse dataset.
fn read_pulse_table(
    ctx: &LoaderContext<'_>,
    group: &Group,
    info: &BankInfo,
) -> Result<Arc<BankPulseTimes>> {
    let signature = match read_pulse_signature(group) {
        Ok(sig) => sig,
        Err(_) => {
            return Ok(ctx.config.fallback_pulse_times.clone().unwrap_or_else(|| {
                warn!(
                    "bank {}: no event_time_zero dataset and no fallback pulse table",
                    info.name
                );
                Arc::new(BankPulseTimes::new(String::new(), Vec::new(), None))
            }));
        }
    };

    let mut cache = ctx.pulse_cache.lock().expect("pulse cache lock poisoned");
    if let Some(shared) = cache
        .iter()
        .find(|t| t.equals(signature.0, &signature.1))
    {
        return Ok(shared.clone());
    }

    let raw = nexus::read_pulse_data(group)?;
    let table = Arc::new(BankPulseTimes::new(
        raw.start_time,
        raw.pulse_times_ns,
        raw.periods,
    ));
    cache.push(table.clone());
    Ok(table)
}

/// Pick a processing path for one read bank and run it, splitting the
/// detector-id span across two tasks when the pool would otherwise sit
/// idle.
fn process_bank(
    ctx: &LoaderContext<'_>,
    bank: &Arc<RawEventBank>,
    pulses: &Arc<BankPulseTimes>,
) -> Result<()> {
    let config = ctx.config;
    let compressed = config.compression_requested() && bank.weights.is_none();
    let (tof_min, tof_max) = config.tof_filter.unwrap_or((f64::NEG_INFINITY, f64::INFINITY));

    let options = ProcessOptions {
        tof_min,
        tof_max,
        time_filter: config.time_filter,
        bad_pulse_windows: config.bad_pulse_windows.clone(),
        precount: config.precount,
        post_compress_tolerance: if !compressed && config.compress_tolerance != 0.0 {
            Some(config.compress_tolerance.abs())
        } else {
            None
        },
    };

    let bins = if compressed {
        match bank_fine_bins(bank, &options, config.compress_tolerance) {
            Ok(bins) => Some(Arc::new(bins)),
            Err(e) => {
                warn!(
                    "bank {}: cannot build fine bins ({e}), storing exact events",
                    bank.name
                );
                None
            }
        }
    } else {
        None
    };

    let full_range = (bank.min_id, bank.max_id);
    let run = |range: (u32, u32)| -> Result<()> {
        match &bins {
            Some(bins) => process_bank_compressed(
                bank, pulses, range, bins, ctx.workspace, &options, ctx.stats, ctx.cancel,
            ),
            None => process_bank_data(
                bank, pulses, range, ctx.workspace, &options, ctx.stats, ctx.cancel,
            ),
        }
    };

    if ctx.split_banks && bank.max_id > bank.min_id {
        let (lo, hi) = split_range(bank.min_id, bank.max_id);
        let (a, b) = rayon::join(|| run(lo), || run(hi));
        a.and(b)
    } else {
        run(full_range)
    }
}

/// Fine bin edges spanning the bank's accepted tof range.
fn bank_fine_bins(
    bank: &RawEventBank,
    options: &ProcessOptions,
    divisor: f64,
) -> Result<FineBins> {
    let mut tof_min = f64::INFINITY;
    let mut tof_max = f64::NEG_INFINITY;
    for &tof in &bank.tofs {
        if !options.tof_allowed(tof) {
            continue;
        }
        tof_min = tof_min.min(tof);
        tof_max = tof_max.max(tof);
    }
    if tof_min >= tof_max {
        // All events share one tof (or none pass); widen so one bin exists.
        tof_max = tof_min + divisor.abs();
    }
    let edges = generate_edges(tof_min, tof_max, divisor)?;
    let bins = FineBins::new(edges, divisor)?;
    Ok(bins)
}
