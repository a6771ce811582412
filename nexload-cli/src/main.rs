//!
//! This binary provides a CLI for loading NeXus event files.
#![allow(clippy::too_many_lines)]

use clap::{Parser, Subcommand};
use log::LevelFilter;
use nexload_io::{EventLoader, LoadConfig, SyntheticBank};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Load error: {0}")]
    NexloadIo(#[from] nexload_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] nexload_core::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Concurrent NeXus event-bank loader.
#[derive(Parser)]
#[command(name = "nexload")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output (repeat for debug logging)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the event banks of a NeXus file and report a summary
    Load {
        /// Input NeXus/HDF5 event file
        input: PathBuf,

        /// Compress events while loading, with this signed tolerance:
        /// positive for linear microsecond bins, negative for
        /// logarithmic bins of that ratio
        #[arg(long)]
        compress: Option<f64>,

        /// Minimum accepted time-of-flight (microseconds)
        #[arg(long)]
        tof_min: Option<f64>,

        /// Maximum accepted time-of-flight (microseconds)
        #[arg(long)]
        tof_max: Option<f64>,

        /// Start of the accepted wall-clock window, nanoseconds from
        /// run start
        #[arg(long)]
        filter_start_ns: Option<i64>,

        /// End of the accepted wall-clock window, nanoseconds from
        /// run start
        #[arg(long)]
        filter_stop_ns: Option<i64>,

        /// Load only chunk INDEX of TOTAL (as "INDEX/TOTAL")
        #[arg(long)]
        chunk: Option<String>,

        /// Clamp loaded detector ids to an inclusive range (as "MIN:MAX")
        #[arg(long)]
        spectra: Option<String>,

        /// Worker threads (defaults to the available parallelism)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Skip the per-detector pre-count pass
        #[arg(long)]
        no_precount: bool,
    },

    /// Write a small synthetic event file for testing
    Synth {
        /// Output file path
        output: PathBuf,

        /// Number of banks to write
        #[arg(long, default_value = "2")]
        banks: usize,

        /// Pulses per bank
        #[arg(long, default_value = "10")]
        pulses: usize,

        /// Events per pulse
        #[arg(long, default_value = "100")]
        events_per_pulse: usize,

        /// Detectors per bank
        #[arg(long, default_value = "8")]
        detectors: usize,
    },
}

fn parse_chunk(spec: &str) -> Result<(usize, usize)> {
    let (index, total) = spec
        .split_once('/')
        .ok_or_else(|| CliError::InvalidArgument(format!("chunk must be INDEX/TOTAL, got {spec:?}")))?;
    let index = index
        .trim()
        .parse()
        .map_err(|_| CliError::InvalidArgument(format!("bad chunk index in {spec:?}")))?;
    let total: usize = total
        .trim()
        .parse()
        .map_err(|_| CliError::InvalidArgument(format!("bad chunk total in {spec:?}")))?;
    if total == 0 || index >= total {
        return Err(CliError::InvalidArgument(format!(
            "chunk index {index} out of range for {total} chunk(s)"
        )));
    }
    Ok((index, total))
}

fn parse_spectra(spec: &str) -> Result<(u32, u32)> {
    let (lo, hi) = spec
        .split_once(':')
        .ok_or_else(|| CliError::InvalidArgument(format!("spectra must be MIN:MAX, got {spec:?}")))?;
    let lo: u32 = lo
        .trim()
        .parse()
        .map_err(|_| CliError::InvalidArgument(format!("bad spectrum minimum in {spec:?}")))?;
    let hi: u32 = hi
        .trim()
        .parse()
        .map_err(|_| CliError::InvalidArgument(format!("bad spectrum maximum in {spec:?}")))?;
    if lo > hi {
        return Err(CliError::InvalidArgument(format!(
            "spectrum range {lo}:{hi} is inverted"
        )));
    }
    Ok((lo, hi))
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
fn synthetic_banks(
    banks: usize,
    pulses: usize,
    events_per_pulse: usize,
    detectors: usize,
) -> Vec<SyntheticBank> {
    let start_time = "2024-03-01T00:00:00+00:00".to_string();
    (0..banks)
        .map(|b| {
            let base_id = (b * detectors) as u32;
            let total = pulses * events_per_pulse;
            let detector_ids = (0..total)
                .map(|i| base_id + (i % detectors.max(1)) as u32)
                .collect();
            // Sawtooth tofs so compression has something to merge.
            let tofs_us = (0..total).map(|i| 100.0 + (i % 50) as f64).collect();
            let event_index = (0..pulses).map(|p| (p * events_per_pulse) as u64).collect();
            let pulse_times_ns = (0..pulses).map(|p| p as i64 * 16_666_667).collect();
            SyntheticBank {
                name: format!("bank{}_events", b + 1),
                detector_ids,
                tofs_us,
                event_index,
                pulse_times_ns,
                start_time: start_time.clone(),
                ..SyntheticBank::default()
            }
        })
        .collect()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match cli.command {
        Commands::Load {
            input,
            compress,
            tof_min,
            tof_max,
            filter_start_ns,
            filter_stop_ns,
            chunk,
            spectra,
            threads,
            no_precount,
        } => {
            let mut config = LoadConfig::default();
            if let Some(tolerance) = compress {
                config = config.with_compression(tolerance);
            }
            if tof_min.is_some() || tof_max.is_some() {
                config = config.with_tof_filter(
                    tof_min.unwrap_or(f64::NEG_INFINITY),
                    tof_max.unwrap_or(f64::INFINITY),
                );
            }
            if let (Some(start), Some(stop)) = (filter_start_ns, filter_stop_ns) {
                config = config.with_time_filter(start, stop);
            }
            if let Some(spec) = chunk.as_deref() {
                let (index, total) = parse_chunk(spec)?;
                config = config.with_chunk(index, total);
            }
            if let Some(spec) = spectra.as_deref() {
                config.spectrum_bounds = Some(parse_spectra(spec)?);
            }
            if let Some(threads) = threads {
                config = config.with_parallelism(threads);
            }
            config.precount = !no_precount;

            let start = Instant::now();
            let cancel = AtomicBool::new(false);
            let (workspace, summary) = EventLoader::new(config).load(&input, &cancel)?;
            let elapsed = start.elapsed();

            println!("File: {}", input.display());
            println!(
                "Loaded {} bank(s), skipped {} in {:.2}s",
                summary.banks_loaded,
                summary.banks_skipped,
                elapsed.as_secs_f64()
            );
            println!("Detectors: {}", workspace.num_detectors());
            println!("Events: {}", summary.total_events);
            println!("Total weight: {:.1}", workspace.total_weight());
            println!(
                "Accepted: {} Discarded: {}",
                summary.stats.accepted_events, summary.stats.discarded_events
            );
            if summary.stats.accepted_events > 0 {
                println!(
                    "Tof range: [{:.3}, {:.3}] us",
                    summary.stats.shortest_tof, summary.stats.longest_tof
                );
            }
        }

        Commands::Synth {
            output,
            banks,
            pulses,
            events_per_pulse,
            detectors,
        } => {
            if banks == 0 || pulses == 0 {
                return Err(CliError::InvalidArgument(
                    "need at least one bank and one pulse".to_string(),
                ));
            }
            let data = synthetic_banks(banks, pulses, events_per_pulse, detectors);
            nexload_io::write_event_file(&output, &data)?;
            let total: usize = data.iter().map(|b| b.detector_ids.len()).sum();
            println!(
                "Wrote {} bank(s), {} events to {}",
                banks,
                total,
                output.display()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_spec_parses_and_validates() {
        assert_eq!(parse_chunk("0/4").unwrap(), (0, 4));
        assert_eq!(parse_chunk(" 3 / 4 ").unwrap(), (3, 4));
        assert!(parse_chunk("4/4").is_err());
        assert!(parse_chunk("1").is_err());
        assert!(parse_chunk("a/b").is_err());
    }

    #[test]
    fn spectra_spec_parses_and_validates() {
        assert_eq!(parse_spectra("10:20").unwrap(), (10, 20));
        assert!(parse_spectra("20:10").is_err());
        assert!(parse_spectra("10-20").is_err());
    }

    #[test]
    fn synthetic_banks_have_consistent_shapes() {
        let banks = synthetic_banks(2, 3, 4, 2);
        assert_eq!(banks.len(), 2);
        for bank in &banks {
            assert_eq!(bank.detector_ids.len(), 12);
            assert_eq!(bank.tofs_us.len(), 12);
            assert_eq!(bank.event_index.len(), 3);
            assert_eq!(bank.pulse_times_ns.len(), 3);
        }
        assert_ne!(banks[0].detector_ids[0], banks[1].detector_ids[0]);
    }
}
