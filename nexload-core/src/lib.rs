//! nexload-core: Core types and algorithms for event-bank loading.
//!
//! This crate provides the leaf abstractions of the loader: pulse
//! timestamp tables, pulse-to-event-range indexing, fine-bin event
//! compression, and the per-detector event workspace the loader fills.
//!

pub mod bins;
pub mod compress;
pub mod error;
pub mod event;
pub mod indexer;
pub mod pulse;
pub mod stats;
pub mod workspace;

pub use bins::{generate_edges, BinMode, FineBins};
pub use compress::CompressAccumulator;
pub use error::{Error, Result};
pub use event::{EventList, EventSortOrder, EventType, TofEvent, WeightedEvent};
pub use indexer::PulseIndexer;
pub use pulse::BankPulseTimes;
pub use stats::{LoadStats, LocalStats, StatsSnapshot};
pub use workspace::{DetectorIndexMap, EventWorkspace};
