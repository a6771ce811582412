//! Error types for nexload-core.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for nexload operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Cumulative event_index array is not non-decreasing.
    #[error("event_index is not sorted at pulse {0}")]
    UnsortedEventIndex(usize),

    /// Fine bin edges are unusable.
    #[error("invalid bin edges: {0}")]
    InvalidBinEdges(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Accumulator drained twice or flushed for an unknown detector.
    #[error("accumulator error: {0}")]
    AccumulatorError(String),
}
