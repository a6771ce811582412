//! Fine bin-edge policy for online event compression.
//!
//! A signed "divisor" (the user-facing compression tolerance) selects the
//! binning mode: positive values request linear bins of fixed width,
//! negative values request logarithmic bins of fixed ratio. The resulting
//! fine edges are internal to the compression engine and are not a
//! user-facing analysis binning.

use crate::error::{Error, Result};

/// Fine-binning mode selected by the sign of the divisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinMode {
    /// Fixed bin width `|divisor|` microseconds.
    Linear,
    /// Fixed bin ratio `1 + |divisor|`.
    Logarithmic,
}

/// A shared, read-only fine bin-edge sequence with O(1) bin lookup.
#[derive(Debug, Clone)]
pub struct FineBins {
    edges: Vec<f64>,
    mode: BinMode,
    delta: f64,
    offset: f64,
}

impl FineBins {
    /// Build a bin lookup over `edges` for the given signed divisor.
    ///
    /// # Errors
    /// Returns an error for a zero divisor, fewer than two edges, a
    /// non-increasing edge sequence, or a non-positive first edge in
    /// logarithmic mode.
    pub fn new(edges: Vec<f64>, divisor: f64) -> Result<Self> {
        if divisor == 0.0 || !divisor.is_finite() {
            return Err(Error::ConfigError(format!(
                "compression divisor must be finite and nonzero, got {divisor}"
            )));
        }
        if edges.len() < 2 {
            return Err(Error::InvalidBinEdges(
                "need at least two bin edges".to_string(),
            ));
        }
        if edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(Error::InvalidBinEdges(
                "bin edges must be strictly increasing".to_string(),
            ));
        }

        let mode = if divisor > 0.0 {
            BinMode::Linear
        } else {
            BinMode::Logarithmic
        };
        let delta = divisor.abs();
        let offset = match mode {
            BinMode::Linear => edges[0] / delta,
            BinMode::Logarithmic => {
                if edges[0] <= 0.0 {
                    return Err(Error::InvalidBinEdges(
                        "logarithmic binning requires a positive first edge".to_string(),
                    ));
                }
                edges[0].ln() / delta.ln_1p()
            }
        };

        Ok(Self {
            edges,
            mode,
            delta,
            offset,
        })
    }

    /// Binning mode.
    #[must_use]
    pub fn mode(&self) -> BinMode {
        self.mode
    }

    /// Number of fine bins.
    #[must_use]
    pub fn num_bins(&self) -> usize {
        self.edges.len() - 1
    }

    /// The edge sequence.
    #[must_use]
    pub fn edges(&self) -> &[f64] {
        &self.edges
    }

    /// Center of bin `i`.
    #[must_use]
    pub fn center(&self, i: usize) -> f64 {
        0.5 * (self.edges[i] + self.edges[i + 1])
    }

    /// Locate the bin containing `tof`, or `None` outside
    /// `[edges.front(), edges.back())`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn find_bin(&self, tof: f64) -> Option<usize> {
        if !tof.is_finite() || tof < self.edges[0] || tof >= self.edges[self.edges.len() - 1] {
            return None;
        }
        let raw = match self.mode {
            BinMode::Linear => tof / self.delta - self.offset,
            BinMode::Logarithmic => tof.ln() / self.delta.ln_1p() - self.offset,
        };
        let bin = (raw.max(0.0) as usize).min(self.num_bins() - 1);
        Some(bin)
    }
}

/// Generate fine bin edges spanning `[tof_min, tof_max]` for a signed
/// divisor: fixed width for a positive divisor, fixed ratio for a
/// negative one. The last edge lies strictly beyond `tof_max`, so a tof
/// equal to `tof_max` still maps to a bin under the half-open lookup.
///
/// # Errors
/// Returns an error for a zero divisor, an empty span, or a non-positive
/// `tof_min` in logarithmic mode.
pub fn generate_edges(tof_min: f64, tof_max: f64, divisor: f64) -> Result<Vec<f64>> {
    if divisor == 0.0 || !divisor.is_finite() {
        return Err(Error::ConfigError(format!(
            "compression divisor must be finite and nonzero, got {divisor}"
        )));
    }
    if !(tof_min < tof_max) {
        return Err(Error::InvalidBinEdges(format!(
            "empty tof span [{tof_min}, {tof_max}]"
        )));
    }

    let delta = divisor.abs();
    let mut edges = Vec::new();
    if divisor > 0.0 {
        let mut edge = tof_min;
        while edge <= tof_max {
            edges.push(edge);
            edge += delta;
        }
        edges.push(edge);
    } else {
        if tof_min <= 0.0 {
            return Err(Error::InvalidBinEdges(
                "logarithmic binning requires a positive tof minimum".to_string(),
            ));
        }
        let ratio = 1.0 + delta;
        let mut edge = tof_min;
        while edge <= tof_max {
            edges.push(edge);
            edge *= ratio;
        }
        edges.push(edge);
    }
    Ok(edges)
}
