//! 12-bit to 8-bit depth reduction
//!
//! Every policy reduces to an affine map `(v - offset) * 255 / span`,
//! rounded and clamped, so the work per frame is one statistics pass plus
//! a 4096-entry lookup table applied in parallel.
//!
//! Statistics for `auto` and `percentile` are pooled across all channels.
//! Per-channel statistics would balance color frames better but change the
//! output of existing datasets.

use std::fmt;
use std::str::FromStr;

use ndarray::{Array3, Zip};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::jpeg::{SampleBuffer, SAMPLE_MAX};

const LUT_LEN: usize = SAMPLE_MAX as usize + 1;

/// Brightness scaling applied to a whole batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScalingPolicy {
    /// Fixed 0-4095 -> 0-255 map; brightness comparable across frames
    #[default]
    Linear,
    /// Stretch each frame's min..max to 0..255
    Auto,
    /// Stretch each frame's 2nd..98th percentile to 0..255
    Percentile,
}

impl ScalingPolicy {
    pub fn as_str(&self) -> &str {
        match self {
            ScalingPolicy::Linear => "linear",
            ScalingPolicy::Auto => "auto",
            ScalingPolicy::Percentile => "percentile",
        }
    }
}

impl fmt::Display for ScalingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScalingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(ScalingPolicy::Linear),
            "auto" => Ok(ScalingPolicy::Auto),
            "percentile" => Ok(ScalingPolicy::Percentile),
            other => Err(format!("unknown scaling policy: {}", other)),
        }
    }
}

/// 8-bit samples, same shape as the source buffer
#[derive(Debug, Clone)]
pub struct RasterBuffer {
    pub pixels: Array3<u8>,
}

impl RasterBuffer {
    pub fn height(&self) -> usize {
        self.pixels.dim().0
    }

    pub fn width(&self) -> usize {
        self.pixels.dim().1
    }

    pub fn channels(&self) -> usize {
        self.pixels.dim().2
    }
}

/// Resolved per-frame mapping
#[derive(Debug, Clone, Copy, PartialEq)]
enum Mapping {
    Affine { offset: f64, span: f64 },
    /// Degenerate range: every sample maps to 0
    Zero,
}

impl Mapping {
    fn resolve(policy: ScalingPolicy, histogram: impl FnOnce() -> Histogram) -> Self {
        let (low, high) = match policy {
            ScalingPolicy::Linear => {
                return Mapping::Affine {
                    offset: 0.0,
                    span: SAMPLE_MAX as f64,
                }
            }
            ScalingPolicy::Auto => {
                let hist = histogram();
                match (hist.min(), hist.max()) {
                    (Some(min), Some(max)) => (min as f64, max as f64),
                    _ => return Mapping::Zero,
                }
            }
            ScalingPolicy::Percentile => {
                let hist = histogram();
                match (hist.percentile(2.0), hist.percentile(98.0)) {
                    (Some(p2), Some(p98)) => (p2, p98),
                    _ => return Mapping::Zero,
                }
            }
        };
        if high > low {
            Mapping::Affine {
                offset: low,
                span: high - low,
            }
        } else {
            Mapping::Zero
        }
    }

    fn apply(&self, value: u16) -> u8 {
        match *self {
            Mapping::Affine { offset, span } => {
                ((value as f64 - offset) * 255.0 / span).round().clamp(0.0, 255.0) as u8
            }
            Mapping::Zero => 0,
        }
    }

    fn lut(&self) -> Vec<u8> {
        (0..LUT_LEN).map(|v| self.apply(v as u16)).collect()
    }
}

/// Sample counts over the 12-bit domain
struct Histogram {
    counts: Vec<u64>,
    total: u64,
}

impl Histogram {
    fn build<'a>(samples: impl IntoIterator<Item = &'a u16>) -> Self {
        let mut counts = vec![0u64; LUT_LEN];
        let mut total = 0u64;
        for &v in samples {
            counts[clamp_index(v)] += 1;
            total += 1;
        }
        Self { counts, total }
    }

    fn min(&self) -> Option<usize> {
        self.counts.iter().position(|&c| c > 0)
    }

    fn max(&self) -> Option<usize> {
        self.counts.iter().rposition(|&c| c > 0)
    }

    /// Value of the sorted sample at `rank` (0-based).
    fn value_at_rank(&self, rank: u64) -> usize {
        let mut seen = 0u64;
        for (value, &count) in self.counts.iter().enumerate() {
            seen += count;
            if seen > rank {
                return value;
            }
        }
        LUT_LEN - 1
    }

    /// Percentile with linear interpolation between closest ranks.
    fn percentile(&self, q: f64) -> Option<f64> {
        if self.total == 0 {
            return None;
        }
        let position = q / 100.0 * (self.total - 1) as f64;
        let lower = position.floor();
        let frac = position - lower;
        let lo = self.value_at_rank(lower as u64) as f64;
        let hi = self.value_at_rank(position.ceil() as u64) as f64;
        Some(lo + (hi - lo) * frac)
    }
}

#[inline]
fn clamp_index(v: u16) -> usize {
    (v as usize).min(LUT_LEN - 1)
}

/// Reduce a 12-bit sample buffer to 8 bits under `policy`.
pub fn reduce(buffer: &SampleBuffer, policy: ScalingPolicy) -> RasterBuffer {
    let input = buffer.samples.as_standard_layout();

    let mapping = Mapping::resolve(policy, || Histogram::build(input.iter()));
    let lut = mapping.lut();

    let mut pixels = Array3::<u8>::zeros(input.dim());
    match (pixels.as_slice_mut(), input.as_slice()) {
        (Some(dst), Some(src)) => {
            dst.par_iter_mut()
                .zip(src.par_iter())
                .for_each(|(d, &s)| *d = lut[clamp_index(s)]);
        }
        _ => {
            Zip::from(&mut pixels)
                .and(&input)
                .for_each(|d, &s| *d = lut[clamp_index(s)]);
        }
    }

    RasterBuffer { pixels }
}
