//! Real-time spectral analysis for the visualizer.
//!
//! [`SpectralAnalyzer`] turns one fixed-size block of samples into
//! [`BUCKET_COUNT`] normalized levels plus a sub-bass aggregate.
//! [`SpectrumTap`] accumulates samples on the audio thread and publishes each
//! finished pass into a wait-free triple buffer; [`VisualizationFeed`] reads
//! the newest one.

mod analyzer;
mod feed;
mod tap;

pub use analyzer::SpectralAnalyzer;
pub use feed::{SpectrumPublisher, VisualizationFeed, visualization_channel};
pub use tap::SpectrumTap;

/// Number of output buckets, one FFT bin each starting at DC.
pub const BUCKET_COUNT: usize = 64;

/// The aggregate level averages this many of the lowest buckets.
pub const AGGREGATE_BUCKETS: usize = BUCKET_COUNT / 4;

/// Default analysis block size in frames.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Smallest block that still yields `BUCKET_COUNT` bins.
pub const MIN_BLOCK_SIZE: usize = BUCKET_COUNT * 2;

/// Magnitude floor applied before the logarithm (-100 dBFS).
pub const MAGNITUDE_FLOOR: f32 = 1e-5;

/// Dynamic range mapped onto `0.0..=1.0`.
pub const DYNAMIC_RANGE_DB: f32 = 80.0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpectrumError {
    #[error("block size {0} is not a power of two")]
    NotPowerOfTwo(usize),

    #[error("block size {size} is below the minimum of {min}")]
    TooSmall { size: usize, min: usize },
}

/// One analysis pass. Always replaced wholesale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectrumFrame {
    /// Per-bin levels in `0.0..=1.0`.
    pub buckets: [f32; BUCKET_COUNT],
    /// Mean of the lowest [`AGGREGATE_BUCKETS`] buckets, `0.0..=1.0`.
    pub aggregate: f32,
}

impl Default for SpectrumFrame {
    fn default() -> Self {
        Self {
            buckets: [0.0; BUCKET_COUNT],
            aggregate: 0.0,
        }
    }
}

/// Perceptual level of a power value, in `0.0..=1.0`.
#[inline]
pub fn level_from_power(power: f32) -> f32 {
    let magnitude = power.sqrt().max(MAGNITUDE_FLOOR);
    ((20.0 * magnitude.log10() + DYNAMIC_RANGE_DB) / DYNAMIC_RANGE_DB).clamp(0.0, 1.0)
}
