use std::f32::consts::PI;
use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::{
    AGGREGATE_BUCKETS, BUCKET_COUNT, MIN_BLOCK_SIZE, SpectrumError, SpectrumFrame,
    level_from_power,
};

/// FFT-based level extractor with all buffers allocated up front.
///
/// `analyze*` never allocates, so it can run inside the render callback.
pub struct SpectralAnalyzer {
    block_size: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    /// Normalizes squared magnitudes so a full-scale sine reads 0 dBFS.
    power_scale: f32,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    power: Vec<f32>,
}

impl SpectralAnalyzer {
    pub fn new(block_size: usize) -> Result<Self, SpectrumError> {
        Self::check_block_size(block_size)?;

        let fft = RealFftPlanner::<f32>::new().plan_fft_forward(block_size);

        // Hann window
        let window: Vec<f32> = (0..block_size)
            .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / block_size as f32).cos()))
            .collect();
        let coherent_gain = window.iter().sum::<f32>() / 2.0;

        Ok(Self {
            block_size,
            input: fft.make_input_vec(),
            spectrum: fft.make_output_vec(),
            scratch: fft.make_scratch_vec(),
            power: vec![0.0; block_size / 2],
            power_scale: 1.0 / (coherent_gain * coherent_gain),
            window,
            fft,
        })
    }

    /// Block sizes must be a power of two of at least [`MIN_BLOCK_SIZE`].
    pub fn check_block_size(block_size: usize) -> Result<(), SpectrumError> {
        if !block_size.is_power_of_two() {
            return Err(SpectrumError::NotPowerOfTwo(block_size));
        }
        if block_size < MIN_BLOCK_SIZE {
            return Err(SpectrumError::TooSmall {
                size: block_size,
                min: MIN_BLOCK_SIZE,
            });
        }
        Ok(())
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Analyze one mono block. Blocks of the wrong length are dropped.
    pub fn analyze(&mut self, block: &[f32]) -> Option<SpectrumFrame> {
        if block.len() != self.block_size {
            return None;
        }
        for ((dst, sample), w) in self.input.iter_mut().zip(block).zip(&self.window) {
            *dst = sample * w;
        }
        self.transform()
    }

    /// Analyze one interleaved block of `block_size` frames, downmixed to mono.
    pub fn analyze_interleaved(
        &mut self,
        samples: &[f32],
        channels: usize,
    ) -> Option<SpectrumFrame> {
        if channels == 0 || samples.len() != self.block_size * channels {
            return None;
        }
        let gain = 1.0 / channels as f32;
        for ((dst, frame), w) in self
            .input
            .iter_mut()
            .zip(samples.chunks_exact(channels))
            .zip(&self.window)
        {
            *dst = frame.iter().sum::<f32>() * gain * w;
        }
        self.transform()
    }

    /// Analyze planar channel buffers, each exactly `block_size` long.
    pub fn analyze_planar(&mut self, channels: &[&[f32]]) -> Option<SpectrumFrame> {
        if channels.is_empty() || channels.iter().any(|c| c.len() != self.block_size) {
            return None;
        }
        let gain = 1.0 / channels.len() as f32;
        for (i, (dst, w)) in self.input.iter_mut().zip(&self.window).enumerate() {
            let sum: f32 = channels.iter().map(|c| c[i]).sum();
            *dst = sum * gain * w;
        }
        self.transform()
    }

    fn transform(&mut self) -> Option<SpectrumFrame> {
        self.fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .ok()?;

        for (power, bin) in self.power.iter_mut().zip(&self.spectrum) {
            *power = bin.norm_sqr() * self.power_scale;
        }

        let mut frame = SpectrumFrame::default();
        for (bucket, power) in frame.buckets.iter_mut().zip(&self.power[..BUCKET_COUNT]) {
            *bucket = level_from_power(*power);
        }
        frame.aggregate =
            frame.buckets[..AGGREGATE_BUCKETS].iter().sum::<f32>() / AGGREGATE_BUCKETS as f32;

        Some(frame)
    }
}

impl std::fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("block_size", &self.block_size)
            .finish()
    }
}
