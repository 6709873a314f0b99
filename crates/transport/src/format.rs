/// Native format of an opened source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceFormat {
    pub sample_rate: u32,
    pub channels: u16,
    /// Total frame count at `sample_rate`.
    pub frames: u64,
}

impl SourceFormat {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames as f64 / self.sample_rate as f64
    }

    /// Frame index for a position in seconds, clamped to the source length.
    pub fn frame_at(&self, seconds: f64) -> u64 {
        let frame = (seconds.max(0.0) * self.sample_rate as f64).round() as u64;
        frame.min(self.frames)
    }
}

/// Format of the output device the graph renders into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 2,
        }
    }
}

/// Parameters of the time/pitch and reverb nodes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EffectParams {
    /// Wet percentage, `0.0..=100.0`.
    pub reverb_mix: f32,
    /// Source frames consumed per output frame, `0.5..=2.0`.
    pub playback_rate: f32,
}

impl EffectParams {
    pub const MIN_RATE: f32 = 0.5;
    pub const MAX_RATE: f32 = 2.0;
    pub const MAX_REVERB_MIX: f32 = 100.0;

    /// Build clamped parameters. Non-finite inputs fall back to the neutral value.
    pub fn new(reverb_mix: f32, playback_rate: f32) -> Self {
        Self::default()
            .with_reverb_mix(reverb_mix)
            .with_playback_rate(playback_rate)
    }

    pub fn with_reverb_mix(mut self, mix: f32) -> Self {
        self.reverb_mix = if mix.is_finite() {
            mix.clamp(0.0, Self::MAX_REVERB_MIX)
        } else {
            0.0
        };
        self
    }

    pub fn with_playback_rate(mut self, rate: f32) -> Self {
        self.playback_rate = if rate.is_finite() {
            rate.clamp(Self::MIN_RATE, Self::MAX_RATE)
        } else {
            1.0
        };
        self
    }

    /// Reverb mix as a `0.0..=1.0` wet fraction.
    pub fn wet_fraction(&self) -> f32 {
        self.reverb_mix / Self::MAX_REVERB_MIX
    }
}

impl Default for EffectParams {
    fn default() -> Self {
        Self {
            reverb_mix: 0.0,
            playback_rate: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effect_params_clamp() {
        let params = EffectParams::new(140.0, 3.0);
        assert_eq!(params.reverb_mix, 100.0);
        assert_eq!(params.playback_rate, 2.0);

        let params = EffectParams::new(-5.0, 0.1);
        assert_eq!(params.reverb_mix, 0.0);
        assert_eq!(params.playback_rate, 0.5);
    }

    #[test]
    fn test_effect_params_reject_nan() {
        let params = EffectParams::new(f32::NAN, f32::INFINITY);
        assert_eq!(params, EffectParams::default());
    }

    #[test]
    fn test_frame_at_clamps_to_length() {
        let format = SourceFormat {
            sample_rate: 100,
            channels: 2,
            frames: 1000,
        };
        assert_eq!(format.frame_at(2.5), 250);
        assert_eq!(format.frame_at(-1.0), 0);
        assert_eq!(format.frame_at(50.0), 1000);
    }
}
