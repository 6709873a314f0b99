//! Effect nodes between the player node and the output: varispeed time/pitch
//! and a small stereo reverb. Both preallocate on construction and never
//! allocate while rendering.

use spindle_transport::{AudioArc, EffectParams};

use crate::config::reverb::*;

/// Varispeed reader. Advances through the source at `rate` frames per output
/// frame with linear interpolation between neighbours.
#[derive(Debug, Clone, Copy)]
pub struct TimePitch {
    rate: f64,
}

impl TimePitch {
    pub fn new(rate: f32) -> Self {
        let mut node = Self { rate: 1.0 };
        node.set_rate(rate);
        node
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.rate = EffectParams::default().with_playback_rate(rate).playback_rate as f64;
    }

    #[inline]
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Stereo frame at a fractional source position.
    #[inline]
    pub fn read(&self, audio: &AudioArc, position: f64) -> (f32, f32) {
        let index = position.floor();
        let frac = (position - index) as f32;
        let index = index as usize;
        let (l0, r0) = audio.stereo_frame(index);
        if frac == 0.0 {
            return (l0, r0);
        }
        let next = (index + 1).min(audio.frames().saturating_sub(1));
        let (l1, r1) = audio.stereo_frame(next);
        (l0 + (l1 - l0) * frac, r0 + (r1 - r0) * frac)
    }
}

struct CombFilter {
    buffer: Vec<f32>,
    pos: usize,
    store: f32,
}

impl CombFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
            store: 0.0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let output = self.buffer[self.pos];
        self.store = output * (1.0 - DAMPING) + self.store * DAMPING;
        self.buffer[self.pos] = input + self.store * ROOM_FEEDBACK;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.store = 0.0;
    }
}

struct AllpassFilter {
    buffer: Vec<f32>,
    pos: usize,
}

impl AllpassFilter {
    fn new(len: usize) -> Self {
        Self {
            buffer: vec![0.0; len.max(1)],
            pos: 0,
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let delayed = self.buffer[self.pos];
        let output = delayed - ALLPASS_GAIN * input;
        self.buffer[self.pos] = input + ALLPASS_GAIN * delayed;
        self.pos = (self.pos + 1) % self.buffer.len();
        output
    }

    fn clear(&mut self) {
        self.buffer.fill(0.0);
    }
}

struct Channel {
    combs: Vec<CombFilter>,
    allpasses: Vec<AllpassFilter>,
}

impl Channel {
    fn new(scale: f32, spread: usize) -> Self {
        let scaled = |len: usize| ((len + spread) as f32 * scale) as usize;
        Self {
            combs: COMB_TUNING.iter().map(|&len| CombFilter::new(scaled(len))).collect(),
            allpasses: ALLPASS_TUNING
                .iter()
                .map(|&len| AllpassFilter::new(scaled(len)))
                .collect(),
        }
    }

    #[inline]
    fn process(&mut self, input: f32) -> f32 {
        let mut out = 0.0;
        for comb in &mut self.combs {
            out += comb.process(input);
        }
        for allpass in &mut self.allpasses {
            out = allpass.process(out);
        }
        out
    }

    fn clear(&mut self) {
        self.combs.iter_mut().for_each(CombFilter::clear);
        self.allpasses.iter_mut().for_each(AllpassFilter::clear);
    }
}

/// Parallel combs into series allpasses, one network per side.
pub struct Reverb {
    left: Channel,
    right: Channel,
    wet: f32,
}

impl Reverb {
    pub fn new(sample_rate: u32) -> Self {
        let scale = sample_rate as f32 / REFERENCE_RATE;
        Self {
            left: Channel::new(scale, 0),
            right: Channel::new(scale, STEREO_SPREAD),
            wet: 0.0,
        }
    }

    /// Wet percentage, `0.0..=100.0`.
    pub fn set_mix(&mut self, mix: f32) {
        let wet = EffectParams::default().with_reverb_mix(mix).wet_fraction();
        if wet == 0.0 && self.wet > 0.0 {
            self.left.clear();
            self.right.clear();
        }
        self.wet = wet;
    }

    pub fn mix(&self) -> f32 {
        self.wet * EffectParams::MAX_REVERB_MIX
    }

    #[inline]
    pub fn process(&mut self, left: f32, right: f32) -> (f32, f32) {
        if self.wet == 0.0 {
            return (left, right);
        }
        let input = (left + right) * INPUT_GAIN;
        let wet_left = self.left.process(input) * WET_GAIN;
        let wet_right = self.right.process(input) * WET_GAIN;
        let dry = 1.0 - self.wet;
        (
            left * dry + wet_left * self.wet,
            right * dry + wet_right * self.wet,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_pitch_interpolates() {
        let audio = AudioArc::new(vec![0.0, 1.0, 0.5], 48000, 1);
        let node = TimePitch::new(1.0);
        assert_eq!(node.read(&audio, 1.0), (1.0, 1.0));
        let (left, right) = node.read(&audio, 1.5);
        assert!((left - 0.75).abs() < 1e-6);
        assert_eq!(left, right);
    }

    #[test]
    fn test_time_pitch_holds_last_frame() {
        let audio = AudioArc::new(vec![0.0, 1.0], 48000, 1);
        let node = TimePitch::new(1.0);
        assert_eq!(node.read(&audio, 1.5), (1.0, 1.0));
    }

    #[test]
    fn test_time_pitch_rate_is_clamped() {
        assert_eq!(TimePitch::new(10.0).rate(), 2.0);
        assert_eq!(TimePitch::new(0.1).rate(), 0.5);
        assert_eq!(TimePitch::new(f32::NAN).rate(), 1.0);
    }

    #[test]
    fn test_dry_reverb_is_transparent() {
        let mut reverb = Reverb::new(48000);
        assert_eq!(reverb.process(0.3, -0.2), (0.3, -0.2));
    }

    #[test]
    fn test_wet_reverb_rings_after_impulse() {
        let mut reverb = Reverb::new(48000);
        reverb.set_mix(100.0);
        reverb.process(1.0, 1.0);

        let tail: f32 = (0..48000)
            .map(|_| {
                let (left, right) = reverb.process(0.0, 0.0);
                left.abs() + right.abs()
            })
            .sum();
        assert!(tail > 0.0);
    }

    #[test]
    fn test_mix_is_clamped() {
        let mut reverb = Reverb::new(44100);
        reverb.set_mix(250.0);
        assert_eq!(reverb.mix(), 100.0);
        reverb.set_mix(-5.0);
        assert_eq!(reverb.mix(), 0.0);
    }
}
