/// Track position derived from the segment start plus the render clock's
/// progress through that segment.
///
/// Every schedule restarts the render clock at zero, so the clock keeps the
/// offset the current segment began at. Samples taken while playing never go
/// backwards until the next [`rebase`](Self::rebase).
#[derive(Debug, Clone, Default)]
pub struct PositionClock {
    segment_offset: f64,
    duration: f64,
    last: f64,
}

impl PositionClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: f64) {
        self.duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        self.segment_offset = self.clamp(self.segment_offset);
        self.last = self.clamp(self.last);
    }

    pub fn segment_offset(&self) -> f64 {
        self.segment_offset
    }

    /// Clamp to `[0, duration]`. With no known duration only the lower bound applies.
    pub fn clamp(&self, seconds: f64) -> f64 {
        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        if self.duration > 0.0 {
            seconds.min(self.duration)
        } else {
            seconds
        }
    }

    /// Start a new segment at `offset` (seek, resume).
    pub fn rebase(&mut self, offset: f64) {
        self.segment_offset = self.clamp(offset);
        self.last = self.segment_offset;
    }

    /// Current position. `elapsed` is the render clock's progress through the
    /// segment, or `None` when the segment in flight is not ours.
    pub fn sample(&mut self, elapsed: Option<f64>) -> f64 {
        let raw = self.segment_offset + elapsed.unwrap_or(0.0);
        let position = self.clamp(raw).max(self.last);
        self.last = position;
        position
    }

    /// Freeze the current position as the new segment offset (pause,
    /// interruption).
    pub fn capture(&mut self, elapsed: Option<f64>) -> f64 {
        let position = self.sample(elapsed);
        self.segment_offset = position;
        position
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_plus_elapsed() {
        let mut clock = PositionClock::new();
        clock.set_duration(180.0);
        clock.rebase(30.0);
        assert_eq!(clock.sample(Some(2.5)), 32.5);
        assert_eq!(clock.sample(None), 32.5);
    }

    #[test]
    fn test_samples_never_go_backwards() {
        let mut clock = PositionClock::new();
        clock.set_duration(10.0);
        let mut previous = 0.0;
        for elapsed in [0.1, 0.5, 0.4, 1.0, 0.0, 20.0, 3.0] {
            let position = clock.sample(Some(elapsed));
            assert!(position >= previous);
            assert!(position <= 10.0);
            previous = position;
        }
        assert_eq!(previous, 10.0);
    }

    #[test]
    fn test_rebase_allows_backward_seek() {
        let mut clock = PositionClock::new();
        clock.set_duration(100.0);
        clock.sample(Some(50.0));
        clock.rebase(10.0);
        assert_eq!(clock.sample(None), 10.0);
    }

    #[test]
    fn test_capture_freezes_position() {
        let mut clock = PositionClock::new();
        clock.set_duration(100.0);
        clock.rebase(40.0);
        assert_eq!(clock.capture(Some(2.0)), 42.0);
        assert_eq!(clock.segment_offset(), 42.0);
        assert_eq!(clock.capture(None), 42.0);
    }

    #[test]
    fn test_clamp_rejects_negative_and_nan() {
        let clock = PositionClock::new();
        assert_eq!(clock.clamp(-4.0), 0.0);
        assert_eq!(clock.clamp(f64::NAN), 0.0);
        assert_eq!(clock.clamp(1e6), 1e6);
    }
}
