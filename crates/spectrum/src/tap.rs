use crate::{SpectralAnalyzer, SpectrumError, SpectrumPublisher};

/// Sample accumulator that runs on the render thread.
///
/// Built off the audio thread (it allocates), then moved in. `push` fills a
/// fixed block and analyzes it once full; nothing in the hot path allocates,
/// locks or blocks.
pub struct SpectrumTap {
    analyzer: SpectralAnalyzer,
    block: Vec<f32>,
    filled: usize,
    publisher: SpectrumPublisher,
}

impl SpectrumTap {
    pub fn new(block_size: usize, publisher: SpectrumPublisher) -> Result<Self, SpectrumError> {
        Ok(Self {
            analyzer: SpectralAnalyzer::new(block_size)?,
            block: vec![0.0; block_size],
            filled: 0,
            publisher,
        })
    }

    /// Feed one mono sample.
    #[inline]
    pub fn push(&mut self, sample: f32) {
        self.block[self.filled] = sample;
        self.filled += 1;
        if self.filled == self.block.len() {
            self.filled = 0;
            if let Some(frame) = self.analyzer.analyze(&self.block) {
                self.publisher.publish(frame);
            }
        }
    }

    /// Drop a partially filled block (end of stream, seek). Short blocks are
    /// never zero-padded into an analysis pass.
    #[inline]
    pub fn discard_partial(&mut self) {
        self.filled = 0;
    }
}
