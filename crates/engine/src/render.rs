use std::sync::Arc;

use basedrop::{Owned, Shared};
use spindle_spectrum::SpectrumTap;
use spindle_transport::{AudioArc, EffectParams, OutputFormat, SessionToken};

use crate::RenderClock;
use crate::nodes::{Reverb, TimePitch};

/// A scheduled span of prepared audio, `start_frame..end_frame` at the
/// audio's own (output) rate.
pub(crate) struct Segment {
    pub audio: AudioArc,
    pub start_frame: usize,
    pub end_frame: usize,
    pub session: SessionToken,
}

/// Worker → render thread.
pub(crate) enum GraphCommand {
    Schedule(Shared<Segment>),
    Clear,
    SetPaused(bool),
    Retag(SessionToken),
    SetRate(f32),
    SetReverbMix(f32),
    InstallTap(Owned<SpectrumTap>),
    RemoveTap,
}

/// Render thread → worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RenderStatus {
    SegmentFinished(SessionToken),
}

/// Everything the audio callback runs: player node, time/pitch, reverb and
/// the optional spectrum tap, fed by a command ring.
///
/// Owned by the output once connected. `process` never allocates, locks or
/// frees; retired segments and taps are handed back to the worker's collector.
pub struct RenderGraph {
    channels: usize,
    commands: rtrb::Consumer<GraphCommand>,
    status: rtrb::Producer<RenderStatus>,
    clock: Arc<RenderClock>,
    segment: Option<Shared<Segment>>,
    session: SessionToken,
    cursor: f64,
    paused: bool,
    time_pitch: TimePitch,
    reverb: Reverb,
    tap: Option<Owned<SpectrumTap>>,
}

impl RenderGraph {
    pub(crate) fn new(
        format: OutputFormat,
        commands: rtrb::Consumer<GraphCommand>,
        status: rtrb::Producer<RenderStatus>,
        clock: Arc<RenderClock>,
        effects: EffectParams,
    ) -> Self {
        let mut reverb = Reverb::new(format.sample_rate);
        reverb.set_mix(effects.reverb_mix);
        Self {
            channels: format.channels.max(1) as usize,
            commands,
            status,
            clock,
            segment: None,
            session: SessionToken::NONE,
            cursor: 0.0,
            paused: true,
            time_pitch: TimePitch::new(effects.playback_rate),
            reverb,
            tap: None,
        }
    }

    /// Render one interleaved block.
    pub fn process(&mut self, out: &mut [f32]) {
        self.apply_commands();

        for frame in out.chunks_mut(self.channels) {
            let (left, right) = match self.next_frame() {
                Some((left, right)) => {
                    let (left, right) = self.reverb.process(left, right);
                    if let Some(tap) = self.tap.as_mut() {
                        tap.push((left + right) * 0.5);
                    }
                    (left, right)
                }
                None => (0.0, 0.0),
            };
            for (ch, sample) in frame.iter_mut().enumerate() {
                *sample = if ch % 2 == 0 { left } else { right };
            }
        }

        if let Some(segment) = self.segment.as_ref() {
            let consumed = (self.cursor - segment.start_frame as f64).max(0.0);
            self.clock
                .advance(consumed / segment.audio.sample_rate().max(1) as f64);
        }
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                GraphCommand::Schedule(segment) => {
                    self.cursor = segment.start_frame as f64;
                    self.session = segment.session;
                    self.clock.begin(segment.session);
                    self.segment = Some(segment);
                    self.discard_partial_tap();
                }
                GraphCommand::Clear => {
                    self.segment = None;
                    self.clock.reset();
                    self.discard_partial_tap();
                }
                GraphCommand::SetPaused(paused) => self.paused = paused,
                GraphCommand::Retag(session) => {
                    self.session = session;
                    if self.segment.is_some() {
                        self.clock.retag(session);
                    }
                }
                GraphCommand::SetRate(rate) => self.time_pitch.set_rate(rate),
                GraphCommand::SetReverbMix(mix) => self.reverb.set_mix(mix),
                GraphCommand::InstallTap(tap) => self.tap = Some(tap),
                GraphCommand::RemoveTap => self.tap = None,
            }
        }
    }

    #[inline]
    fn next_frame(&mut self) -> Option<(f32, f32)> {
        if self.paused {
            return None;
        }

        let (frame, end) = {
            let segment = self.segment.as_ref()?;
            let end = segment.end_frame as f64;
            if self.cursor >= end {
                (None, end)
            } else {
                (Some(self.time_pitch.read(&segment.audio, self.cursor)), end)
            }
        };

        match frame {
            Some(frame) => {
                self.cursor += self.time_pitch.rate();
                if self.cursor >= end {
                    self.finish();
                }
                Some(frame)
            }
            None => {
                self.finish();
                None
            }
        }
    }

    fn finish(&mut self) {
        if self.segment.take().is_some() {
            // The ring is sized well beyond what one worker tick can produce;
            // a full ring means the worker is gone.
            let _ = self.status.push(RenderStatus::SegmentFinished(self.session));
        }
        self.discard_partial_tap();
    }

    fn discard_partial_tap(&mut self) {
        if let Some(tap) = self.tap.as_mut() {
            tap.discard_partial();
        }
    }
}
