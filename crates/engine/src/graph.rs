use std::sync::Arc;

use basedrop::{Collector, Owned, Shared};
use spindle_decode::SourceHandle;
use spindle_spectrum::SpectrumTap;
use spindle_transport::{AudioArc, EffectParams, OutputFormat, SessionToken, SourceFormat};

use crate::config::{GRAPH_COMMAND_CAPACITY, RENDER_STATUS_CAPACITY};
use crate::render::{GraphCommand, RenderStatus, Segment};
use crate::{AudioOutput, EngineError, RenderClock, RenderGraph};

struct Wiring {
    format: OutputFormat,
    commands: rtrb::Producer<GraphCommand>,
    status: rtrb::Consumer<RenderStatus>,
}

struct PreparedSource {
    native: SourceFormat,
    /// Audio converted to the output rate.
    audio: AudioArc,
}

impl PreparedSource {
    /// Map a native-frame span onto the prepared audio.
    fn span(&self, start_frame: u64, frame_count: Option<u64>) -> (usize, usize) {
        let prepared = self.audio.frames();
        let ratio = self.audio.sample_rate() as f64 / self.native.sample_rate.max(1) as f64;
        let to_prepared = |native: u64| ((native as f64 * ratio).round() as usize).min(prepared);

        let start = to_prepared(start_frame.min(self.native.frames));
        let end = match frame_count {
            Some(count) => to_prepared(start_frame.saturating_add(count).min(self.native.frames)),
            None => prepared,
        };
        (start, end.max(start))
    }
}

/// Worker-side view of the processing graph.
///
/// Owns the output, the prepared source and the producer ends of the render
/// thread's rings. Every mutation of the graph the audio thread runs goes
/// through here, on the engine worker thread.
pub struct PlaybackGraph {
    output: Box<dyn AudioOutput>,
    collector: Collector,
    clock: Arc<RenderClock>,
    wiring: Option<Wiring>,
    source: Option<PreparedSource>,
    effects: EffectParams,
    running: bool,
    tap_installed: bool,
}

impl PlaybackGraph {
    pub fn new(output: Box<dyn AudioOutput>, clock: Arc<RenderClock>) -> Self {
        Self {
            output,
            collector: Collector::new(),
            clock,
            wiring: None,
            source: None,
            effects: EffectParams::default(),
            running: false,
            tap_installed: false,
        }
    }

    /// Ask the output which format it will render at.
    pub fn prepare_output(&mut self) -> Result<OutputFormat, EngineError> {
        self.output.prepare()
    }

    /// Wire player → time/pitch → reverb → output at `format`. A no-op when
    /// already wired at the same format.
    pub fn configure(&mut self, format: OutputFormat) -> Result<(), EngineError> {
        if self.wiring.as_ref().is_some_and(|w| w.format == format) {
            return Ok(());
        }
        self.disconnect();

        let (commands, command_rx) = rtrb::RingBuffer::new(GRAPH_COMMAND_CAPACITY);
        let (status_tx, status) = rtrb::RingBuffer::new(RENDER_STATUS_CAPACITY);
        let graph = RenderGraph::new(
            format,
            command_rx,
            status_tx,
            self.clock.clone(),
            self.effects,
        );
        self.output.connect(graph)?;
        self.wiring = Some(Wiring {
            format,
            commands,
            status,
        });
        log::debug!(
            "graph wired at {} Hz, {} channels",
            format.sample_rate,
            format.channels
        );
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.wiring.is_some()
    }

    /// Prepare an opened source for the wired format. Returns its native format.
    pub fn load_source(&mut self, handle: SourceHandle) -> Result<SourceFormat, EngineError> {
        let format = self.wiring.as_ref().ok_or(EngineError::NotConfigured)?.format;
        let native = handle.format();
        let audio = handle
            .audio
            .resample(format.sample_rate)
            .map_err(|err| EngineError::Prepare(format!("{}: {err}", handle.locator)))?;

        self.source = Some(PreparedSource {
            native,
            audio,
        });
        Ok(native)
    }

    pub fn unload_source(&mut self) {
        self.source = None;
    }

    /// Replace whatever is scheduled with `frame_count` frames (or the rest
    /// of the source) starting at native frame `start_frame`.
    pub fn schedule(
        &mut self,
        start_frame: u64,
        frame_count: Option<u64>,
        session: SessionToken,
    ) -> Result<(), EngineError> {
        let source = self.source.as_ref().ok_or(EngineError::NoSource)?;
        let (start, end) = source.span(start_frame, frame_count);
        let segment = Segment {
            audio: source.audio.clone(),
            start_frame: start,
            end_frame: end,
            session,
        };
        let segment = Shared::new(&self.collector.handle(), segment);
        self.send(GraphCommand::Schedule(segment))
    }

    pub fn clear_schedule(&mut self) -> Result<(), EngineError> {
        if self.wiring.is_none() {
            return Ok(());
        }
        self.send(GraphCommand::Clear)
    }

    /// Unpause the player node, starting the output if needed.
    pub fn start(&mut self) -> Result<(), EngineError> {
        self.send(GraphCommand::SetPaused(false))?;
        if !self.running {
            self.output.start()?;
            self.running = true;
        }
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), EngineError> {
        if self.wiring.is_none() {
            return Ok(());
        }
        self.send(GraphCommand::SetPaused(true))
    }

    /// Stop the output and tear down the wiring. The prepared source survives
    /// so a later `configure` + `schedule` can resume it.
    pub fn stop(&mut self) {
        self.disconnect();
        self.clock.reset();
    }

    pub fn is_running(&self) -> bool {
        self.running && self.output.is_running()
    }

    /// Re-stamp the scheduled segment's completion with `session`.
    pub fn retag(&mut self, session: SessionToken) -> Result<(), EngineError> {
        if self.wiring.is_none() {
            return Ok(());
        }
        self.send(GraphCommand::Retag(session))
    }

    pub fn install_tap(&mut self, tap: SpectrumTap) -> Result<(), EngineError> {
        let tap = Owned::new(&self.collector.handle(), tap);
        self.send(GraphCommand::InstallTap(tap))?;
        self.tap_installed = true;
        Ok(())
    }

    pub fn remove_tap(&mut self) -> Result<(), EngineError> {
        if !self.tap_installed {
            return Ok(());
        }
        self.tap_installed = false;
        self.send(GraphCommand::RemoveTap)
    }

    pub fn set_effects(&mut self, effects: EffectParams) -> Result<(), EngineError> {
        self.effects = effects;
        if self.wiring.is_none() {
            return Ok(());
        }
        self.send(GraphCommand::SetRate(effects.playback_rate))?;
        self.send(GraphCommand::SetReverbMix(effects.reverb_mix))
    }

    /// Sessions whose segments the render thread has finished since the last
    /// call, oldest first. Also releases retired render-side allocations.
    pub fn drain_finished(&mut self) -> Vec<SessionToken> {
        let mut finished = Vec::new();
        if let Some(wiring) = self.wiring.as_mut() {
            while let Ok(RenderStatus::SegmentFinished(session)) = wiring.status.pop() {
                finished.push(session);
            }
        }
        self.collector.collect();
        finished
    }

    fn send(&mut self, command: GraphCommand) -> Result<(), EngineError> {
        let wiring = self.wiring.as_mut().ok_or(EngineError::NotConfigured)?;
        wiring.commands.push(command).map_err(|_| {
            log::warn!("render command queue full");
            EngineError::QueueFull
        })
    }

    fn disconnect(&mut self) {
        self.output.stop();
        self.wiring = None;
        self.running = false;
        self.tap_installed = false;
        self.collector.collect();
    }
}

impl Drop for PlaybackGraph {
    fn drop(&mut self) {
        self.output.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{OfflineHandle, OfflineOutput};
    use spindle_transport::SourceLocator;

    fn graph(sample_rate: u32) -> (PlaybackGraph, OfflineHandle, Arc<RenderClock>) {
        let (output, handle) = OfflineOutput::new(OutputFormat {
            sample_rate,
            channels: 2,
        });
        let clock = Arc::new(RenderClock::new());
        (
            PlaybackGraph::new(Box::new(output), clock.clone()),
            handle,
            clock,
        )
    }

    fn source(frames: usize, sample_rate: u32) -> SourceHandle {
        SourceHandle {
            locator: SourceLocator::new("mem://tone"),
            audio: AudioArc::new(vec![0.5; frames], sample_rate, 1),
        }
    }

    #[test]
    fn test_configure_is_idempotent() {
        let (mut graph, handle, _) = graph(1000);
        let format = graph.prepare_output().unwrap();
        graph.configure(format).unwrap();
        graph.load_source(source(100, 1000)).unwrap();
        graph.schedule(0, None, SessionToken::from_raw(1)).unwrap();
        graph.start().unwrap();

        graph.configure(format).unwrap();
        assert!(handle.is_running());
        let out = handle.render(10);
        assert!(out.iter().all(|s| *s == 0.5));
    }

    #[test]
    fn test_schedule_requires_source_and_wiring() {
        let (mut graph, _, _) = graph(1000);
        assert!(matches!(
            graph.schedule(0, None, SessionToken::from_raw(1)),
            Err(EngineError::NoSource)
        ));
        assert!(matches!(
            graph.load_source(source(10, 1000)),
            Err(EngineError::NotConfigured)
        ));
    }

    #[test]
    fn test_bounded_segment_finishes_early() {
        let (mut graph, handle, _) = graph(1000);
        let format = graph.prepare_output().unwrap();
        graph.configure(format).unwrap();
        graph.load_source(source(1000, 1000)).unwrap();
        graph.schedule(100, Some(50), SessionToken::from_raw(5)).unwrap();
        graph.start().unwrap();

        handle.render(50);
        assert_eq!(graph.drain_finished(), vec![SessionToken::from_raw(5)]);
    }

    #[test]
    fn test_native_offsets_map_through_resampling() {
        let (mut graph, handle, clock) = graph(2000);
        let format = graph.prepare_output().unwrap();
        graph.configure(format).unwrap();
        let native = graph.load_source(source(1000, 1000)).unwrap();
        assert_eq!(native.sample_rate, 1000);
        assert_eq!(native.frames, 1000);

        let session = SessionToken::from_raw(2);
        graph.schedule(500, None, session).unwrap();
        graph.start().unwrap();
        handle.render(200);
        let elapsed = clock.elapsed_for(session).unwrap();
        assert!((elapsed - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_stop_keeps_source_and_resets_clock() {
        let (mut graph, handle, clock) = graph(1000);
        let format = graph.prepare_output().unwrap();
        graph.configure(format).unwrap();
        graph.load_source(source(100, 1000)).unwrap();
        graph.schedule(0, None, SessionToken::from_raw(1)).unwrap();
        graph.start().unwrap();
        handle.render(10);

        graph.stop();
        assert!(!graph.is_configured());
        assert!(!handle.is_connected());
        assert_eq!(clock.elapsed_for(SessionToken::from_raw(1)), None);

        graph.configure(format).unwrap();
        graph.schedule(50, None, SessionToken::from_raw(2)).unwrap();
        graph.start().unwrap();
        assert!(handle.render(10).iter().all(|s| *s == 0.5));
    }

    #[test]
    fn test_pause_freezes_output() {
        let (mut graph, handle, _) = graph(1000);
        let format = graph.prepare_output().unwrap();
        graph.configure(format).unwrap();
        graph.load_source(source(100, 1000)).unwrap();
        graph.schedule(0, None, SessionToken::from_raw(1)).unwrap();
        graph.start().unwrap();
        graph.pause().unwrap();
        assert!(handle.render(10).iter().all(|s| *s == 0.0));
    }
}
