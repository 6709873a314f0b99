use std::sync::Arc;
use std::time::Instant;

use spindle_decode::{FileSourceProvider, SourceProvider};
use spindle_engine::{
    AudioOutput, CpalOutput, EngineEvent, EngineRequest, EngineWorker, OfflineHandle,
    OfflineOutput, TapRequest,
};
use spindle_spectrum::{DEFAULT_BLOCK_SIZE, SpectralAnalyzer, SpectrumFrame};
use spindle_spectrum::{VisualizationFeed, visualization_channel};
use spindle_transport::{
    EffectParams, OutputFormat, SessionSource, SessionToken, SourceFormat, Track,
};

use crate::queue::{Advance, Retreat};
use crate::{
    ArtworkResolver, AudioSession, NoopAudioSession, NowPlaying, NowPlayingSink, PlayerConfig,
    PlayerError, PositionClock, QueueContext, RemoteCommand, RouteChange, SystemEvent,
    TransportState, TransportStatus,
};

/// Published changes, drained by [`PlaybackController::poll`].
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    TrackChanged(Option<Track>),
    StateChanged(TransportStatus),
    /// Duration in seconds of the current track, once the engine has opened it.
    DurationKnown(f64),
    /// The queue ran out after a track finished.
    PlaybackEnded,
    /// An asynchronous operation failed.
    Error(PlayerError),
}

#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub track: Option<Track>,
    pub status: TransportStatus,
    pub position: f64,
    pub duration: f64,
    pub effects: EffectParams,
    pub loop_single: bool,
    pub session: SessionToken,
}

/// The one authority over what is playing.
///
/// Commands are translated into [`EngineRequest`]s and submitted without
/// waiting; the worker's completions come back through [`poll`](Self::poll).
/// Every transport-initiating operation mints a fresh [`SessionToken`], and
/// completions carrying any other token are dropped.
pub struct PlaybackController {
    worker: EngineWorker,
    config: PlayerConfig,
    block_size: usize,
    sessions: SessionSource,
    session: SessionToken,
    state: TransportState,
    queue: QueueContext,
    clock: PositionClock,
    format: Option<SourceFormat>,
    effects: EffectParams,
    loop_single: bool,
    feed: VisualizationFeed,
    visualization_enabled: bool,
    audio_session: Box<dyn AudioSession>,
    now_playing: Option<Box<dyn NowPlayingSink>>,
    artwork: Option<Box<dyn ArtworkResolver>>,
    pending_resume: Option<Instant>,
    last_now_playing: Option<Instant>,
    events: Vec<PlayerEvent>,
}

impl PlaybackController {
    pub fn new(worker: EngineWorker, config: PlayerConfig) -> Self {
        let block_size = match SpectralAnalyzer::check_block_size(config.spectrum_block_size) {
            Ok(()) => config.spectrum_block_size,
            Err(err) => {
                log::warn!("{err}; using {DEFAULT_BLOCK_SIZE}");
                DEFAULT_BLOCK_SIZE
            }
        };
        let (_, feed) = visualization_channel();
        let effects = config.effects();

        let controller = Self {
            worker,
            block_size,
            sessions: SessionSource::new(),
            session: SessionToken::NONE,
            state: TransportState::Idle,
            queue: QueueContext::new(),
            clock: PositionClock::new(),
            format: None,
            effects,
            loop_single: config.loop_single,
            feed,
            visualization_enabled: true,
            audio_session: Box::new(NoopAudioSession),
            now_playing: None,
            artwork: None,
            pending_resume: None,
            last_now_playing: None,
            events: Vec::new(),
            config,
        };
        if effects != EffectParams::default() {
            if let Err(err) = controller.worker.submit(EngineRequest::SetEffects(effects)) {
                log::warn!("initial effects not applied: {err}");
            }
        }
        controller
    }

    /// Play through the default output device, reading files from disk.
    pub fn with_default_output(config: PlayerConfig) -> Result<Self, PlayerError> {
        let sources: Arc<dyn SourceProvider> = match &config.library_root {
            Some(root) => Arc::new(FileSourceProvider::with_root(root)),
            None => Arc::new(FileSourceProvider::new()),
        };
        let worker = EngineWorker::spawn(
            || Ok(Box::new(CpalOutput::new()) as Box<dyn AudioOutput>),
            sources,
            config.worker_queue_capacity,
        )?;
        Ok(Self::new(worker, config))
    }

    /// Play into an [`OfflineOutput`]; audio is pulled through the returned handle.
    pub fn offline(
        config: PlayerConfig,
        sources: Arc<dyn SourceProvider>,
        format: OutputFormat,
    ) -> Result<(Self, OfflineHandle), PlayerError> {
        let (output, handle) = OfflineOutput::new(format);
        let worker = EngineWorker::spawn(
            move || Ok(Box::new(output) as Box<dyn AudioOutput>),
            sources,
            config.worker_queue_capacity,
        )?;
        Ok((Self::new(worker, config), handle))
    }

    pub fn set_audio_session(&mut self, session: impl AudioSession + 'static) {
        self.audio_session = Box::new(session);
    }

    pub fn set_now_playing(
        &mut self,
        sink: impl NowPlayingSink + 'static,
        artwork: Option<Box<dyn ArtworkResolver>>,
    ) {
        self.now_playing = Some(Box::new(sink));
        self.artwork = artwork;
    }

    // Transport

    /// Play `track` from the start, making it the queue's current item.
    pub fn play(&mut self, track: Track) -> Result<(), PlayerError> {
        self.queue.select(track.clone());
        self.start(track)
    }

    pub fn pause(&mut self) -> Result<(), PlayerError> {
        match self.state.clone() {
            TransportState::Playing { track }
            | TransportState::RouteChanging {
                track,
                playing: true,
            } => {
                let position = self.capture_position();
                self.submit(EngineRequest::Pause)?;
                self.set_state(TransportState::Paused { track, position });
            }
            TransportState::RouteChanging {
                track,
                playing: false,
            } => {
                let position = self.clock.segment_offset();
                self.set_state(TransportState::Paused { track, position });
            }
            TransportState::Loading { track } => {
                self.submit(EngineRequest::Pause)?;
                self.set_state(TransportState::Paused {
                    track,
                    position: 0.0,
                });
            }
            TransportState::Seeking {
                track,
                resume_playing: true,
            } => {
                self.submit(EngineRequest::Pause)?;
                self.set_state(TransportState::Seeking {
                    track,
                    resume_playing: false,
                });
            }
            TransportState::Interrupted {
                track,
                position,
                was_playing: true,
            } => {
                self.pending_resume = None;
                self.set_state(TransportState::Interrupted {
                    track,
                    position,
                    was_playing: false,
                });
            }
            state => log::debug!("pause ignored while {}", state.status()),
        }
        Ok(())
    }

    /// Continue the current track from where it was left. The source is
    /// reopened and the graph rewired, since the engine may have been torn
    /// down in the meantime.
    pub fn resume(&mut self) -> Result<(), PlayerError> {
        let track = match self.state.clone() {
            TransportState::Playing { .. } | TransportState::Loading { .. } => return Ok(()),
            TransportState::Paused { track, position }
            | TransportState::Interrupted {
                track, position, ..
            } => {
                self.clock.rebase(position);
                track
            }
            TransportState::RouteChanging { track, .. } => {
                let position = self.capture_position();
                self.clock.rebase(position);
                track
            }
            TransportState::Seeking { track, .. } => track,
            TransportState::Idle | TransportState::Stopped => {
                return Err(PlayerError::NoCurrentTrack);
            }
        };

        self.pending_resume = None;
        let offset = self.clock.segment_offset();
        let duration = self.clock.duration();
        if duration > 0.0 && offset >= duration {
            log::debug!("resume at the end of '{}', advancing", track.name);
            return self.next();
        }

        self.activate_audio_session()?;
        let session = self.mint();
        let start_frame = match self.format {
            Some(format) => format.frame_at(offset),
            None => {
                self.clock.rebase(0.0);
                0
            }
        };
        let tap = self.tap_request();
        self.submit(EngineRequest::Load {
            session,
            locator: track.locator.clone(),
            start_frame,
            autoplay: true,
            tap,
        })?;
        log::info!("{session}: resuming '{}' at {offset:.3}s", track.name);
        self.set_state(TransportState::Playing { track });
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), PlayerError> {
        self.pending_resume = None;
        let session = self.mint();
        self.submit(EngineRequest::Stop)?;
        self.clock.reset();
        self.format = None;
        self.queue.release();
        self.feed.clear();
        log::debug!("{session}: stopped");
        self.set_state(TransportState::Stopped);
        Ok(())
    }

    /// Move to `time` seconds, clamped to `[0, duration - margin]`. Playing
    /// or paused is preserved.
    pub fn seek(&mut self, time: f64) -> Result<(), PlayerError> {
        let (track, resume_playing) = match self.state.clone() {
            TransportState::Playing { track }
            | TransportState::RouteChanging {
                track,
                playing: true,
            } => (track, true),
            TransportState::Paused { track, .. }
            | TransportState::RouteChanging {
                track,
                playing: false,
            } => (track, false),
            TransportState::Seeking {
                track,
                resume_playing,
            } => (track, resume_playing),
            TransportState::Interrupted {
                track, was_playing, ..
            } => {
                // Only the captured position moves; the resume picks it up.
                let target = self.seek_target(time);
                self.mint();
                self.clock.rebase(target);
                self.set_state(TransportState::Interrupted {
                    track,
                    position: target,
                    was_playing,
                });
                return Ok(());
            }
            state => {
                log::debug!("seek ignored while {}", state.status());
                return Ok(());
            }
        };

        let target = self.seek_target(time);
        let session = self.mint();
        self.clock.rebase(target);
        let start_frame = self.format.map_or(0, |f| f.frame_at(target));
        self.submit(EngineRequest::Seek {
            session,
            start_frame,
            resume: resume_playing,
        })?;
        log::debug!("{session}: seek to {target:.3}s");
        self.set_state(TransportState::Seeking {
            track,
            resume_playing,
        });
        Ok(())
    }

    pub fn skip(&mut self, delta_seconds: f64) -> Result<(), PlayerError> {
        let position = self.position();
        self.seek(position + delta_seconds)
    }

    pub fn next(&mut self) -> Result<(), PlayerError> {
        if self.loop_single && self.state.track().is_some() {
            return self.seek(0.0);
        }
        match self.queue.advance() {
            Advance::Play(track) => self.start(track),
            Advance::Exhausted => {
                if self.state.track().is_none() {
                    return Ok(());
                }
                self.stop()?;
                log::info!("playback ended");
                self.events.push(PlayerEvent::PlaybackEnded);
                Ok(())
            }
        }
    }

    pub fn previous(&mut self) -> Result<(), PlayerError> {
        match self.queue.retreat() {
            Retreat::Play(track) => self.start(track),
            Retreat::RestartCurrent => self.seek(0.0),
        }
    }

    // Queue

    /// Replace the queue with `tracks` and play the first one.
    pub fn play_playlist(&mut self, tracks: Vec<Track>, shuffle: bool) -> Result<(), PlayerError> {
        match self.queue.load_playlist(tracks, shuffle) {
            Some(first) => self.start(first),
            None => self.stop(),
        }
    }

    pub fn enqueue_next(&mut self, track: Track) -> Result<(), PlayerError> {
        match self.queue.enqueue_next(track) {
            Some(track) => self.start(track),
            None => Ok(()),
        }
    }

    pub fn enqueue_last(&mut self, track: Track) -> Result<(), PlayerError> {
        match self.queue.enqueue_last(track) {
            Some(track) => self.start(track),
            None => Ok(()),
        }
    }

    // Effects

    pub fn set_reverb_mix(&mut self, mix: f32) -> Result<(), PlayerError> {
        self.effects = self.effects.with_reverb_mix(mix);
        self.submit(EngineRequest::SetEffects(self.effects))
    }

    pub fn set_playback_rate(&mut self, rate: f32) -> Result<(), PlayerError> {
        self.effects = self.effects.with_playback_rate(rate);
        self.submit(EngineRequest::SetEffects(self.effects))
    }

    pub fn set_loop_single(&mut self, enabled: bool) {
        self.loop_single = enabled;
    }

    // External events

    pub fn handle_remote(&mut self, command: RemoteCommand) -> Result<(), PlayerError> {
        log::debug!("remote command {command:?}");
        match command {
            RemoteCommand::Play => self.play_or_resume(),
            RemoteCommand::Pause => self.pause(),
            RemoteCommand::TogglePlayPause if self.state.is_playing() => self.pause(),
            RemoteCommand::TogglePlayPause => self.play_or_resume(),
            RemoteCommand::Next => self.next(),
            RemoteCommand::Previous => self.previous(),
            RemoteCommand::SeekTo(time) => self.seek(time),
            RemoteCommand::SkipForward(seconds) => self.skip(seconds),
            RemoteCommand::SkipBackward(seconds) => self.skip(-seconds),
            RemoteCommand::Stop => self.stop(),
        }
    }

    pub fn handle_system_event(&mut self, event: SystemEvent) -> Result<(), PlayerError> {
        log::info!("system event {event:?} while {}", self.state.status());
        match event {
            SystemEvent::InterruptionBegan => self.on_interruption_began(),
            SystemEvent::InterruptionEnded { should_resume } => {
                self.on_interruption_ended(should_resume);
                Ok(())
            }
            SystemEvent::RouteChanged(change) => self.on_route_changed(change),
            SystemEvent::EngineConfigurationChanged => self.on_engine_configuration_changed(),
        }
    }

    /// Natural end of the segment scheduled under `session`.
    pub fn on_segment_finished(&mut self, session: SessionToken) -> Result<(), PlayerError> {
        if session != self.session {
            log::debug!("stale completion from {session} (current {})", self.session);
            return Ok(());
        }
        match &self.state {
            TransportState::Playing { .. }
            | TransportState::Seeking {
                resume_playing: true,
                ..
            }
            | TransportState::RouteChanging { playing: true, .. } => {
                log::debug!("{session}: track finished");
                self.next()
            }
            state => {
                log::debug!("{session}: completion ignored while {}", state.status());
                Ok(())
            }
        }
    }

    /// Apply engine completions, run a due automatic resume and return what
    /// changed since the last call.
    pub fn poll(&mut self) -> Vec<PlayerEvent> {
        let completions: Vec<EngineEvent> = self.worker.events().try_iter().collect();
        for event in completions {
            self.handle_engine_event(event);
        }

        if self.pending_resume.is_some_and(|due| Instant::now() >= due) {
            self.pending_resume = None;
            if let Err(err) = self.resume() {
                log::error!("automatic resume failed: {err}");
                self.events.push(PlayerEvent::Error(err));
            }
        }

        if self.state.is_rendering()
            && self
                .last_now_playing
                .is_none_or(|at| at.elapsed() >= self.config.now_playing_interval())
        {
            self.publish_now_playing();
        }

        std::mem::take(&mut self.events)
    }

    /// Wait for the worker to run everything submitted so far, then poll.
    pub fn sync(&mut self) -> Result<Vec<PlayerEvent>, PlayerError> {
        self.worker.barrier()?;
        Ok(self.poll())
    }

    // Published state

    pub fn state(&self) -> &TransportState {
        &self.state
    }

    pub fn status(&self) -> TransportStatus {
        self.state.status()
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.state.track()
    }

    pub fn session(&self) -> SessionToken {
        self.session
    }

    pub fn queue(&self) -> &QueueContext {
        &self.queue
    }

    pub fn effects(&self) -> EffectParams {
        self.effects
    }

    pub fn loop_single(&self) -> bool {
        self.loop_single
    }

    pub fn duration(&self) -> f64 {
        self.clock.duration()
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    /// Current position in seconds, clamped to `[0, duration]`.
    pub fn position(&mut self) -> f64 {
        match &self.state {
            TransportState::Idle | TransportState::Stopped => 0.0,
            TransportState::Paused { position, .. }
            | TransportState::Interrupted { position, .. } => *position,
            _ => {
                let elapsed = self.live_elapsed();
                self.clock.sample(elapsed)
            }
        }
    }

    pub fn snapshot(&mut self) -> PlayerSnapshot {
        PlayerSnapshot {
            position: self.position(),
            track: self.state.track().cloned(),
            status: self.state.status(),
            duration: self.clock.duration(),
            effects: self.effects,
            loop_single: self.loop_single,
            session: self.session,
        }
    }

    /// Latest spectrum pass.
    pub fn visualization(&mut self) -> SpectrumFrame {
        self.feed.latest()
    }

    pub fn visualization_passes(&self) -> u64 {
        self.feed.passes()
    }

    pub fn visualization_enabled(&self) -> bool {
        self.visualization_enabled
    }

    /// Attach or detach the spectrum tap. Disabling zeroes the levels;
    /// enabling mid-track starts analysis without reloading the source.
    pub fn set_visualization_enabled(&mut self, enabled: bool) -> Result<(), PlayerError> {
        if enabled == self.visualization_enabled {
            return Ok(());
        }
        self.visualization_enabled = enabled;
        if !enabled {
            self.feed.clear();
            return self.submit(EngineRequest::RemoveTap);
        }
        let wired = matches!(
            self.state,
            TransportState::Loading { .. }
                | TransportState::Playing { .. }
                | TransportState::Paused { .. }
                | TransportState::Seeking { .. }
        );
        match self.tap_request() {
            Some(tap) if wired => self.submit(EngineRequest::InstallTap(tap)),
            _ => Ok(()),
        }
    }

    // Internals

    fn start(&mut self, track: Track) -> Result<(), PlayerError> {
        self.pending_resume = None;
        self.activate_audio_session()?;
        let session = self.mint();
        self.clock.reset();
        self.format = None;
        let tap = self.tap_request();
        self.submit(EngineRequest::Load {
            session,
            locator: track.locator.clone(),
            start_frame: 0,
            autoplay: true,
            tap,
        })?;
        log::info!("{session}: playing '{}'", track.name);
        self.set_state(TransportState::Loading { track });
        Ok(())
    }

    fn play_or_resume(&mut self) -> Result<(), PlayerError> {
        match self.state {
            TransportState::Idle | TransportState::Stopped => match self.queue.current().cloned() {
                Some(track) => self.start(track),
                None => self.next(),
            },
            _ => self.resume(),
        }
    }

    fn on_interruption_began(&mut self) -> Result<(), PlayerError> {
        let Some((track, position, was_playing)) = self.hold() else {
            self.mint();
            return Ok(());
        };
        self.pending_resume = None;
        self.mint();
        self.submit(EngineRequest::Pause)?;
        self.clock.rebase(position);
        self.set_state(TransportState::Interrupted {
            track,
            position,
            was_playing,
        });
        Ok(())
    }

    fn on_interruption_ended(&mut self, should_resume: bool) {
        let TransportState::Interrupted {
            track,
            position,
            was_playing,
        } = self.state.clone()
        else {
            log::debug!("interruption end ignored while {}", self.state.status());
            return;
        };

        if should_resume && was_playing {
            self.pending_resume = Some(Instant::now() + self.config.settle_delay());
        } else {
            self.set_state(TransportState::Paused { track, position });
        }
    }

    fn on_route_changed(&mut self, change: RouteChange) -> Result<(), PlayerError> {
        if change == RouteChange::DeviceRemoved {
            let Some((track, position, _)) = self.hold() else {
                self.mint();
                return Ok(());
            };
            self.pending_resume = None;
            self.mint();
            self.submit(EngineRequest::Halt)?;
            self.clock.rebase(position);
            self.set_state(TransportState::Paused { track, position });
            return Ok(());
        }

        match self.state.clone() {
            TransportState::Playing { track } => {
                self.retag()?;
                self.set_state(TransportState::RouteChanging {
                    track,
                    playing: true,
                });
            }
            TransportState::Paused { track, .. } => {
                self.retag()?;
                self.set_state(TransportState::RouteChanging {
                    track,
                    playing: false,
                });
            }
            TransportState::RouteChanging { .. } | TransportState::Interrupted { .. } => {
                self.retag()?;
            }
            // The in-flight acknowledgement would be fenced out; issue the
            // operation again under a fresh session.
            TransportState::Loading { track } => self.start(track)?,
            TransportState::Seeking { .. } => {
                let target = self.clock.segment_offset();
                self.seek(target)?;
            }
            TransportState::Idle | TransportState::Stopped => {
                self.mint();
            }
        }
        Ok(())
    }

    fn on_engine_configuration_changed(&mut self) -> Result<(), PlayerError> {
        let Some((track, position, was_playing)) = self.hold() else {
            self.mint();
            return Ok(());
        };
        self.mint();
        self.submit(EngineRequest::Halt)?;
        self.clock.rebase(position);
        if was_playing {
            self.pending_resume = Some(Instant::now() + self.config.settle_delay());
            self.set_state(TransportState::Interrupted {
                track,
                position,
                was_playing,
            });
        } else {
            self.pending_resume = None;
            self.set_state(TransportState::Paused { track, position });
        }
        Ok(())
    }

    /// Track, frozen position and whether audio was running, for states
    /// that hold a track.
    fn hold(&mut self) -> Option<(Track, f64, bool)> {
        let was_playing = self.state.is_playing();
        match self.state.clone() {
            TransportState::Idle | TransportState::Stopped => None,
            TransportState::Loading { track } => Some((track, 0.0, true)),
            TransportState::Playing { track } | TransportState::RouteChanging { track, .. } => {
                Some((track, self.capture_position(), was_playing))
            }
            TransportState::Paused { track, position } => Some((track, position, false)),
            TransportState::Seeking { track, .. } => {
                Some((track, self.clock.segment_offset(), was_playing))
            }
            TransportState::Interrupted {
                track,
                position,
                was_playing,
            } => Some((track, position, was_playing)),
        }
    }

    fn retag(&mut self) -> Result<(), PlayerError> {
        let session = self.mint();
        self.submit(EngineRequest::Retag { session })
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        let session = event.session();
        if session != self.session {
            log::debug!("dropping stale {event:?} (current {})", self.session);
            return;
        }

        match event {
            EngineEvent::Loaded { format, .. } => {
                let duration = format.duration_secs();
                self.format = Some(format);
                self.clock.set_duration(duration);
                self.events.push(PlayerEvent::DurationKnown(duration));
                match self.state.clone() {
                    TransportState::Loading { track } => {
                        self.set_state(TransportState::Playing { track })
                    }
                    _ => self.publish_now_playing(),
                }
            }
            EngineEvent::Scheduled { .. } => {
                if let TransportState::Seeking {
                    track,
                    resume_playing,
                } = self.state.clone()
                {
                    let next = if resume_playing {
                        TransportState::Playing { track }
                    } else {
                        TransportState::Paused {
                            track,
                            position: self.clock.segment_offset(),
                        }
                    };
                    self.set_state(next);
                }
            }
            EngineEvent::SegmentFinished { session } => {
                if let Err(err) = self.on_segment_finished(session) {
                    log::error!("advancing after {session} failed: {err}");
                    self.events.push(PlayerEvent::Error(err));
                }
            }
            EngineEvent::Failed { error, .. } => {
                let error = PlayerError::from(error);
                log::error!("{session}: {error}");
                self.enter_idle();
                self.events.push(PlayerEvent::Error(error));
            }
        }
    }

    fn enter_idle(&mut self) {
        self.pending_resume = None;
        self.clock.reset();
        self.format = None;
        self.set_state(TransportState::Idle);
    }

    fn activate_audio_session(&mut self) -> Result<(), PlayerError> {
        let result = self.audio_session.activate();
        if let Err(err) = &result {
            log::error!("audio session activation failed: {err}");
            self.enter_idle();
        }
        result
    }

    fn set_state(&mut self, next: TransportState) {
        let status_changed = self.state.status() != next.status();
        let track_changed = self.state.track().map(|t| t.id) != next.track().map(|t| t.id);
        if status_changed {
            log::debug!("{} -> {}", self.state.status(), next.status());
        }
        self.state = next;

        if track_changed {
            self.events
                .push(PlayerEvent::TrackChanged(self.state.track().cloned()));
        }
        if status_changed {
            self.events.push(PlayerEvent::StateChanged(self.state.status()));
        }
        if track_changed || status_changed {
            self.publish_now_playing();
        }
    }

    fn publish_now_playing(&mut self) {
        if self.now_playing.is_none() {
            return;
        }
        let snapshot = self.state.track().cloned().map(|track| {
            let rate = if self.state.is_playing() {
                self.effects.playback_rate
            } else {
                0.0
            };
            let mut now_playing =
                NowPlaying::new(&track, self.position(), self.clock.duration(), rate);
            now_playing.artwork = self
                .artwork
                .as_ref()
                .and_then(|resolver| resolver.artwork_for(&track.locator));
            now_playing
        });

        self.last_now_playing = Some(Instant::now());
        if let Some(sink) = self.now_playing.as_mut() {
            match &snapshot {
                Some(now_playing) => sink.update(now_playing),
                None => sink.clear(),
            }
        }
    }

    fn seek_target(&self, time: f64) -> f64 {
        let duration = self.clock.duration();
        let margin = self.config.seek_end_margin_secs.max(0.0);
        let time = if time.is_finite() { time.max(0.0) } else { 0.0 };
        if duration <= margin {
            0.0
        } else {
            time.min(duration - margin)
        }
    }

    fn live_elapsed(&self) -> Option<f64> {
        if self.state.is_rendering() {
            self.worker.clock().elapsed_for(self.session)
        } else {
            None
        }
    }

    fn capture_position(&mut self) -> f64 {
        let elapsed = self.live_elapsed();
        self.clock.capture(elapsed)
    }

    fn tap_request(&mut self) -> Option<TapRequest> {
        self.visualization_enabled.then(|| TapRequest {
            block_size: self.block_size,
            publisher: self.feed.reconnect(),
        })
    }

    fn mint(&mut self) -> SessionToken {
        self.session = self.sessions.mint();
        self.session
    }

    fn submit(&mut self, request: EngineRequest) -> Result<(), PlayerError> {
        self.worker.submit(request).map_err(|err| {
            log::error!("engine request dropped: {err}");
            PlayerError::from(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use spindle_decode::InMemorySourceProvider;
    use spindle_transport::{AudioArc, SourceLocator, TrackId};

    const RATE: u32 = 1000;

    struct Rig {
        player: PlaybackController,
        output: OfflineHandle,
    }

    impl Rig {
        fn render_secs(&self, seconds: f64) -> Vec<f32> {
            self.output.render((seconds * RATE as f64).round() as usize)
        }

        fn sync(&mut self) -> Vec<PlayerEvent> {
            self.player.sync().unwrap()
        }
    }

    /// Mono ramp, so every frame's value identifies its index.
    fn ramp(seconds: u32) -> AudioArc {
        let frames = (seconds * RATE) as usize;
        AudioArc::new(
            (0..frames).map(|i| i as f32 / frames as f32).collect(),
            RATE,
            1,
        )
    }

    fn track(id: u64) -> Track {
        Track::new(TrackId(id), format!("Track {id}"), format!("t{id}.wav"))
    }

    fn config() -> PlayerConfig {
        PlayerConfig {
            settle_delay_ms: 0,
            spectrum_block_size: 128,
            ..Default::default()
        }
    }

    fn rig_with(config: PlayerConfig) -> Rig {
        let sources = Arc::new(InMemorySourceProvider::new());
        sources.insert("t1.wav", ramp(180));
        sources.insert("t2.wav", ramp(100));
        sources.insert("t3.wav", ramp(2));
        sources.insert("t4.wav", ramp(2));
        let format = OutputFormat {
            sample_rate: RATE,
            channels: 2,
        };
        let (player, output) = PlaybackController::offline(config, sources, format).unwrap();
        Rig { player, output }
    }

    fn rig() -> Rig {
        rig_with(config())
    }

    fn ended(events: &[PlayerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, PlayerEvent::PlaybackEnded))
            .count()
    }

    fn assert_near(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_play_reaches_playing_with_duration() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        assert_eq!(rig.player.status(), TransportStatus::Loading);

        let events = rig.sync();
        assert_eq!(rig.player.status(), TransportStatus::Playing);
        assert_eq!(rig.player.duration(), 180.0);
        assert!(matches!(
            events.first(),
            Some(PlayerEvent::TrackChanged(Some(t))) if t.id == TrackId(1)
        ));
        assert!(
            events
                .iter()
                .any(|e| matches!(e, PlayerEvent::DurationKnown(d) if *d == 180.0))
        );
    }

    #[test]
    fn test_stale_completion_is_a_noop() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();
        let first = rig.player.session();

        rig.player.play(track(2)).unwrap();
        let second = rig.player.session();
        rig.sync();
        rig.player.seek(10.0).unwrap();
        rig.sync();

        rig.player.on_segment_finished(first).unwrap();
        rig.player.on_segment_finished(second).unwrap();
        let events = rig.player.poll();

        assert!(events.is_empty());
        assert_eq!(rig.player.status(), TransportStatus::Playing);
        assert_eq!(rig.player.current_track().map(|t| t.id), Some(TrackId(2)));
        assert_eq!(rig.player.queue().history().len(), 1);
    }

    #[test]
    fn test_playback_to_completion_ends_once() {
        let mut rig = rig();
        rig.player.play(track(3)).unwrap();
        rig.sync();

        rig.render_secs(2.5);
        let events = rig.sync();
        assert_eq!(rig.player.status(), TransportStatus::Stopped);
        assert_eq!(ended(&events), 1);
        assert!(rig.player.current_track().is_none());
        assert_eq!(rig.player.position(), 0.0);

        rig.render_secs(1.0);
        assert_eq!(ended(&rig.sync()), 0);
    }

    #[test]
    fn test_completion_advances_to_queued_track() {
        let mut rig = rig();
        rig.player.play(track(3)).unwrap();
        rig.player.enqueue_last(track(4)).unwrap();
        rig.sync();
        assert_eq!(rig.player.current_track().map(|t| t.id), Some(TrackId(3)));

        rig.render_secs(2.5);
        rig.sync();
        rig.sync();
        assert_eq!(rig.player.status(), TransportStatus::Playing);
        assert_eq!(rig.player.current_track().map(|t| t.id), Some(TrackId(4)));
        assert_eq!(rig.player.queue().history(), &[track(3)]);
    }

    #[test]
    fn test_position_is_monotonic_while_playing() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();

        let mut last = 0.0;
        for _ in 0..20 {
            rig.render_secs(0.25);
            let position = rig.player.position();
            assert!(position >= last);
            assert!(position <= 180.0);
            last = position;
        }
        assert_near(last, 5.0);
    }

    #[test]
    fn test_interruption_freezes_and_resumes_at_position() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.render_secs(42.0);
        assert_near(rig.player.position(), 42.0);

        rig.player
            .handle_system_event(SystemEvent::InterruptionBegan)
            .unwrap();
        assert_eq!(rig.player.status(), TransportStatus::Interrupted);
        rig.sync();
        let silent = rig.render_secs(1.0);
        assert!(silent.iter().all(|s| *s == 0.0));
        assert_near(rig.player.position(), 42.0);

        rig.player
            .handle_system_event(SystemEvent::InterruptionEnded {
                should_resume: true,
            })
            .unwrap();
        rig.player.poll();
        assert_eq!(rig.player.status(), TransportStatus::Playing);
        rig.sync();

        let out = rig.render_secs(1.0);
        assert!((out[0] - 42000.0 / 180000.0).abs() < 1e-6);
        assert_near(rig.player.position(), 43.0);
    }

    #[test]
    fn test_interruption_resume_waits_for_settle_delay() {
        let mut rig = rig_with(PlayerConfig {
            settle_delay_ms: 200,
            ..config()
        });
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.render_secs(42.0);

        rig.player
            .handle_system_event(SystemEvent::InterruptionBegan)
            .unwrap();
        rig.player
            .handle_system_event(SystemEvent::InterruptionEnded {
                should_resume: true,
            })
            .unwrap();
        rig.player.poll();
        assert_eq!(rig.player.status(), TransportStatus::Interrupted);
        rig.sync();
        assert!(rig.render_secs(0.5).iter().all(|s| *s == 0.0));

        thread::sleep(Duration::from_millis(250));
        rig.player.poll();
        assert_eq!(rig.player.status(), TransportStatus::Playing);
        rig.sync();

        let out = rig.render_secs(1.0);
        assert!((out[0] - 42000.0 / 180000.0).abs() < 1e-6);
        assert_near(rig.player.position(), 43.0);
    }

    #[test]
    fn test_interruption_without_resume_lands_paused() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.render_secs(3.0);

        rig.player
            .handle_system_event(SystemEvent::InterruptionBegan)
            .unwrap();
        rig.player
            .handle_system_event(SystemEvent::InterruptionEnded {
                should_resume: false,
            })
            .unwrap();
        rig.player.poll();
        assert_eq!(
            rig.player.state(),
            &TransportState::Paused {
                track: track(1),
                position: 3.0
            }
        );
    }

    #[test]
    fn test_seek_near_end_clamps_to_margin() {
        let mut rig = rig();
        rig.player.play(track(2)).unwrap();
        rig.sync();

        rig.player.seek(99.8).unwrap();
        assert_eq!(rig.player.status(), TransportStatus::Seeking);
        assert_near(rig.player.position(), 99.5);
        rig.sync();
        assert_eq!(rig.player.status(), TransportStatus::Playing);
        assert_near(rig.player.position(), 99.5);

        rig.render_secs(0.6);
        let events = rig.sync();
        assert_eq!(ended(&events), 1);
        assert_eq!(rig.player.status(), TransportStatus::Stopped);
    }

    #[test]
    fn test_seek_preserves_pause() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.player.pause().unwrap();
        rig.player.seek(60.0).unwrap();
        rig.sync();

        assert_eq!(
            rig.player.state(),
            &TransportState::Paused {
                track: track(1),
                position: 60.0
            }
        );
        assert!(rig.render_secs(0.5).iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_seek_while_idle_is_ignored() {
        let mut rig = rig();
        let session = rig.player.session();
        rig.player.seek(10.0).unwrap();
        assert_eq!(rig.player.status(), TransportStatus::Idle);
        assert_eq!(rig.player.session(), session);
    }

    #[test]
    fn test_pause_is_idempotent() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.render_secs(5.0);

        rig.player.pause().unwrap();
        let state = rig.player.state().clone();
        let session = rig.player.session();
        let position = rig.player.position();

        rig.player.pause().unwrap();
        rig.sync();
        rig.render_secs(1.0);
        assert_eq!(rig.player.state(), &state);
        assert_eq!(rig.player.session(), session);
        assert_eq!(rig.player.position(), position);
        assert_near(position, 5.0);
    }

    #[test]
    fn test_effects_do_not_touch_session() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();
        let session = rig.player.session();

        rig.player.set_reverb_mix(40.0).unwrap();
        rig.player.set_playback_rate(1.5).unwrap();
        rig.sync();
        assert_eq!(rig.player.session(), session);
        assert_eq!(rig.player.status(), TransportStatus::Playing);
        assert_eq!(rig.player.effects(), EffectParams::new(40.0, 1.5));

        rig.render_secs(1.0);
        assert_near(rig.player.position(), 1.5);
    }

    #[test]
    fn test_missing_source_returns_to_idle() {
        let mut rig = rig();
        rig.player.play(track(9)).unwrap();
        let events = rig.sync();
        assert_eq!(rig.player.status(), TransportStatus::Idle);
        assert!(events.iter().any(|e| matches!(
            e,
            PlayerEvent::Error(PlayerError::SourceUnavailable { locator, .. })
                if locator == "t9.wav"
        )));
    }

    #[test]
    fn test_audio_session_failure_is_synchronous() {
        struct Busy;
        impl AudioSession for Busy {
            fn activate(&mut self) -> Result<(), PlayerError> {
                Err(PlayerError::EngineStartFailed("session busy".into()))
            }
        }

        let mut rig = rig();
        rig.player.set_audio_session(Busy);
        assert!(matches!(
            rig.player.play(track(1)),
            Err(PlayerError::EngineStartFailed(_))
        ));
        assert_eq!(rig.player.status(), TransportStatus::Idle);
        assert!(!rig.output.is_running());
    }

    #[test]
    fn test_device_removed_pauses_until_resume() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.render_secs(3.0);

        rig.player
            .handle_system_event(SystemEvent::RouteChanged(RouteChange::DeviceRemoved))
            .unwrap();
        rig.sync();
        assert_eq!(rig.player.status(), TransportStatus::Paused);
        assert_near(rig.player.position(), 3.0);
        assert!(!rig.output.is_connected());

        rig.player.resume().unwrap();
        rig.sync();
        assert!(rig.output.is_running());
        rig.render_secs(1.0);
        assert_near(rig.player.position(), 4.0);
    }

    #[test]
    fn test_device_added_fences_earlier_completions() {
        let mut rig = rig();
        rig.player.play(track(3)).unwrap();
        rig.sync();
        let before = rig.player.session();

        rig.player
            .handle_system_event(SystemEvent::RouteChanged(RouteChange::DeviceAdded))
            .unwrap();
        assert_eq!(rig.player.status(), TransportStatus::RouteChanging);
        assert_ne!(rig.player.session(), before);
        rig.sync();

        rig.player.on_segment_finished(before).unwrap();
        assert_eq!(rig.player.status(), TransportStatus::RouteChanging);

        rig.render_secs(2.5);
        let events = rig.sync();
        assert_eq!(ended(&events), 1);
        assert_eq!(rig.player.status(), TransportStatus::Stopped);
    }

    #[test]
    fn test_engine_reconfiguration_resumes_after_settle() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.render_secs(10.0);

        rig.player
            .handle_system_event(SystemEvent::EngineConfigurationChanged)
            .unwrap();
        assert_eq!(rig.player.status(), TransportStatus::Interrupted);
        rig.player.poll();
        assert_eq!(rig.player.status(), TransportStatus::Playing);
        rig.sync();

        rig.render_secs(1.0);
        assert_near(rig.player.position(), 11.0);
    }

    #[test]
    fn test_engine_reconfiguration_waits_for_settle_delay() {
        let mut rig = rig_with(PlayerConfig {
            settle_delay_ms: 200,
            ..config()
        });
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.render_secs(10.0);

        rig.player
            .handle_system_event(SystemEvent::EngineConfigurationChanged)
            .unwrap();
        rig.player.poll();
        assert_eq!(rig.player.status(), TransportStatus::Interrupted);
        assert_near(rig.player.position(), 10.0);

        thread::sleep(Duration::from_millis(250));
        rig.player.poll();
        assert_eq!(rig.player.status(), TransportStatus::Playing);
        rig.sync();

        let out = rig.render_secs(1.0);
        assert!((out[0] - 10000.0 / 180000.0).abs() < 1e-6);
        assert_near(rig.player.position(), 11.0);
    }

    #[test]
    fn test_loop_single_replays_current_track() {
        let mut rig = rig();
        rig.player.set_loop_single(true);
        rig.player.play(track(3)).unwrap();
        rig.sync();

        rig.render_secs(2.5);
        let events = rig.sync();
        rig.sync();
        assert_eq!(ended(&events), 0);
        assert_eq!(rig.player.status(), TransportStatus::Playing);
        assert_eq!(rig.player.current_track().map(|t| t.id), Some(TrackId(3)));
        assert_eq!(rig.player.position(), 0.0);
    }

    #[test]
    fn test_previous_without_history_restarts() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.render_secs(5.0);

        rig.player.previous().unwrap();
        assert_eq!(rig.player.status(), TransportStatus::Seeking);
        rig.sync();
        assert_eq!(rig.player.status(), TransportStatus::Playing);
        assert_eq!(rig.player.position(), 0.0);
    }

    #[test]
    fn test_playlist_navigation_wraps() {
        let mut rig = rig();
        rig.player
            .play_playlist(vec![track(1), track(2), track(3)], false)
            .unwrap();
        let current = |rig: &Rig| rig.player.current_track().map(|t| t.id.0);
        assert_eq!(current(&rig), Some(1));

        rig.player.next().unwrap();
        rig.player.next().unwrap();
        assert_eq!(current(&rig), Some(3));
        rig.player.next().unwrap();
        assert_eq!(current(&rig), Some(1));
        rig.player.previous().unwrap();
        assert_eq!(current(&rig), Some(3));

        rig.sync();
        assert_eq!(rig.player.status(), TransportStatus::Playing);
    }

    #[test]
    fn test_adhoc_order_and_history() {
        let mut rig = rig();
        rig.player.play(track(3)).unwrap();
        rig.player.enqueue_last(track(1)).unwrap();
        rig.player.enqueue_last(track(2)).unwrap();

        rig.player.next().unwrap();
        rig.player.next().unwrap();
        assert_eq!(rig.player.current_track().map(|t| t.id.0), Some(2));
        assert_eq!(rig.player.queue().history(), &[track(3), track(1)]);

        rig.player.previous().unwrap();
        assert_eq!(rig.player.current_track().map(|t| t.id.0), Some(1));
        let upcoming: Vec<u64> = rig.player.queue().upcoming().map(|t| t.id.0).collect();
        assert_eq!(upcoming, vec![2]);
    }

    #[test]
    fn test_enqueue_starts_playback_when_idle() {
        let mut rig = rig();
        rig.player.enqueue_last(track(1)).unwrap();
        assert_eq!(rig.player.status(), TransportStatus::Loading);
        rig.player.enqueue_next(track(2)).unwrap();
        assert_eq!(rig.player.current_track().map(|t| t.id.0), Some(1));
    }

    #[test]
    fn test_remote_commands() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();

        rig.player
            .handle_remote(RemoteCommand::TogglePlayPause)
            .unwrap();
        assert_eq!(rig.player.status(), TransportStatus::Paused);
        rig.player
            .handle_remote(RemoteCommand::TogglePlayPause)
            .unwrap();
        assert_eq!(rig.player.status(), TransportStatus::Playing);

        rig.player
            .handle_remote(RemoteCommand::SkipForward(15.0))
            .unwrap();
        assert_near(rig.player.position(), 15.0);
        rig.player
            .handle_remote(RemoteCommand::SkipBackward(5.0))
            .unwrap();
        assert_near(rig.player.position(), 10.0);
        rig.player.handle_remote(RemoteCommand::SeekTo(30.0)).unwrap();
        rig.sync();
        assert_eq!(rig.player.status(), TransportStatus::Playing);
        assert_near(rig.player.position(), 30.0);

        rig.player.handle_remote(RemoteCommand::Stop).unwrap();
        assert_eq!(rig.player.status(), TransportStatus::Stopped);
    }

    #[test]
    fn test_visualization_updates_while_playing() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.render_secs(1.0);

        let frame = rig.player.visualization();
        assert_eq!(rig.player.visualization_passes(), 7);
        assert!(frame.buckets.iter().all(|b| (0.0..=1.0).contains(b)));
    }

    #[test]
    fn test_visualization_toggles_mid_track() {
        let mut rig = rig();
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.render_secs(1.0);
        assert_eq!(rig.player.visualization_passes(), 7);

        rig.player.set_visualization_enabled(false).unwrap();
        rig.sync();
        rig.render_secs(1.0);
        assert_eq!(rig.player.visualization_passes(), 7);
        assert_eq!(rig.player.visualization(), SpectrumFrame::default());
        assert_eq!(rig.player.status(), TransportStatus::Playing);

        rig.player.set_visualization_enabled(true).unwrap();
        rig.sync();
        rig.render_secs(1.0);
        assert_eq!(rig.player.visualization_passes(), 14);
        assert!(rig.player.visualization().aggregate > 0.0);
    }

    #[test]
    fn test_disabled_visualization_loads_without_tap() {
        let mut rig = rig();
        rig.player.set_visualization_enabled(false).unwrap();
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.render_secs(1.0);
        assert!(!rig.player.visualization_enabled());
        assert_eq!(rig.player.visualization_passes(), 0);
    }

    #[test]
    fn test_snapshot_reports_live_state() {
        let mut rig = rig();
        rig.player.set_loop_single(true);
        rig.player.play(track(1)).unwrap();
        rig.sync();
        rig.render_secs(5.0);

        let snapshot = rig.player.snapshot();
        assert_eq!(snapshot.track.map(|t| t.id), Some(TrackId(1)));
        assert_eq!(snapshot.status, TransportStatus::Playing);
        assert_near(snapshot.position, 5.0);
        assert_near(snapshot.duration, 180.0);
        assert!(snapshot.loop_single);
        assert_eq!(snapshot.session, rig.player.session());
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Option<NowPlaying>>>>);

    impl NowPlayingSink for Recorder {
        fn update(&mut self, now_playing: &NowPlaying) {
            self.0.lock().unwrap().push(Some(now_playing.clone()));
        }

        fn clear(&mut self) {
            self.0.lock().unwrap().push(None);
        }
    }

    struct Artwork;

    impl ArtworkResolver for Artwork {
        fn artwork_for(&self, locator: &SourceLocator) -> Option<String> {
            Some(format!("thumbs/{locator}.jpg"))
        }
    }

    #[test]
    fn test_now_playing_snapshots() {
        let mut rig = rig();
        let recorder = Recorder::default();
        rig.player
            .set_now_playing(recorder.clone(), Some(Box::new(Artwork)));

        rig.player.play(track(1).with_group("Live")).unwrap();
        rig.sync();
        let last = recorder.0.lock().unwrap().last().cloned().flatten().unwrap();
        assert_eq!(last.title, "Track 1");
        assert_eq!(last.group_label.as_deref(), Some("Live"));
        assert_eq!(last.duration, 180.0);
        assert_eq!(last.rate, 1.0);
        assert_eq!(last.artwork.as_deref(), Some("thumbs/t1.wav.jpg"));

        rig.player.stop().unwrap();
        assert_eq!(recorder.0.lock().unwrap().last(), Some(&None));
    }
}
