use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use spindle_decode::SourceProvider;
use spindle_spectrum::{SpectrumPublisher, SpectrumTap};
use spindle_transport::{EffectParams, SessionToken, SourceFormat, SourceLocator};

use crate::config::WORKER_POLL_INTERVAL;
use crate::{AudioOutput, EngineError, PlaybackGraph, RenderClock};

/// Spectrum tap to install alongside a load.
pub struct TapRequest {
    pub block_size: usize,
    pub publisher: SpectrumPublisher,
}

/// Work for the engine worker. Executed strictly in submission order.
pub enum EngineRequest {
    /// Open `locator`, wire the graph, schedule from native frame
    /// `start_frame` and start the output. Paused after scheduling unless
    /// `autoplay`. Acked with [`EngineEvent::Loaded`].
    Load {
        session: SessionToken,
        locator: SourceLocator,
        start_frame: u64,
        autoplay: bool,
        tap: Option<TapRequest>,
    },
    /// Reschedule the loaded source from `start_frame`. Acked with
    /// [`EngineEvent::Scheduled`].
    Seek {
        session: SessionToken,
        start_frame: u64,
        resume: bool,
    },
    Pause,
    /// Re-stamp the scheduled segment without touching playback.
    Retag {
        session: SessionToken,
    },
    /// Stop the output and tear down the wiring, keeping the source.
    Halt,
    /// Clear everything: schedule, tap, wiring and source.
    Stop,
    SetEffects(EffectParams),
    InstallTap(TapRequest),
    RemoveTap,
    /// Replied to once every earlier request has run and every segment the
    /// render thread finished before now has been reported.
    Barrier(Sender<()>),
    Shutdown,
}

/// Completions reported by the worker, each tagged with the session it
/// was issued under.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Loaded {
        session: SessionToken,
        format: SourceFormat,
    },
    Scheduled {
        session: SessionToken,
    },
    SegmentFinished {
        session: SessionToken,
    },
    Failed {
        session: SessionToken,
        error: EngineError,
    },
}

impl EngineEvent {
    pub fn session(&self) -> SessionToken {
        match self {
            Self::Loaded { session, .. }
            | Self::Scheduled { session }
            | Self::SegmentFinished { session }
            | Self::Failed { session, .. } => *session,
        }
    }
}

/// Serial executor for everything that touches the playback graph.
///
/// One dedicated thread owns the [`PlaybackGraph`] and the output. Callers
/// submit requests and move on; completions come back on [`events`](Self::events).
pub struct EngineWorker {
    requests: Sender<EngineRequest>,
    events: Receiver<EngineEvent>,
    clock: Arc<RenderClock>,
    thread: Option<JoinHandle<()>>,
}

impl EngineWorker {
    /// Start the worker. `make_output` runs on the worker thread, so outputs
    /// that must stay on one thread (device streams) are fine.
    pub fn spawn<F>(
        make_output: F,
        sources: Arc<dyn SourceProvider>,
        capacity: usize,
    ) -> Result<Self, EngineError>
    where
        F: FnOnce() -> Result<Box<dyn AudioOutput>, EngineError> + Send + 'static,
    {
        let (request_tx, request_rx) = bounded(capacity.max(1));
        let (event_tx, event_rx) = unbounded();
        let (init_tx, init_rx) = bounded(1);
        let clock = Arc::new(RenderClock::new());
        let worker_clock = clock.clone();

        let thread = thread::Builder::new()
            .name("engine-worker".into())
            .spawn(move || {
                let output = match make_output() {
                    Ok(output) => {
                        let _ = init_tx.send(Ok(()));
                        output
                    }
                    Err(err) => {
                        let _ = init_tx.send(Err(err));
                        return;
                    }
                };
                let mut worker = Worker {
                    graph: PlaybackGraph::new(output, worker_clock),
                    sources,
                    events: event_tx,
                };
                worker.run(request_rx);
            })
            .map_err(|err| EngineError::StartFailed(format!("cannot spawn engine worker: {err}")))?;

        init_rx.recv().map_err(|_| EngineError::WorkerGone)??;
        log::debug!("engine worker started");

        Ok(Self {
            requests: request_tx,
            events: event_rx,
            clock,
            thread: Some(thread),
        })
    }

    pub fn submit(&self, request: EngineRequest) -> Result<(), EngineError> {
        self.requests
            .send(request)
            .map_err(|_| EngineError::WorkerGone)
    }

    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    pub fn clock(&self) -> &Arc<RenderClock> {
        &self.clock
    }

    /// Block until every request submitted so far has run.
    pub fn barrier(&self) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.submit(EngineRequest::Barrier(reply_tx))?;
        reply_rx.recv().map_err(|_| EngineError::WorkerGone)
    }

    fn stop_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            let _ = self.requests.send(EngineRequest::Shutdown);
            if thread.join().is_err() {
                log::error!("engine worker panicked");
            }
        }
    }
}

impl Drop for EngineWorker {
    fn drop(&mut self) {
        self.stop_thread();
    }
}

struct Worker {
    graph: PlaybackGraph,
    sources: Arc<dyn SourceProvider>,
    events: Sender<EngineEvent>,
}

impl Worker {
    fn run(&mut self, requests: Receiver<EngineRequest>) {
        loop {
            match requests.recv_timeout(WORKER_POLL_INTERVAL) {
                Ok(EngineRequest::Shutdown) => break,
                Ok(request) => {
                    self.forward_finished();
                    self.handle(request);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            self.forward_finished();
        }
        self.graph.stop();
        log::debug!("engine worker stopped");
    }

    fn handle(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::Load {
                session,
                locator,
                start_frame,
                autoplay,
                tap,
            } => match self.load(session, &locator, start_frame, autoplay, tap) {
                Ok(format) => {
                    log::debug!("{session}: loaded '{locator}' at frame {start_frame}");
                    self.emit(EngineEvent::Loaded { session, format });
                }
                Err(error) => {
                    log::error!("{session}: load of '{locator}' failed: {error}");
                    self.graph.stop();
                    self.emit(EngineEvent::Failed { session, error });
                }
            },
            EngineRequest::Seek {
                session,
                start_frame,
                resume,
            } => match self.seek(session, start_frame, resume) {
                Ok(()) => self.emit(EngineEvent::Scheduled { session }),
                Err(error) => {
                    log::error!("{session}: seek to frame {start_frame} failed: {error}");
                    self.emit(EngineEvent::Failed { session, error });
                }
            },
            EngineRequest::Pause => warn_on_failure("pause", self.graph.pause()),
            EngineRequest::Retag { session } => {
                let result = self.graph.retag(session);
                warn_on_failure("retag", result);
            }
            EngineRequest::Halt => self.graph.stop(),
            EngineRequest::Stop => {
                self.graph.stop();
                self.graph.unload_source();
            }
            EngineRequest::SetEffects(effects) => {
                let result = self.graph.set_effects(effects);
                warn_on_failure("effects", result);
            }
            EngineRequest::InstallTap(tap) => {
                let result = self.install_tap(tap);
                warn_on_failure("tap install", result);
            }
            EngineRequest::RemoveTap => {
                let result = self.graph.remove_tap();
                warn_on_failure("tap removal", result);
            }
            EngineRequest::Barrier(reply) => {
                self.forward_finished();
                let _ = reply.send(());
            }
            EngineRequest::Shutdown => {}
        }
    }

    fn load(
        &mut self,
        session: SessionToken,
        locator: &SourceLocator,
        start_frame: u64,
        autoplay: bool,
        tap: Option<TapRequest>,
    ) -> Result<SourceFormat, EngineError> {
        self.graph.clear_schedule()?;
        let handle = self
            .sources
            .open(locator)
            .map_err(|err| EngineError::SourceUnavailable {
                locator: locator.to_string(),
                reason: err.to_string(),
            })?;

        let format = self.graph.prepare_output()?;
        self.graph.configure(format)?;
        let native = self.graph.load_source(handle)?;
        if let Some(tap) = tap {
            self.install_tap(tap)?;
        }
        self.graph.schedule(start_frame, None, session)?;
        self.graph.start()?;
        if !autoplay {
            self.graph.pause()?;
        }
        Ok(native)
    }

    fn seek(
        &mut self,
        session: SessionToken,
        start_frame: u64,
        resume: bool,
    ) -> Result<(), EngineError> {
        if !self.graph.is_configured() {
            // Halted: the next load picks the offset up.
            return if resume {
                Err(EngineError::NotConfigured)
            } else {
                Ok(())
            };
        }
        self.graph.clear_schedule()?;
        self.graph.schedule(start_frame, None, session)?;
        if resume {
            self.graph.start()
        } else {
            self.graph.pause()
        }
    }

    fn install_tap(&mut self, tap: TapRequest) -> Result<(), EngineError> {
        let tap = SpectrumTap::new(tap.block_size, tap.publisher)?;
        self.graph.install_tap(tap)
    }

    fn forward_finished(&mut self) {
        for session in self.graph.drain_finished() {
            self.emit(EngineEvent::SegmentFinished { session });
        }
    }

    fn emit(&self, event: EngineEvent) {
        // The controller may already be gone during shutdown.
        let _ = self.events.send(event);
    }
}

fn warn_on_failure(what: &str, result: Result<(), EngineError>) {
    if let Err(err) = result {
        log::warn!("{what} failed: {err}");
    }
}
