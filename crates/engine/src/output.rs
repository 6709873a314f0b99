use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use spindle_transport::OutputFormat;

use crate::{EngineError, RenderGraph};

/// A sink that drives a [`RenderGraph`] from its own clock.
///
/// Implementations are created and used on the engine worker thread only.
pub trait AudioOutput {
    /// Resolve the current device and report the format the next
    /// [`connect`](Self::connect) will render at.
    fn prepare(&mut self) -> Result<OutputFormat, EngineError>;

    /// Take ownership of a freshly built graph, replacing any previous one.
    fn connect(&mut self, graph: RenderGraph) -> Result<(), EngineError>;

    fn start(&mut self) -> Result<(), EngineError>;

    /// Stop rendering and release the connected graph.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

#[derive(Default)]
struct OfflineState {
    graph: Option<RenderGraph>,
    running: bool,
    refuse_start: bool,
}

/// Output without a device: frames are pulled on demand through an
/// [`OfflineHandle`]. Used for rendering to files and for tests.
pub struct OfflineOutput {
    format: OutputFormat,
    state: Arc<Mutex<OfflineState>>,
}

/// Pulls rendered audio out of an [`OfflineOutput`] from any thread.
#[derive(Clone)]
pub struct OfflineHandle {
    format: OutputFormat,
    state: Arc<Mutex<OfflineState>>,
}

impl OfflineOutput {
    pub fn new(format: OutputFormat) -> (Self, OfflineHandle) {
        let state = Arc::new(Mutex::new(OfflineState::default()));
        (
            Self {
                format,
                state: state.clone(),
            },
            OfflineHandle { format, state },
        )
    }
}

fn lock(state: &Mutex<OfflineState>) -> MutexGuard<'_, OfflineState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl AudioOutput for OfflineOutput {
    fn prepare(&mut self) -> Result<OutputFormat, EngineError> {
        Ok(self.format)
    }

    fn connect(&mut self, graph: RenderGraph) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        state.graph = Some(graph);
        state.running = false;
        Ok(())
    }

    fn start(&mut self) -> Result<(), EngineError> {
        let mut state = lock(&self.state);
        if state.refuse_start {
            return Err(EngineError::StartFailed("output refused to start".into()));
        }
        if state.graph.is_none() {
            return Err(EngineError::NotConfigured);
        }
        state.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = lock(&self.state);
        state.running = false;
        state.graph = None;
    }

    fn is_running(&self) -> bool {
        lock(&self.state).running
    }
}

impl OfflineHandle {
    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Render `frames` interleaved frames. A stopped output yields silence.
    pub fn render(&self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * self.format.channels as usize];
        self.render_into(&mut out);
        out
    }

    pub fn render_into(&self, out: &mut [f32]) {
        let mut state = lock(&self.state);
        let running = state.running;
        match state.graph.as_mut() {
            Some(graph) if running => graph.process(out),
            _ => out.fill(0.0),
        }
    }

    /// Make the next `start` fail, as a device that cannot be opened would.
    pub fn refuse_start(&self, refuse: bool) {
        lock(&self.state).refuse_start = refuse;
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).graph.is_some()
    }
}
