use spindle_spectrum::SpectrumError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("cannot open '{locator}': {reason}")]
    SourceUnavailable { locator: String, reason: String },

    #[error("audio engine failed to start: {0}")]
    StartFailed(String),

    #[error("no source loaded")]
    NoSource,

    #[error("processing graph is not wired")]
    NotConfigured,

    #[error("render command queue is full")]
    QueueFull,

    #[error("failed to prepare source: {0}")]
    Prepare(String),

    #[error("spectrum tap rejected: {0}")]
    Tap(#[from] SpectrumError),

    #[error("engine worker is not running")]
    WorkerGone,
}
