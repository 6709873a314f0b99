use spindle_engine::EngineError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum PlayerError {
    #[error("cannot open '{locator}': {reason}")]
    SourceUnavailable { locator: String, reason: String },

    #[error("audio engine failed to start: {0}")]
    EngineStartFailed(String),

    #[error("nothing to resume")]
    NoCurrentTrack,

    #[error("engine worker is unavailable")]
    WorkerUnavailable,
}

impl From<EngineError> for PlayerError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::SourceUnavailable { locator, reason } => {
                Self::SourceUnavailable { locator, reason }
            }
            EngineError::WorkerGone => Self::WorkerUnavailable,
            other => Self::EngineStartFailed(other.to_string()),
        }
    }
}
