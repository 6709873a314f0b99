use crate::PlayerError;

/// Why the output route changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteChange {
    /// The device we were playing through went away (headphones unplugged).
    DeviceRemoved,
    DeviceAdded,
    CategoryChanged,
}

/// Signals from the platform audio session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    InterruptionBegan,
    InterruptionEnded { should_resume: bool },
    RouteChanged(RouteChange),
    /// The engine was reconfigured underneath us (sample rate, channel count).
    EngineConfigurationChanged,
}

/// Platform audio session. Activated before any play or resume.
pub trait AudioSession: Send {
    fn activate(&mut self) -> Result<(), PlayerError>;
}

/// Session for platforms without one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAudioSession;

impl AudioSession for NoopAudioSession {
    fn activate(&mut self) -> Result<(), PlayerError> {
        Ok(())
    }
}
