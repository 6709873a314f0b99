use spindle_transport::Track;

/// Transport state. Each variant carries exactly what it needs, so a paused
/// player without a track cannot be expressed.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportState {
    Idle,
    /// Waiting for the engine to acknowledge the load.
    Loading { track: Track },
    Playing { track: Track },
    Paused { track: Track, position: f64 },
    /// A seek is in flight; `resume_playing` is the state to return to.
    Seeking { track: Track, resume_playing: bool },
    /// A system interruption holds the output.
    Interrupted {
        track: Track,
        position: f64,
        was_playing: bool,
    },
    /// The output route changed under a live segment.
    RouteChanging { track: Track, playing: bool },
    Stopped,
}

/// Discriminant of [`TransportState`] for publishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportStatus {
    Idle,
    Loading,
    Playing,
    Paused,
    Seeking,
    Interrupted,
    RouteChanging,
    Stopped,
}

impl TransportState {
    pub fn status(&self) -> TransportStatus {
        match self {
            Self::Idle => TransportStatus::Idle,
            Self::Loading { .. } => TransportStatus::Loading,
            Self::Playing { .. } => TransportStatus::Playing,
            Self::Paused { .. } => TransportStatus::Paused,
            Self::Seeking { .. } => TransportStatus::Seeking,
            Self::Interrupted { .. } => TransportStatus::Interrupted,
            Self::RouteChanging { .. } => TransportStatus::RouteChanging,
            Self::Stopped => TransportStatus::Stopped,
        }
    }

    pub fn track(&self) -> Option<&Track> {
        match self {
            Self::Idle | Self::Stopped => None,
            Self::Loading { track }
            | Self::Playing { track }
            | Self::Paused { track, .. }
            | Self::Seeking { track, .. }
            | Self::Interrupted { track, .. }
            | Self::RouteChanging { track, .. } => Some(track),
        }
    }

    /// Whether audio is (or is about to be) coming out.
    pub fn is_playing(&self) -> bool {
        matches!(
            self,
            Self::Loading { .. }
                | Self::Playing { .. }
                | Self::Seeking {
                    resume_playing: true,
                    ..
                }
                | Self::RouteChanging { playing: true, .. }
        )
    }

    /// Whether the render clock is advancing for the current session.
    pub(crate) fn is_rendering(&self) -> bool {
        matches!(
            self,
            Self::Playing { .. } | Self::RouteChanging { playing: true, .. }
        )
    }
}

impl TransportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Seeking => "seeking",
            Self::Interrupted => "interrupted",
            Self::RouteChanging => "route-changing",
            Self::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_transport::TrackId;

    #[test]
    fn test_playing_covers_transient_states() {
        let track = Track::new(TrackId(1), "a", "a.wav");
        assert!(
            TransportState::Seeking {
                track: track.clone(),
                resume_playing: true
            }
            .is_playing()
        );
        assert!(
            !TransportState::Paused {
                track: track.clone(),
                position: 3.0
            }
            .is_playing()
        );
        assert!(!TransportState::Stopped.is_playing());
        assert_eq!(
            TransportState::Interrupted {
                track,
                position: 1.0,
                was_playing: true
            }
            .status(),
            TransportStatus::Interrupted
        );
    }
}
