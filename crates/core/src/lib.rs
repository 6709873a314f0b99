//! Player core: the controller that owns transport state and sessions, the
//! play queue, the position clock and the interfaces to the platform.

mod clock;
mod config;
mod controller;
mod error;
mod now_playing;
pub mod queue;
mod remote;
mod state;
mod system;

pub use clock::PositionClock;
pub use config::{ConfigError, PlayerConfig};
pub use controller::{PlaybackController, PlayerEvent, PlayerSnapshot};
pub use error::PlayerError;
pub use now_playing::{ArtworkResolver, NowPlaying, NowPlayingSink};
pub use queue::{QueueContext, QueueMode};
pub use remote::RemoteCommand;
pub use state::{TransportState, TransportStatus};
pub use system::{AudioSession, NoopAudioSession, RouteChange, SystemEvent};

pub use spindle_engine::OfflineHandle;
pub use spindle_spectrum::SpectrumFrame;
pub use spindle_transport::{
    EffectParams, OutputFormat, SessionToken, SourceLocator, Track, TrackId,
};
