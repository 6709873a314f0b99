use spindle_transport::{SourceLocator, Track};

/// Snapshot pushed to the system's now-playing surface.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub title: String,
    pub group_label: Option<String>,
    pub elapsed: f64,
    pub duration: f64,
    /// 0.0 while not playing.
    pub rate: f32,
    pub artwork: Option<String>,
}

impl NowPlaying {
    pub fn new(track: &Track, elapsed: f64, duration: f64, rate: f32) -> Self {
        Self {
            title: track.name.clone(),
            group_label: track.group.clone(),
            elapsed,
            duration,
            rate,
            artwork: None,
        }
    }
}

pub trait NowPlayingSink: Send {
    fn update(&mut self, now_playing: &NowPlaying);

    fn clear(&mut self);
}

/// Looks up artwork for a track, keyed by its locator.
pub trait ArtworkResolver: Send {
    fn artwork_for(&self, locator: &SourceLocator) -> Option<String>;
}
