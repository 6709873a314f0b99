use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use spindle_spectrum::DEFAULT_BLOCK_SIZE;
use spindle_transport::EffectParams;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config not serializable: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("no user config directory on this platform")]
    NoConfigDir,
}

/// Player settings, persisted as TOML. Missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Wait after a recoverable system event before resuming on our own.
    pub settle_delay_ms: u64,
    /// Seeks land no closer than this to the end of the track.
    pub seek_end_margin_secs: f64,
    pub spectrum_block_size: usize,
    /// Minimum spacing of position-only now-playing updates.
    pub now_playing_interval_ms: u64,
    pub loop_single: bool,
    pub reverb_mix: f32,
    pub playback_rate: f32,
    /// Relative locators are resolved against this directory.
    pub library_root: Option<PathBuf>,
    pub worker_queue_capacity: usize,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 500,
            seek_end_margin_secs: 0.5,
            spectrum_block_size: DEFAULT_BLOCK_SIZE,
            now_playing_interval_ms: 1000,
            loop_single: false,
            reverb_mix: 0.0,
            playback_rate: 1.0,
            library_root: None,
            worker_queue_capacity: 64,
        }
    }
}

impl PlayerConfig {
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("spindle").join("config.toml"))
    }

    /// Load from the user config directory, falling back to defaults.
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        match fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml_str(&contents).unwrap_or_else(|err| {
                log::warn!("ignoring {}: {err}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::from_toml_str(&contents)?)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write to the user config directory. Returns the path written.
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::config_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml_string()?;
        let write_error = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        fs::write(path, contents).map_err(write_error)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn now_playing_interval(&self) -> Duration {
        Duration::from_millis(self.now_playing_interval_ms)
    }

    /// Effect parameters, clamped to their valid ranges.
    pub fn effects(&self) -> EffectParams {
        EffectParams::new(self.reverb_mix, self.playback_rate)
    }
}
