//! Source provider: turns a track's locator into decoded, seekable audio.

mod memory;

use std::fs::File;
use std::path::{Path, PathBuf};

use spindle_transport::{AudioArc, SourceFormat, SourceLocator};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

pub use memory::InMemorySourceProvider;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("source not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unsupported audio in '{locator}': {reason}")]
    Unsupported { locator: String, reason: String },

    #[error("'{0}' contains no audio frames")]
    Empty(String),
}

/// An opened source: the decoded audio plus the locator it came from.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    pub locator: SourceLocator,
    pub audio: AudioArc,
}

impl SourceHandle {
    pub fn format(&self) -> SourceFormat {
        self.audio.format()
    }
}

/// Resolves locators into openable audio. Called from the engine worker.
pub trait SourceProvider: Send + Sync {
    fn open(&self, locator: &SourceLocator) -> Result<SourceHandle, SourceError>;
}

/// Decodes files from disk, resolving relative locators against an optional
/// library root.
#[derive(Debug, Clone, Default)]
pub struct FileSourceProvider {
    root: Option<PathBuf>,
}

impl FileSourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// Accepts absolute paths, paths relative to the working directory, and
    /// paths relative to the library root.
    pub fn resolve(&self, locator: &SourceLocator) -> Option<PathBuf> {
        let path = locator.to_path();
        if path.exists() {
            return Some(path);
        }

        let root = self.root.as_ref()?;
        let with_root = root.join(&path);
        with_root.exists().then_some(with_root)
    }
}

impl SourceProvider for FileSourceProvider {
    fn open(&self, locator: &SourceLocator) -> Result<SourceHandle, SourceError> {
        let path = self
            .resolve(locator)
            .ok_or_else(|| SourceError::NotFound(locator.to_path()))?;
        log::debug!("decoding {}", path.display());

        let audio = decode_file(&path)?;
        Ok(SourceHandle {
            locator: locator.clone(),
            audio,
        })
    }
}

/// Decode a whole file into interleaved `f32` samples.
pub fn decode_file(path: &Path) -> Result<AudioArc, SourceError> {
    let unsupported = |reason: String| SourceError::Unsupported {
        locator: path.display().to_string(),
        reason,
    };

    let file = File::open(path).map_err(|source| SourceError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| unsupported(e.to_string()))?;

    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| unsupported("no default track".to_string()))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| unsupported("unknown sample rate".to_string()))?;
    let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0) as u16;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| unsupported(e.to_string()))?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(unsupported(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                log::warn!("skipping corrupt packet in {}: {reason}", path.display());
                continue;
            }
            Err(e) => return Err(unsupported(e.to_string())),
        };
        let spec = *decoded.spec();
        if channels == 0 {
            channels = spec.channels.count() as u16;
        }

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    if samples.is_empty() || channels == 0 {
        return Err(SourceError::Empty(path.display().to_string()));
    }

    Ok(AudioArc::new(samples, sample_rate, channels))
}
