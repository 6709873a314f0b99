use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackId(pub u64);

/// Where a track's audio lives: a filesystem path or a `file://` URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocator(String);

impl SourceLocator {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Filesystem path of this locator, with any `file://` scheme stripped.
    pub fn to_path(&self) -> PathBuf {
        let raw = self.0.strip_prefix("file://").unwrap_or(&self.0);
        PathBuf::from(raw)
    }
}

impl From<&Path> for SourceLocator {
    fn from(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }
}

impl From<String> for SourceLocator {
    fn from(locator: String) -> Self {
        Self(locator)
    }
}

impl From<&str> for SourceLocator {
    fn from(locator: &str) -> Self {
        Self(locator.to_string())
    }
}

impl std::fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A playable item. Immutable once built; two tracks are equal when their ids are.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub locator: SourceLocator,
    /// Optional grouping label (album, playlist folder, ...).
    pub group: Option<String>,
}

impl Track {
    pub fn new(id: TrackId, name: impl Into<String>, locator: impl Into<SourceLocator>) -> Self {
        Self {
            id,
            name: name.into(),
            locator: locator.into(),
            group: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Track {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_equality_is_by_id() {
        let a = Track::new(TrackId(7), "Intro", "music/intro.flac");
        let b = Track::new(TrackId(7), "Intro (remaster)", "music/other.flac").with_group("Live");
        let c = Track::new(TrackId(8), "Intro", "music/intro.flac");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_locator_strips_file_scheme() {
        let locator = SourceLocator::new("file:///tmp/song.wav");
        assert_eq!(locator.to_path(), PathBuf::from("/tmp/song.wav"));
        assert_eq!(SourceLocator::new("a/b.mp3").to_path(), PathBuf::from("a/b.mp3"));
    }
}
