use std::collections::HashMap;
use std::sync::RwLock;

use spindle_transport::{AudioArc, SourceLocator};

use crate::{SourceError, SourceHandle, SourceProvider};

/// Provider backed by already-decoded audio keyed by locator.
///
/// Entries can be removed at any time to model revoked access.
#[derive(Debug, Default)]
pub struct InMemorySourceProvider {
    sources: RwLock<HashMap<SourceLocator, AudioArc>>,
}

impl InMemorySourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locator: impl Into<SourceLocator>, audio: AudioArc) {
        if let Ok(mut sources) = self.sources.write() {
            sources.insert(locator.into(), audio);
        }
    }

    pub fn remove(&self, locator: &SourceLocator) -> Option<AudioArc> {
        self.sources.write().ok()?.remove(locator)
    }
}

impl SourceProvider for InMemorySourceProvider {
    fn open(&self, locator: &SourceLocator) -> Result<SourceHandle, SourceError> {
        let audio = self
            .sources
            .read()
            .ok()
            .and_then(|sources| sources.get(locator).cloned())
            .ok_or_else(|| SourceError::NotFound(locator.to_path()))?;

        if audio.is_empty() {
            return Err(SourceError::Empty(locator.to_string()));
        }

        Ok(SourceHandle {
            locator: locator.clone(),
            audio,
        })
    }
}
