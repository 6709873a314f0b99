use std::collections::VecDeque;

use rand::seq::SliceRandom;
use spindle_transport::Track;

/// Outcome of moving forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Play(Track),
    Exhausted,
}

/// Outcome of moving back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retreat {
    Play(Track),
    /// Nothing earlier to go back to; replay the current track from the top.
    RestartCurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueMode {
    Playlist,
    Adhoc,
}

#[derive(Debug, Clone)]
enum Mode {
    Playlist {
        tracks: Vec<Track>,
        index: usize,
        /// False once playback was stopped; the index is kept.
        active: bool,
    },
    Adhoc {
        current: Option<Track>,
        upcoming: VecDeque<Track>,
        history: Vec<Track>,
    },
}

impl Mode {
    fn empty_adhoc() -> Self {
        Mode::Adhoc {
            current: None,
            upcoming: VecDeque::new(),
            history: Vec::new(),
        }
    }
}

/// What plays next: either an ordered playlist with a wrapping index, or an
/// ad-hoc upcoming queue with a history stack. Never both.
#[derive(Debug, Clone)]
pub struct QueueContext {
    mode: Mode,
}

impl Default for QueueContext {
    fn default() -> Self {
        Self {
            mode: Mode::empty_adhoc(),
        }
    }
}

impl QueueContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> QueueMode {
        match self.mode {
            Mode::Playlist { .. } => QueueMode::Playlist,
            Mode::Adhoc { .. } => QueueMode::Adhoc,
        }
    }

    pub fn current(&self) -> Option<&Track> {
        match &self.mode {
            Mode::Playlist {
                tracks,
                index,
                active,
            } => active.then(|| tracks.get(*index)).flatten(),
            Mode::Adhoc { current, .. } => current.as_ref(),
        }
    }

    /// Playlist order; empty in ad-hoc mode.
    pub fn playlist(&self) -> &[Track] {
        match &self.mode {
            Mode::Playlist { tracks, .. } => tracks,
            Mode::Adhoc { .. } => &[],
        }
    }

    pub fn playlist_index(&self) -> Option<usize> {
        match &self.mode {
            Mode::Playlist { tracks, index, .. } if !tracks.is_empty() => Some(*index),
            _ => None,
        }
    }

    pub fn upcoming(&self) -> impl Iterator<Item = &Track> {
        let upcoming = match &self.mode {
            Mode::Adhoc { upcoming, .. } => Some(upcoming.iter()),
            Mode::Playlist { .. } => None,
        };
        upcoming.into_iter().flatten()
    }

    pub fn history(&self) -> &[Track] {
        match &self.mode {
            Mode::Adhoc { history, .. } => history,
            Mode::Playlist { .. } => &[],
        }
    }

    pub fn advance(&mut self) -> Advance {
        match &mut self.mode {
            Mode::Playlist {
                tracks,
                index,
                active,
            } => {
                if tracks.is_empty() {
                    return Advance::Exhausted;
                }
                *index = (*index + 1) % tracks.len();
                *active = true;
                Advance::Play(tracks[*index].clone())
            }
            Mode::Adhoc {
                current,
                upcoming,
                history,
            } => {
                let Some(next) = upcoming.pop_front() else {
                    return Advance::Exhausted;
                };
                if let Some(outgoing) = current.replace(next.clone()) {
                    history.push(outgoing);
                }
                Advance::Play(next)
            }
        }
    }

    pub fn retreat(&mut self) -> Retreat {
        match &mut self.mode {
            Mode::Playlist {
                tracks,
                index,
                active,
            } => {
                if tracks.is_empty() {
                    return Retreat::RestartCurrent;
                }
                *index = (*index + tracks.len() - 1) % tracks.len();
                *active = true;
                Retreat::Play(tracks[*index].clone())
            }
            Mode::Adhoc {
                current,
                upcoming,
                history,
            } => {
                let Some(previous) = history.pop() else {
                    return Retreat::RestartCurrent;
                };
                if let Some(outgoing) = current.replace(previous.clone()) {
                    upcoming.push_front(outgoing);
                }
                Retreat::Play(previous)
            }
        }
    }

    /// The user picked `track` directly.
    pub fn select(&mut self, track: Track) {
        match &mut self.mode {
            Mode::Playlist {
                tracks,
                index,
                active,
            } => match tracks.iter().position(|t| *t == track) {
                Some(position) => {
                    *index = position;
                    *active = true;
                }
                None => {
                    self.mode = Mode::Adhoc {
                        current: Some(track),
                        upcoming: VecDeque::new(),
                        history: Vec::new(),
                    };
                }
            },
            Mode::Adhoc {
                current, history, ..
            } => {
                let outgoing = current.replace(track.clone());
                if let Some(outgoing) = outgoing.filter(|t| *t != track) {
                    history.push(outgoing);
                }
            }
        }
    }

    /// Queue `track` right after the current one. Returns it back when
    /// nothing is current and it should start playing now.
    pub fn enqueue_next(&mut self, track: Track) -> Option<Track> {
        self.enqueue(track, true)
    }

    /// Queue `track` at the end. Returns it back when nothing is current and
    /// it should start playing now.
    pub fn enqueue_last(&mut self, track: Track) -> Option<Track> {
        self.enqueue(track, false)
    }

    fn enqueue(&mut self, track: Track, front: bool) -> Option<Track> {
        if let Mode::Playlist { .. } = self.mode {
            let current = self.current().cloned();
            self.mode = Mode::Adhoc {
                current,
                upcoming: VecDeque::new(),
                history: Vec::new(),
            };
        }

        let Mode::Adhoc {
            current, upcoming, ..
        } = &mut self.mode
        else {
            return None;
        };
        if current.is_none() {
            *current = Some(track.clone());
            return Some(track);
        }
        if front {
            upcoming.push_front(track);
        } else {
            upcoming.push_back(track);
        }
        None
    }

    /// Replace everything with a playlist. Returns the first track to play.
    pub fn load_playlist(&mut self, mut tracks: Vec<Track>, shuffle: bool) -> Option<Track> {
        if shuffle {
            tracks.shuffle(&mut rand::rng());
        }
        let first = tracks.first().cloned();
        self.mode = Mode::Playlist {
            active: first.is_some(),
            tracks,
            index: 0,
        };
        first
    }

    /// Nothing is current any more. Upcoming items and history are kept.
    pub fn release(&mut self) {
        match &mut self.mode {
            Mode::Playlist { active, .. } => *active = false,
            Mode::Adhoc { current, .. } => *current = None,
        }
    }
}
