//! Track selection over a station's playlist.
//!
//! The candidate pool is the playlist in its original order minus failed
//! tracks and minus messages with nothing to say.  Navigation is circular:
//! `next` from the last candidate wraps to the first, and `next` from an id
//! that is no longer in the pool starts over at the first candidate so
//! playback never stalls.

use std::collections::VecDeque;

use crate::failed::FailedTracks;
use crate::model::PlaylistItem;

/// How many played track ids are remembered for "previous".
pub const HISTORY_LIMIT: usize = 10;

pub fn candidates<'a>(playlist: &'a [PlaylistItem], failed: &FailedTracks) -> Vec<&'a PlaylistItem> {
    playlist
        .iter()
        .filter(|item| !failed.has(&item.id) && item.is_playable())
        .collect()
}

pub fn next<'a>(
    playlist: &'a [PlaylistItem],
    failed: &FailedTracks,
    from_id: Option<&str>,
) -> Option<&'a PlaylistItem> {
    let pool = candidates(playlist, failed);
    if pool.is_empty() {
        return None;
    }
    let Some(from_id) = from_id else {
        return Some(pool[0]);
    };
    // Missing ids behave as index -1.
    let next_idx = match pool.iter().position(|item| item.id == from_id) {
        Some(idx) => (idx + 1) % pool.len(),
        None => 0,
    };
    Some(pool[next_idx])
}

#[derive(Debug, Clone, Default)]
pub struct TrackSelector {
    current: Option<PlaylistItem>,
    history: VecDeque<String>,
}

impl TrackSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&PlaylistItem> {
        self.current.as_ref()
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_ref().map(|item| item.id.as_str())
    }

    pub fn history(&self) -> Vec<String> {
        self.history.iter().cloned().collect()
    }

    /// Next candidate after the current track (or the first one).
    pub fn next<'a>(&self, playlist: &'a [PlaylistItem], failed: &FailedTracks) -> Option<&'a PlaylistItem> {
        next(playlist, failed, self.current_id())
    }

    /// The track played before the current one, if it is still a candidate.
    pub fn previous<'a>(
        &self,
        playlist: &'a [PlaylistItem],
        failed: &FailedTracks,
    ) -> Option<&'a PlaylistItem> {
        if self.history.len() < 2 {
            return None;
        }
        let prev_id = &self.history[self.history.len() - 2];
        candidates(playlist, failed)
            .into_iter()
            .find(|item| &item.id == prev_id)
    }

    pub fn select(&mut self, item: PlaylistItem) {
        self.history.push_back(item.id.clone());
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.current = Some(item);
    }

    pub fn can_go_forward(&self, playlist: &[PlaylistItem], failed: &FailedTracks) -> bool {
        self.next(playlist, failed).is_some()
    }

    pub fn can_go_back(&self) -> bool {
        self.history.len() > 1
    }

    pub fn reset_for_new_station(&mut self) {
        self.current = None;
        self.history.clear();
    }
}
