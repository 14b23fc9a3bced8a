use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::frequency::Frequency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Music,
    Message,
}

/// One unit of playable content on a station's playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default)]
    pub url: String,
    /// Script for the DJ to speak.  Only meaningful for messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Seconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plex_key: Option<String>,
}

impl PlaylistItem {
    /// A message with nothing to say is never played.
    pub fn is_playable(&self) -> bool {
        match self.kind {
            ItemKind::Music => true,
            ItemKind::Message => self
                .content
                .as_deref()
                .map(|c| !c.trim().is_empty())
                .unwrap_or(false),
        }
    }

    pub fn is_message(&self) -> bool {
        self.kind == ItemKind::Message
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Station {
    pub id: String,
    pub frequency: Frequency,
    pub name: String,
    pub owner_id: String,
    pub dj_character_id: String,
    #[serde(default)]
    pub playlist: Vec<PlaylistItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Station {
    pub fn find_item(&self, id: &str) -> Option<&PlaylistItem> {
        self.playlist.iter().find(|item| item.id == id)
    }
}

/// Payload for creating a station; the directory assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewStation {
    pub frequency: Frequency,
    pub name: String,
    pub owner_id: String,
    pub dj_character_id: String,
    #[serde(default)]
    pub playlist: Vec<PlaylistItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
}

impl NewStation {
    pub fn into_station(self, id: String, created_at: DateTime<Utc>) -> Station {
        Station {
            id,
            frequency: self.frequency,
            name: self.name,
            owner_id: self.owner_id,
            dj_character_id: self.dj_character_id,
            playlist: self.playlist,
            theme: self.theme,
            created_at,
        }
    }
}

/// The realtime "what is this station playing" document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub station_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    pub is_playing: bool,
    pub updated_at: DateTime<Utc>,
}
