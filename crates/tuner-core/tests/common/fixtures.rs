#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tuner_core::model::{ItemKind, NewStation, PlaylistItem, Station};
use tuner_core::station_sync::StationDirectory;
use tuner_core::Frequency;

/// In-memory station directory that counts lookups.
#[derive(Default)]
pub struct MemoryDirectory {
    stations: Mutex<HashMap<Frequency, Station>>,
    lookups: AtomicU64,
}

impl MemoryDirectory {
    pub fn with(stations: Vec<Station>) -> Self {
        let dir = Self::default();
        {
            let mut map = dir.stations.lock().unwrap();
            for station in stations {
                map.insert(station.frequency, station);
            }
        }
        dir
    }

    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StationDirectory for MemoryDirectory {
    async fn station_for_frequency(&self, frequency: Frequency) -> anyhow::Result<Option<Station>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.stations.lock().unwrap().get(&frequency).cloned())
    }

    async fn create_station(&self, station: NewStation) -> anyhow::Result<Station> {
        let mut map = self.stations.lock().unwrap();
        if map.contains_key(&station.frequency) {
            anyhow::bail!("frequency {} is taken", station.frequency);
        }
        let id = format!("st-{}", map.len() + 1);
        let station = station.into_station(id, Utc::now());
        map.insert(station.frequency, station.clone());
        Ok(station)
    }
}

pub fn music(id: &str) -> PlaylistItem {
    PlaylistItem {
        id: id.to_string(),
        kind: ItemKind::Music,
        title: format!("Track {id}"),
        artist: Some("The Static".into()),
        url: format!("https://media.example/{id}.mp3"),
        content: None,
        duration: 185.0,
        plex_key: None,
    }
}

pub fn message(id: &str, content: &str) -> PlaylistItem {
    PlaylistItem {
        id: id.to_string(),
        kind: ItemKind::Message,
        title: "DJ break".into(),
        artist: None,
        url: String::new(),
        content: Some(content.to_string()),
        duration: 0.0,
        plex_key: None,
    }
}

pub fn new_station(mhz: f64, name: &str, playlist: Vec<PlaylistItem>) -> NewStation {
    NewStation {
        frequency: Frequency::new(mhz).unwrap(),
        name: name.to_string(),
        owner_id: "user-1".into(),
        dj_character_id: "dj-nova".into(),
        playlist,
        theme: None,
    }
}

pub fn station(id: &str, mhz: f64, playlist: Vec<PlaylistItem>) -> Station {
    new_station(mhz, &format!("Station {id}"), playlist).into_station(id.to_string(), Utc::now())
}
