//! File-backed collaborators shared by every tuner instance on a machine.
//!
//! `FileStationStore` keeps all stations in one JSON file and re-reads it on
//! every lookup, so a station created by another instance is visible as soon
//! as that instance's cache entry expires or the update signal fires.
//! `FilePlayerStates` keeps one small document per station and polls it for
//! subscribers.

use async_trait::async_trait;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use tuner_core::model::{NewStation, PlayerState, PlaylistItem, Station};
use tuner_core::player_state::{PlayerStateEvent, PlayerStateSource};
use tuner_core::station_sync::StationDirectory;
use tuner_core::Frequency;

pub struct FileStationStore {
    path: PathBuf,
    /// Serializes read-modify-write within this process.
    write_lock: Mutex<()>,
}

impl FileStationStore {
    /// Open the store, seeding it from `seed_toml` when the store file does
    /// not exist yet.
    pub async fn open(path: PathBuf, seed_toml: &Path) -> anyhow::Result<Self> {
        let store = Self {
            path,
            write_lock: Mutex::new(()),
        };
        if !store.path.exists() {
            let seeded = if seed_toml.exists() {
                let content = tokio::fs::read_to_string(seed_toml).await?;
                parse_stations_from_toml_str(&content)?
            } else {
                Vec::new()
            };
            info!(
                "store: creating {} with {} seed station(s)",
                store.path.display(),
                seeded.len()
            );
            store.write_all(&seeded).await?;
        }
        Ok(store)
    }

    pub async fn stations(&self) -> anyhow::Result<Vec<Station>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_all(&self, stations: &[Station]) -> anyhow::Result<()> {
        write_json_atomic(&self.path, stations).await
    }
}

#[async_trait]
impl StationDirectory for FileStationStore {
    async fn station_for_frequency(&self, frequency: Frequency) -> anyhow::Result<Option<Station>> {
        let stations = self.stations().await?;
        Ok(stations.into_iter().find(|s| s.frequency == frequency))
    }

    async fn create_station(&self, station: NewStation) -> anyhow::Result<Station> {
        let _guard = self.write_lock.lock().await;
        let mut stations = self.stations().await?;
        if let Some(existing) = stations.iter().find(|s| s.frequency == station.frequency) {
            anyhow::bail!(
                "frequency {} is already taken by \"{}\"",
                station.frequency,
                existing.name
            );
        }
        let created = station.into_station(new_station_id(), chrono::Utc::now());
        stations.push(created.clone());
        self.write_all(&stations).await?;
        info!("store: created station {} on {}", created.id, created.frequency);
        Ok(created)
    }
}

fn new_station_id() -> String {
    format!("st-{:08x}", rand::thread_rng().gen::<u32>())
}

async fn write_json_atomic<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(value)?).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

// ── TOML seed ─────────────────────────────────────────────────────────────────

/// Matches the `[[station]]` tables of the seed file.  Kept apart from
/// `Station` so the hand-written file can omit ids and owners.
#[derive(Debug, serde::Deserialize)]
struct TomlStationFile {
    #[serde(default)]
    station: Vec<TomlStation>,
}

#[derive(Debug, serde::Deserialize)]
struct TomlStation {
    #[serde(default)]
    id: Option<String>,
    frequency: f64,
    name: String,
    #[serde(default = "default_owner")]
    owner_id: String,
    #[serde(default = "default_dj")]
    dj_character_id: String,
    #[serde(default)]
    theme: Option<String>,
    #[serde(default)]
    playlist: Vec<PlaylistItem>,
}

fn default_owner() -> String {
    "local".to_string()
}

fn default_dj() -> String {
    "default".to_string()
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let file: TomlStationFile = toml::from_str(content)?;
    let mut stations: Vec<Station> = Vec::with_capacity(file.station.len());
    for s in file.station {
        let frequency = Frequency::new(s.frequency)?;
        if stations.iter().any(|other| other.frequency == frequency) {
            warn!("store: seed has two stations on {}, keeping the first", frequency);
            continue;
        }
        let new = NewStation {
            frequency,
            name: s.name,
            owner_id: s.owner_id,
            dj_character_id: s.dj_character_id,
            playlist: s.playlist,
            theme: s.theme,
        };
        stations.push(new.into_station(s.id.unwrap_or_else(new_station_id), chrono::Utc::now()));
    }
    Ok(stations)
}

// ── player state documents ────────────────────────────────────────────────────

pub struct FilePlayerStates {
    dir: PathBuf,
    poll: Duration,
}

impl FilePlayerStates {
    pub fn new(dir: PathBuf, poll: Duration) -> Self {
        Self { dir, poll }
    }

    fn doc_path(&self, station_id: &str) -> PathBuf {
        doc_path(&self.dir, station_id)
    }
}

fn doc_path(dir: &Path, station_id: &str) -> PathBuf {
    let safe: String = station_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{safe}.json"))
}

async fn read_doc(path: &Path) -> Result<Option<PlayerState>, String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| format!("unreadable player state {}: {}", path.display(), e)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(format!("{}: {}", path.display(), e)),
    }
}

#[async_trait]
impl PlayerStateSource for FilePlayerStates {
    fn subscribe(&self, station_id: &str) -> mpsc::Receiver<PlayerStateEvent> {
        let (tx, rx) = mpsc::channel(8);
        let path = self.doc_path(station_id);
        let poll = self.poll;
        tokio::spawn(async move {
            if tx.send(PlayerStateEvent::Loading).await.is_err() {
                return;
            }
            let mut last: Option<Result<Option<PlayerState>, String>> = None;
            loop {
                let current = read_doc(&path).await;
                if last.as_ref() != Some(&current) {
                    let event = match &current {
                        Ok(doc) => PlayerStateEvent::Snapshot(doc.clone()),
                        Err(e) => PlayerStateEvent::Error(e.clone()),
                    };
                    if tx.send(event).await.is_err() {
                        break;
                    }
                    last = Some(current);
                }
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
            debug!("player-state: poller for {} stopped", path.display());
        });
        rx
    }

    async fn publish(&self, state: PlayerState) -> anyhow::Result<()> {
        let path = self.doc_path(&state.station_id);
        write_json_atomic(&path, &state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tuner_core::model::ItemKind;

    const SEED: &str = r#"
        [[station]]
        id = "st-jazz"
        frequency = 92.1
        name = "Late Jazz"

        [[station.playlist]]
        id = "msg-1"
        type = "message"
        title = "Welcome"
        content = ""

        [[station.playlist]]
        id = "music-1"
        type = "music"
        title = "So What"
        url = "https://media.example/so-what.mp3"
        duration = 545.0

        [[station]]
        frequency = 92.1
        name = "Duplicate"
    "#;

    #[test]
    fn test_seed_parsing_keeps_first_per_frequency() {
        let stations = parse_stations_from_toml_str(SEED).unwrap();
        assert_eq!(stations.len(), 1);
        let st = &stations[0];
        assert_eq!(st.id, "st-jazz");
        assert_eq!(st.owner_id, "local");
        assert_eq!(st.playlist.len(), 2);
        assert_eq!(st.playlist[0].kind, ItemKind::Message);
        assert!(!st.playlist[0].is_playable());
    }

    #[test]
    fn test_seed_rejects_out_of_band() {
        let bad = "[[station]]\nfrequency = 120.0\nname = \"Nope\"\n";
        assert!(parse_stations_from_toml_str(bad).is_err());
    }

    #[tokio::test]
    async fn test_store_one_station_per_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("stations.toml");
        std::fs::write(&seed, SEED).unwrap();
        let store = FileStationStore::open(dir.path().join("stations.json"), &seed)
            .await
            .unwrap();

        let f = Frequency::new(92.1).unwrap();
        assert_eq!(store.station_for_frequency(f).await.unwrap().unwrap().id, "st-jazz");

        let taken = NewStation {
            frequency: f,
            name: "Second".into(),
            owner_id: "u".into(),
            dj_character_id: "dj".into(),
            playlist: vec![],
            theme: None,
        };
        assert!(store.create_station(taken.clone()).await.is_err());

        let free = NewStation {
            frequency: Frequency::new(99.0).unwrap(),
            ..taken
        };
        let created = store.create_station(free).await.unwrap();

        // A second handle on the same file sees it.
        let other = FileStationStore::open(dir.path().join("stations.json"), &seed)
            .await
            .unwrap();
        let found = other
            .station_for_frequency(Frequency::new(99.0).unwrap())
            .await
            .unwrap();
        assert_eq!(found.map(|s| s.id), Some(created.id));
    }

    #[tokio::test]
    async fn test_player_state_subscription_sees_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let docs = FilePlayerStates::new(dir.path().to_path_buf(), Duration::from_millis(10));
        let mut rx = docs.subscribe("st-1");

        assert_eq!(rx.recv().await, Some(PlayerStateEvent::Loading));
        assert_eq!(rx.recv().await, Some(PlayerStateEvent::Snapshot(None)));

        let state = PlayerState {
            station_id: "st-1".into(),
            track_id: Some("music-1".into()),
            is_playing: true,
            updated_at: chrono::Utc::now(),
        };
        docs.publish(state.clone()).await.unwrap();

        let next = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(next, Some(PlayerStateEvent::Snapshot(Some(state))));
    }
}
