use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;
use crate::station_sync::SyncPolicy;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub mpv: MpvConfig,
    #[serde(default)]
    pub stations: StationsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub tts: TtsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Persisted dial position and volume.
    #[serde(default = "default_tuning_file")]
    pub tuning_file: PathBuf,
    /// Shared "stations changed" signal; every instance on this machine
    /// that should stay in sync must point at the same file.
    #[serde(default = "default_signal_file")]
    pub signal_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MpvConfig {
    #[serde(default = "default_volume")]
    pub default_volume: f32,
    /// Peak loudness of the static bed between stations.
    #[serde(default = "default_interference_volume")]
    pub interference_volume: f32,
    #[serde(default = "default_fade_ms")]
    pub fade_ms: u64,
}

/// Where stations come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StationsConfig {
    /// TOML `[[station]]` file used to seed the store on first run.
    /// Defaults to `$XDG_CONFIG_HOME/tuner/stations.toml`.
    #[serde(default = "default_stations_toml")]
    pub stations_toml: PathBuf,
    /// Mutable station store shared by every instance.
    #[serde(default = "default_store_file")]
    pub store_file: PathBuf,
    /// Remote directory base URL.  When set, the local store is not used.
    #[serde(default)]
    pub directory_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_found_ttl_secs")]
    pub found_ttl_secs: u64,
    #[serde(default = "default_empty_ttl_secs")]
    pub empty_ttl_secs: u64,
    #[serde(default = "default_signal_poll_ms")]
    pub signal_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_autoplay_delay_ms")]
    pub autoplay_delay_ms: u64,
    /// Start the next candidate when a track ends.
    #[serde(default = "default_auto_advance")]
    pub auto_advance: bool,
    /// Delay between dial steps while scanning.
    #[serde(default = "default_scan_step_ms")]
    pub scan_step_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Speech endpoint.  Without one, message items cannot be played.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_tts_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_tts_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tuning_file: default_tuning_file(),
            signal_file: default_signal_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for MpvConfig {
    fn default() -> Self {
        Self {
            default_volume: default_volume(),
            interference_volume: default_interference_volume(),
            fade_ms: default_fade_ms(),
        }
    }
}

impl Default for StationsConfig {
    fn default() -> Self {
        Self {
            stations_toml: default_stations_toml(),
            store_file: default_store_file(),
            directory_url: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            found_ttl_secs: default_found_ttl_secs(),
            empty_ttl_secs: default_empty_ttl_secs(),
            signal_poll_ms: default_signal_poll_ms(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            autoplay_delay_ms: default_autoplay_delay_ms(),
            auto_advance: default_auto_advance(),
            scan_step_ms: default_scan_step_ms(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            sample_rate: default_tts_sample_rate(),
            timeout_secs: default_tts_timeout_secs(),
        }
    }
}

impl SyncConfig {
    pub fn policy(&self) -> SyncPolicy {
        SyncPolicy {
            found_ttl: Duration::from_secs(self.found_ttl_secs),
            empty_ttl: Duration::from_secs(self.empty_ttl_secs),
        }
    }
}

fn default_tuning_file() -> PathBuf {
    platform::data_dir().join("tuning.json")
}

fn default_signal_file() -> PathBuf {
    platform::data_dir().join("stations.signal")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_volume() -> f32 {
    0.5
}

fn default_interference_volume() -> f32 {
    0.35
}

fn default_fade_ms() -> u64 {
    400
}

fn default_stations_toml() -> PathBuf {
    platform::config_dir().join("stations.toml")
}

fn default_store_file() -> PathBuf {
    platform::data_dir().join("stations.json")
}

fn default_found_ttl_secs() -> u64 {
    300
}

fn default_empty_ttl_secs() -> u64 {
    30
}

fn default_signal_poll_ms() -> u64 {
    500
}

fn default_autoplay_delay_ms() -> u64 {
    500
}

fn default_auto_advance() -> bool {
    true
}

fn default_scan_step_ms() -> u64 {
    150
}

fn default_tts_sample_rate() -> u32 {
    24_000
}

fn default_tts_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.sync.found_ttl_secs, 300);
        assert_eq!(config.sync.empty_ttl_secs, 30);
        assert_eq!(config.playback.autoplay_delay_ms, 500);
        assert!(config.stations.directory_url.is_none());
        assert!(config.stations.stations_toml.ends_with("tuner/stations.toml"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [sync]
            empty_ttl_secs = 10

            [tts]
            endpoint = "http://127.0.0.1:3400/speak"
            "#,
        )
        .unwrap();
        assert_eq!(config.sync.empty_ttl_secs, 10);
        assert_eq!(config.sync.found_ttl_secs, 300);
        assert_eq!(config.tts.sample_rate, 24_000);
        assert_eq!(config.sync.policy().empty_ttl, Duration::from_secs(10));
    }
}
