//! Dial state.  One store per tuner, injected where it is needed; only the
//! frequency, the raw slider position and the volume survive a restart.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;
use crate::frequency::{Direction, Frequency};

pub const DEFAULT_FREQUENCY_TENTHS: u16 = 1000;
pub const DEFAULT_VOLUME: f32 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioTuningState {
    pub frequency: Frequency,
    /// Raw dial position while dragging; snaps to `frequency` on tune.
    pub slider_value: f64,
    pub is_scanning: bool,
    /// 0–100.
    pub signal_strength: u8,
    pub error: Option<String>,
}

impl Default for RadioTuningState {
    fn default() -> Self {
        let frequency = default_frequency();
        Self {
            frequency,
            slider_value: frequency.mhz(),
            is_scanning: false,
            signal_strength: 0,
            error: None,
        }
    }
}

fn default_frequency() -> Frequency {
    Frequency::from_tenths(DEFAULT_FREQUENCY_TENTHS).unwrap_or(Frequency::MIN)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistentTuning {
    frequency: f64,
    slider_value: f64,
    volume: f32,
}

impl Default for PersistentTuning {
    fn default() -> Self {
        Self {
            frequency: default_frequency().mhz(),
            slider_value: default_frequency().mhz(),
            volume: DEFAULT_VOLUME,
        }
    }
}

pub struct TuningStore {
    state: RadioTuningState,
    volume: f32,
    file: Option<PathBuf>,
}

impl TuningStore {
    /// Load persisted tuning from `file`, falling back to defaults.
    pub fn new(file: PathBuf) -> Self {
        let persistent = Self::load_persistent(&file);
        let frequency = Frequency::new(persistent.frequency).unwrap_or_else(|_| {
            warn!("tuning: stored frequency {} out of band, using default", persistent.frequency);
            default_frequency()
        });
        let state = RadioTuningState {
            frequency,
            slider_value: clamp_slider(persistent.slider_value),
            ..RadioTuningState::default()
        };
        Self {
            state,
            volume: persistent.volume.clamp(0.0, 1.0),
            file: Some(file),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            state: RadioTuningState::default(),
            volume: DEFAULT_VOLUME,
            file: None,
        }
    }

    pub fn state(&self) -> &RadioTuningState {
        &self.state
    }

    pub fn frequency(&self) -> Frequency {
        self.state.frequency
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub async fn set_frequency(&mut self, frequency: Frequency) -> Result<()> {
        self.state.frequency = frequency;
        self.state.slider_value = frequency.mhz();
        self.state.error = None;
        self.save().await
    }

    /// Move one step and return the new frequency.
    pub async fn step(&mut self, direction: Direction) -> Result<Frequency> {
        let next = self.state.frequency.step(direction);
        self.set_frequency(next).await?;
        Ok(next)
    }

    pub async fn set_slider_value(&mut self, value: f64) -> Result<()> {
        self.state.slider_value = clamp_slider(value);
        self.save().await
    }

    pub async fn set_volume(&mut self, volume: f32) -> Result<()> {
        self.volume = volume.clamp(0.0, 1.0);
        self.save().await
    }

    pub fn set_scanning(&mut self, scanning: bool) {
        self.state.is_scanning = scanning;
    }

    pub fn set_signal_strength(&mut self, strength: u8) {
        self.state.signal_strength = strength.min(100);
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.state.error = error;
    }

    /// Back to defaults (volume is kept).
    pub async fn reset(&mut self) -> Result<()> {
        self.state = RadioTuningState::default();
        self.save().await
    }

    async fn save(&self) -> Result<()> {
        let Some(file) = &self.file else {
            return Ok(());
        };
        let persistent = PersistentTuning {
            frequency: self.state.frequency.mhz(),
            slider_value: self.state.slider_value,
            volume: self.volume,
        };
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(&persistent)?;
        tokio::fs::write(file, json).await?;
        debug!("tuning: saved {}", file.display());
        Ok(())
    }

    fn load_persistent(file: &Path) -> PersistentTuning {
        if let Ok(content) = std::fs::read_to_string(file) {
            if let Ok(persistent) = serde_json::from_str::<PersistentTuning>(&content) {
                return persistent;
            }
        }
        PersistentTuning::default()
    }
}

fn clamp_slider(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(Frequency::MIN.mhz(), Frequency::MAX.mhz())
    } else {
        default_frequency().mhz()
    }
}
