//! Interference (static) between stations.
//!
//! The orchestrator only decides *when* the bed changes; the audio subsystem
//! does the fading.  Each fade runs in its own task and a newer transition
//! aborts the one still running, so the caller never waits on the bed.
//! Failures are logged and swallowed.

use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::audio::AudioSubsystem;
use crate::frequency::Frequency;

type Target = Option<(Frequency, bool)>;

pub struct InterferenceOrchestrator {
    audio: Arc<dyn AudioSubsystem>,
    /// Position the bed is fading (or has faded) to.  Cleared when a fade fails.
    target: Arc<Mutex<Target>>,
    fade: Option<JoinHandle<()>>,
}

impl InterferenceOrchestrator {
    pub fn new(audio: Arc<dyn AudioSubsystem>) -> Self {
        Self {
            audio,
            target: Arc::new(Mutex::new(None)),
            fade: None,
        }
    }

    pub fn current(&self) -> Target {
        self.target.lock().ok().and_then(|t| *t)
    }

    /// Start fading towards the dial position.  Returns false when the bed
    /// already targets it.
    pub fn transition(&mut self, frequency: Frequency, station_present: bool) -> bool {
        let wanted = Some((frequency, station_present));
        if self.current() == wanted {
            debug!("interference: already at {} (station={})", frequency, station_present);
            return false;
        }
        if let Some(fade) = self.fade.take() {
            fade.abort();
        }
        if let Ok(mut target) = self.target.lock() {
            *target = wanted;
        }

        let audio = Arc::clone(&self.audio);
        let target = Arc::clone(&self.target);
        self.fade = Some(tokio::spawn(async move {
            if let Err(e) = audio.transition_to_frequency(frequency, station_present).await {
                warn!("interference: transition to {} failed: {:#}", frequency, e);
                if let Ok(mut target) = target.lock() {
                    if *target == wanted {
                        *target = None;
                    }
                }
            }
        }));
        true
    }

    /// Wait for the running fade, if any.
    pub async fn settle(&mut self) {
        if let Some(fade) = self.fade.take() {
            let _ = fade.await;
        }
    }

    /// Abort the running fade where it stands.
    pub fn halt(&mut self) {
        if let Some(fade) = self.fade.take() {
            fade.abort();
        }
    }
}

/// Volume steps from `from` to `to`, excluding the start, ending exactly at
/// `to`.
pub fn crossfade_ramp(from: f32, to: f32, steps: usize) -> Vec<f32> {
    let steps = steps.max(1);
    (1..=steps)
        .map(|i| from + (to - from) * (i as f32 / steps as f32))
        .collect()
}

/// Loudness of the static bed on an empty frequency, in `[0.6, 1.0] × base`.
/// Deterministic per frequency so re-tuning sounds the same.
pub fn static_level(frequency: Frequency, base: f32) -> f32 {
    let t = frequency.tenths() as u32;
    let hash = t.wrapping_mul(2_654_435_761) >> 16;
    let jitter = (hash % 1000) as f32 / 1000.0;
    base * (0.6 + 0.4 * jitter)
}
