//! Auto-play gating.
//!
//! Audio may not start before a real user gesture.  The first click, touch
//! or key press runs initialization exactly once: probe the audio
//! subsystem, and if it allows playback, initialize it and turn auto-play
//! on.  From then on every dial change gets a reaction: interference follows
//! the dial, and a station with nothing playing starts after a short settle
//! delay.
//!
//! All deferred work hangs off one `CancellationToken`; `teardown()` cancels
//! it whether or not anything fired.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::AudioSubsystem;
use crate::error::{Result, TunerError};
use crate::frequency::Frequency;

pub const AUTOPLAY_SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Click,
    TouchStart,
    KeyDown,
}

/// What the coordinator needs to know about the player to decide.
#[derive(Debug, Clone, Copy)]
pub struct PlayerSnapshot {
    pub frequency: Frequency,
    pub station_present: bool,
    pub track_loaded: bool,
    /// Loading, playing or paused.
    pub is_playing: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitialAction {
    ResumeTrack,
    StartInterference(Frequency),
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TuneReaction {
    /// `(frequency, station_present)` to hand to the interference bed.
    pub interference: Option<(Frequency, bool)>,
    pub autoplay_after: Option<Duration>,
}

pub struct AutoPlayCoordinator {
    audio_initialized: bool,
    autoplay_ready: bool,
    init_started: bool,
    settle_delay: Duration,
    cancel: CancellationToken,
}

impl AutoPlayCoordinator {
    pub fn new(settle_delay: Duration) -> Self {
        Self {
            audio_initialized: false,
            autoplay_ready: false,
            init_started: false,
            settle_delay,
            cancel: CancellationToken::new(),
        }
    }

    pub fn audio_initialized(&self) -> bool {
        self.audio_initialized
    }

    pub fn autoplay_ready(&self) -> bool {
        self.autoplay_ready
    }

    pub fn is_torn_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True only for the first gesture; initialization runs once per
    /// coordinator no matter how many gestures follow.
    pub fn observe_interaction(&mut self, kind: InteractionKind) -> bool {
        if self.init_started || self.cancel.is_cancelled() {
            return false;
        }
        self.init_started = true;
        info!("autoplay: first user gesture ({:?})", kind);
        true
    }

    /// Probe and initialize.  `Ok(false)` means the probe said no; no retry
    /// is attempted and the next manual play starts audio instead.
    pub async fn initialize(&mut self, audio: &dyn AudioSubsystem) -> Result<bool> {
        if !audio.test_autoplay_capability().await {
            info!("autoplay: not permitted, waiting for a manual play");
            self.autoplay_ready = false;
            return Ok(false);
        }

        let setup = async {
            audio.initialize().await?;
            audio.ensure_audio_context().await
        };
        if let Err(e) = setup.await {
            warn!("autoplay: audio initialization failed: {:#}", e);
            self.autoplay_ready = false;
            return Err(TunerError::Autoplay(format!("{e:#}")));
        }

        self.audio_initialized = true;
        self.autoplay_ready = true;
        info!("autoplay: audio initialized, auto-play enabled");
        Ok(true)
    }

    /// What to start right after a successful initialization.
    pub fn initial_action(&self, snapshot: &PlayerSnapshot) -> InitialAction {
        if !self.autoplay_ready {
            return InitialAction::Nothing;
        }
        if snapshot.track_loaded && !snapshot.is_playing {
            InitialAction::ResumeTrack
        } else if !snapshot.station_present {
            InitialAction::StartInterference(snapshot.frequency)
        } else {
            InitialAction::Nothing
        }
    }

    /// Reaction to a dial or station change.  Nothing happens before audio
    /// is initialized.
    pub fn on_tuned(&self, snapshot: &PlayerSnapshot) -> TuneReaction {
        if !self.audio_initialized || self.cancel.is_cancelled() {
            return TuneReaction::default();
        }
        let autoplay = snapshot.station_present && self.autoplay_ready && !snapshot.is_playing;
        TuneReaction {
            interference: Some((snapshot.frequency, snapshot.station_present)),
            autoplay_after: autoplay.then_some(self.settle_delay),
        }
    }

    /// Deliver `event` to `tx` after `delay` unless torn down first.
    pub fn schedule<T>(&self, delay: Duration, tx: mpsc::Sender<T>, event: T) -> tokio::task::JoinHandle<()>
    where
        T: Send + 'static,
    {
        let token = self.cancel.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!("autoplay: deferred action cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(event).await;
                }
            }
        })
    }

    /// Token for any other listener that must die with this coordinator.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn teardown(&mut self) {
        if !self.cancel.is_cancelled() {
            info!("autoplay: teardown");
            self.cancel.cancel();
        }
    }
}

impl Default for AutoPlayCoordinator {
    fn default() -> Self {
        Self::new(AUTOPLAY_SETTLE_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeAudio {
        allowed: bool,
        inits: AtomicUsize,
    }

    #[async_trait]
    impl AudioSubsystem for FakeAudio {
        async fn test_autoplay_capability(&self) -> bool {
            self.allowed
        }
        async fn initialize(&self) -> anyhow::Result<()> {
            self.inits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn ensure_audio_context(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn transition_to_frequency(&self, _f: Frequency, _present: bool) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn snapshot(station_present: bool, track_loaded: bool, is_playing: bool) -> PlayerSnapshot {
        PlayerSnapshot {
            frequency: Frequency::new(101.3).unwrap(),
            station_present,
            track_loaded,
            is_playing,
        }
    }

    #[test]
    fn test_only_first_gesture_counts() {
        let mut coord = AutoPlayCoordinator::default();
        assert!(coord.observe_interaction(InteractionKind::Click));
        assert!(!coord.observe_interaction(InteractionKind::KeyDown));
        assert!(!coord.observe_interaction(InteractionKind::TouchStart));
    }

    #[test]
    fn test_no_gesture_after_teardown() {
        let mut coord = AutoPlayCoordinator::default();
        coord.teardown();
        assert!(!coord.observe_interaction(InteractionKind::Click));
    }

    #[tokio::test]
    async fn test_denied_probe_stays_uninitialized() {
        let audio = FakeAudio { allowed: false, inits: AtomicUsize::new(0) };
        let mut coord = AutoPlayCoordinator::default();
        assert!(!coord.initialize(&audio).await.unwrap());
        assert!(!coord.autoplay_ready());
        assert!(!coord.audio_initialized());
        assert_eq!(audio.inits.load(Ordering::SeqCst), 0);
        assert_eq!(coord.on_tuned(&snapshot(true, false, false)), TuneReaction::default());
    }

    #[tokio::test]
    async fn test_initial_action_and_tune_reaction() {
        let audio = FakeAudio { allowed: true, inits: AtomicUsize::new(0) };
        let mut coord = AutoPlayCoordinator::default();
        assert!(coord.initialize(&audio).await.unwrap());

        assert_eq!(coord.initial_action(&snapshot(true, true, false)), InitialAction::ResumeTrack);
        assert!(matches!(
            coord.initial_action(&snapshot(false, false, false)),
            InitialAction::StartInterference(_)
        ));
        assert_eq!(coord.initial_action(&snapshot(true, false, false)), InitialAction::Nothing);

        let reaction = coord.on_tuned(&snapshot(true, false, false));
        assert_eq!(reaction.autoplay_after, Some(AUTOPLAY_SETTLE_DELAY));
        assert_eq!(reaction.interference.map(|(_, present)| present), Some(true));

        let reaction = coord.on_tuned(&snapshot(true, true, true));
        assert_eq!(reaction.autoplay_after, None);

        let reaction = coord.on_tuned(&snapshot(false, false, false));
        assert_eq!(reaction.autoplay_after, None);
        assert_eq!(reaction.interference.map(|(_, present)| present), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_cancels_deferred_actions() {
        let mut coord = AutoPlayCoordinator::default();
        let (tx, mut rx) = mpsc::channel(4);

        coord.schedule(Duration::from_millis(500), tx.clone(), "fired");
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(rx.recv().await, Some("fired"));

        let handle = coord.schedule(Duration::from_millis(500), tx, "late");
        coord.teardown();
        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
