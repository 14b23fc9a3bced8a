//! Audio collaborators.  The core never touches a device or a decoder; it
//! talks to these two seams and the daemon plugs in real implementations.

use async_trait::async_trait;

use crate::frequency::Frequency;

/// Device-level audio: autoplay capability, context setup, and the static
/// bed played between stations.
#[async_trait]
pub trait AudioSubsystem: Send + Sync {
    /// Whether audio may start right now.  A `false` is not an error; it
    /// means the next start needs an explicit play.
    async fn test_autoplay_capability(&self) -> bool;

    async fn initialize(&self) -> anyhow::Result<()>;

    /// Make sure the output context exists and is running (idempotent).
    async fn ensure_audio_context(&self) -> anyhow::Result<()>;

    /// Fade interference to match the dial: static when no station is
    /// present, silence when one is.
    async fn transition_to_frequency(
        &self,
        frequency: Frequency,
        station_present: bool,
    ) -> anyhow::Result<()>;
}

/// The element that actually plays tracks.
#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    async fn load(&self, url: &str) -> anyhow::Result<()>;

    async fn set_pause(&self, paused: bool) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn set_volume(&self, volume: f32) -> anyhow::Result<()>;
}
