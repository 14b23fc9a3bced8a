//! Playback state machine.
//!
//! ```text
//!   Idle ──► Loading ──► Playing ◄──► Paused
//!    ▲          ▲                       │
//!    │          └────────── Paused ─────┘
//!    │
//!   Error ◄── (any state, on failure)
//! ```
//!
//! `Error` holds until `clear_error()` (back to `Idle`) or a new attempt
//! begins loading.  In the latter case the message is kept in `last_error`.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, TunerError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct PlaybackMachine {
    status: PlaybackStatus,
    error_message: Option<String>,
    last_error: Option<String>,
    /// Id of the track loaded into the engine.  Survives `fail()` so a retry
    /// can reuse it.
    source: Option<String>,
}

impl PlaybackMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    /// Loading, playing or paused.
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            PlaybackStatus::Loading | PlaybackStatus::Playing | PlaybackStatus::Paused
        )
    }

    pub fn begin_loading(&mut self, source: impl Into<String>) -> Result<()> {
        match self.status {
            PlaybackStatus::Idle | PlaybackStatus::Paused => {}
            PlaybackStatus::Error => {
                if let Some(msg) = self.error_message.take() {
                    warn!("playback: retrying after error: {}", msg);
                    self.last_error = Some(msg);
                }
            }
            from => {
                return Err(TunerError::InvalidTransition {
                    from,
                    action: "begin loading",
                })
            }
        }
        self.source = Some(source.into());
        self.transition(PlaybackStatus::Loading);
        Ok(())
    }

    pub fn started(&mut self) -> Result<()> {
        if self.status != PlaybackStatus::Loading {
            return Err(TunerError::InvalidTransition {
                from: self.status,
                action: "start playing",
            });
        }
        self.transition(PlaybackStatus::Playing);
        Ok(())
    }

    /// Returns the new status.
    pub fn toggle_pause(&mut self) -> Result<PlaybackStatus> {
        let to = match self.status {
            PlaybackStatus::Playing => PlaybackStatus::Paused,
            PlaybackStatus::Paused => PlaybackStatus::Playing,
            from => {
                return Err(TunerError::InvalidTransition {
                    from,
                    action: "toggle pause",
                })
            }
        };
        self.transition(to);
        Ok(to)
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("playback: {:?} → Error: {}", self.status, message);
        self.status = PlaybackStatus::Error;
        self.error_message = Some(message);
    }

    pub fn clear_error(&mut self) -> Result<()> {
        if self.status != PlaybackStatus::Error {
            return Err(TunerError::InvalidTransition {
                from: self.status,
                action: "clear error",
            });
        }
        self.error_message = None;
        self.transition(PlaybackStatus::Idle);
        Ok(())
    }

    /// Explicit stop from any state.
    pub fn set_idle(&mut self) {
        self.error_message = None;
        self.source = None;
        self.transition(PlaybackStatus::Idle);
    }

    fn transition(&mut self, to: PlaybackStatus) {
        if self.status != to {
            debug!("playback: {:?} → {:?}", self.status, to);
        }
        self.status = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut pb = PlaybackMachine::new();
        pb.begin_loading("music-1").unwrap();
        assert_eq!(pb.status(), PlaybackStatus::Loading);
        pb.started().unwrap();
        assert!(pb.is_playing());
        assert_eq!(pb.toggle_pause().unwrap(), PlaybackStatus::Paused);
        assert_eq!(pb.toggle_pause().unwrap(), PlaybackStatus::Playing);
    }

    #[test]
    fn test_cannot_play_from_idle() {
        let mut pb = PlaybackMachine::new();
        assert!(pb.started().is_err());
        assert!(pb.toggle_pause().is_err());
        assert_eq!(pb.status(), PlaybackStatus::Idle);
    }

    #[test]
    fn test_no_reload_while_loading_or_playing() {
        let mut pb = PlaybackMachine::new();
        pb.begin_loading("a").unwrap();
        assert!(pb.begin_loading("b").is_err());
        pb.started().unwrap();
        assert!(pb.begin_loading("b").is_err());
        assert_eq!(pb.source(), Some("a"));
    }

    #[test]
    fn test_error_is_sticky_until_cleared() {
        let mut pb = PlaybackMachine::new();
        pb.begin_loading("a").unwrap();
        pb.fail("decoder gave up");
        assert_eq!(pb.status(), PlaybackStatus::Error);
        assert_eq!(pb.error_message(), Some("decoder gave up"));
        assert_eq!(pb.source(), Some("a"), "resource kept for retry");

        assert!(pb.started().is_err());
        assert!(pb.toggle_pause().is_err());
        assert_eq!(pb.error_message(), Some("decoder gave up"));

        pb.clear_error().unwrap();
        assert_eq!(pb.status(), PlaybackStatus::Idle);
        assert!(pb.error_message().is_none());
    }

    #[test]
    fn test_retry_from_error_keeps_message() {
        let mut pb = PlaybackMachine::new();
        pb.begin_loading("a").unwrap();
        pb.fail("404");
        pb.begin_loading("b").unwrap();
        assert_eq!(pb.status(), PlaybackStatus::Loading);
        assert!(pb.error_message().is_none());
        assert_eq!(pb.last_error(), Some("404"));
    }

    #[test]
    fn test_clear_error_only_from_error() {
        let mut pb = PlaybackMachine::new();
        assert!(pb.clear_error().is_err());
    }
}
