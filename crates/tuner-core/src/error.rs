//! Error types for the tuner core.

use thiserror::Error;

use crate::playback::PlaybackStatus;

#[derive(Error, Debug)]
pub enum TunerError {
    /// Frequency outside the 87.0–108.0 band (or not a number at all).
    #[error("Invalid frequency {0}: must be between 87.0 and 108.0")]
    InvalidFrequency(f64),

    /// The station directory could not answer.  Never cached.
    #[error("Station lookup failed for {frequency}: {message}")]
    Lookup { frequency: String, message: String },

    #[error("Cannot {action} while {from:?}")]
    InvalidTransition {
        from: PlaybackStatus,
        action: &'static str,
    },

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Autoplay error: {0}")]
    Autoplay(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TunerError>;
