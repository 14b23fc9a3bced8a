pub mod audio;
pub mod autoplay;
pub mod cache;
pub mod config;
pub mod error;
pub mod failed;
pub mod frequency;
pub mod interference;
pub mod model;
pub mod platform;
pub mod playback;
pub mod player_state;
pub mod protocol;
pub mod selection;
pub mod signal;
pub mod state;
pub mod station_sync;
pub mod tuning;

pub use error::{Result, TunerError};
pub use frequency::Frequency;
