use serde::{Deserialize, Serialize};

use crate::autoplay::InteractionKind;
use crate::frequency::Direction;
use crate::model::{NewStation, PlayerState, PlaylistItem, Station};
use crate::playback::PlaybackStatus;
use crate::tuning::RadioTuningState;

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.
pub const PROTOCOL_VERSION: u32 = 1;

/// Messages sent from a client to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    Tune { frequency: f64 },
    /// Raw slider position while dragging; does not retune.
    SetSlider { value: f64 },
    Scan { direction: Direction },
    StopScan,
    /// A user gesture (click, touch, key press).
    Interact { kind: InteractionKind },
    Play,
    PlayTrack { track_id: String },
    TogglePause,
    Stop,
    Next,
    Prev,
    ClearError,
    ClearFailed,
    CreateStation { station: NewStation },
    RefreshStations,
    ResetTuning,
    Volume { value: f32 },
    GetState,
}

/// Messages sent from the daemon to clients (broadcasts)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full snapshot.
    Hello {
        protocol_version: u32,
        rev: u64,
        state: TunerState,
    },
    State {
        data: TunerState,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Health of the mpv process as observed by the daemon.
///
/// Transitions:
///   Absent -> Starting -> Running -> Dead -> Starting ...
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub enum MpvHealth {
    #[default]
    Absent,
    Starting,
    Running,
    Dead,
}

impl MpvHealth {
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, MpvHealth::Dead)
    }
}

/// Everything a client needs to render the radio.  `rev` increases on every
/// publish so clients can spot missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TunerState {
    #[serde(default)]
    pub rev: u64,
    pub tuning: RadioTuningState,
    pub station: Option<Station>,
    pub current_track: Option<PlaylistItem>,
    #[serde(default)]
    pub history: Vec<String>,
    pub playback_status: PlaybackStatus,
    pub error_message: Option<String>,
    #[serde(default)]
    pub failed_tracks: Vec<String>,
    pub can_go_forward: bool,
    pub can_go_back: bool,
    pub audio_initialized: bool,
    pub autoplay_ready: bool,
    /// Realtime document for the station on the dial.
    pub player_state: Option<PlayerState>,
    pub volume: f32,
    #[serde(default)]
    pub mpv_health: MpvHealth,
    pub last_sync: u64,
}

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_frame() {
        let msg = Message::Command(Command::Tune { frequency: 101.3 });
        let encoded = msg.encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(Command::Tune { frequency }) => assert_eq!(frequency, 101.3),
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let encoded = Message::Command(Command::Next).encode().unwrap();
        assert!(Message::decode(&encoded[..3]).is_err());
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
    }

    #[test]
    fn test_interact_wire_format() {
        let json = r#"{"cmd":"Interact","kind":"touchstart"}"#;
        let cmd: Command = serde_json::from_str(json).unwrap();
        assert!(matches!(cmd, Command::Interact { kind: InteractionKind::TouchStart }));
    }

    #[test]
    fn test_hello_carries_rev() {
        let state = TunerState {
            rev: 42,
            ..Default::default()
        };
        let msg = Message::Broadcast(Broadcast::Hello {
            protocol_version: PROTOCOL_VERSION,
            rev: 42,
            state,
        });
        let encoded = msg.encode().unwrap();
        let (decoded, _) = Message::decode(&encoded).unwrap();
        match decoded {
            Message::Broadcast(Broadcast::Hello { protocol_version, rev, state }) => {
                assert_eq!(protocol_version, PROTOCOL_VERSION);
                assert_eq!(rev, 42);
                assert_eq!(state.tuning.frequency.to_string(), "100.0");
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }
}
