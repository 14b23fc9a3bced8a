//! DJ speech.  Message items carry a script; the TTS service turns it into
//! audio, which is written under the speech cache so mpv can play a file.

use base64::Engine as _;
use hound::{SampleFormat, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use tuner_core::config::TtsConfig;

#[derive(Error, Debug)]
pub enum TtsError {
    #[error("No speech endpoint configured")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("TTS service returned {0}: {1}")]
    Api(u16, String),

    #[error("Invalid audio payload: {0}")]
    Payload(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV encoding error: {0}")]
    Wav(#[from] hound::Error),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeakRequest<'a> {
    message: &'a str,
    voice_params: VoiceParams<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceParams<'a> {
    character_id: &'a str,
}

#[derive(Deserialize)]
struct SpeakResponse {
    /// Base64; either a complete WAV file or raw 16-bit little-endian PCM.
    audio: String,
}

pub struct TtsClient {
    http_client: reqwest::Client,
    endpoint: Option<String>,
    sample_rate: u32,
    dir: PathBuf,
}

impl TtsClient {
    pub fn new(config: &TtsConfig, dir: PathBuf) -> Result<Self, TtsError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            sample_rate: config.sample_rate,
            dir,
        })
    }

    /// Synthesize `message` for `item_id` and return the file to play.
    /// Already-rendered items are served from the cache.
    pub async fn speak(&self, item_id: &str, message: &str, character_id: &str) -> Result<PathBuf, TtsError> {
        let path = speech_path(&self.dir, item_id);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("tts: cache hit {}", path.display());
            return Ok(path);
        }
        let endpoint = self.endpoint.as_deref().ok_or(TtsError::NotConfigured)?;

        let response = self
            .http_client
            .post(endpoint)
            .json(&SpeakRequest {
                message,
                voice_params: VoiceParams { character_id },
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TtsError::Api(status.as_u16(), body));
        }
        let payload: SpeakResponse = response.json().await?;
        let audio = base64::engine::general_purpose::STANDARD
            .decode(payload.audio.trim())
            .map_err(|e| TtsError::Payload(e.to_string()))?;

        tokio::fs::create_dir_all(&self.dir).await?;
        if audio.starts_with(b"RIFF") {
            tokio::fs::write(&path, &audio).await?;
        } else {
            let sample_rate = self.sample_rate;
            let out = path.clone();
            tokio::task::spawn_blocking(move || write_pcm_wav(&out, &audio, sample_rate))
                .await
                .map_err(|e| TtsError::Payload(e.to_string()))??;
        }
        info!("tts: rendered {} ({} chars)", path.display(), message.len());
        Ok(path)
    }
}

fn speech_path(dir: &Path, item_id: &str) -> PathBuf {
    let safe: String = item_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{safe}.wav"))
}

/// Wrap raw mono 16-bit little-endian PCM in a WAV container.
pub fn write_pcm_wav(path: &Path, pcm: &[u8], sample_rate: u32) -> Result<(), TtsError> {
    if pcm.len() % 2 != 0 {
        return Err(TtsError::Payload(format!("odd PCM length {}", pcm.len())));
    }
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for frame in pcm.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([frame[0], frame[1]]))?;
    }
    writer.finalize()?;
    Ok(())
}
