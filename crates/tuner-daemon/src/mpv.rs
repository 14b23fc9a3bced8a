/// mpv IPC driver with separated reader/writer tasks.
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← PendingRequest via mpsc → JSON line → socket
///         └── reader_task   ← JSON lines from socket
///                                ├── response (request_id) → waiting oneshot
///                                └── event / property-change → event channel
/// ```
///
/// Two instances run per tuner: the "player" plays tracks and DJ speech,
/// the "static" one loops a lavfi noise source whose volume is faded in and
/// out as the dial moves between empty frequencies and stations.
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use tuner_core::audio::{AudioSubsystem, PlaybackEngine};
use tuner_core::config::MpvConfig;
use tuner_core::interference::{crossfade_ramp, static_level};
use tuner_core::platform;
use tuner_core::protocol::MpvHealth;
use tuner_core::Frequency;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

/// observe_property ids matched in property-change events.
pub const OBS_CORE_IDLE: u64 = 1;
pub const OBS_PAUSE: u64 = 2;

/// Source for the interference bed.
const STATIC_SOURCE: &str = "av://lavfi:anoisesrc=color=pink:amplitude=0.6";
const FADE_STEP: Duration = Duration::from_millis(40);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String,
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

/// An mpv event or property-change that arrived unsolicited.
#[derive(Debug, Clone)]
pub struct MpvEvent {
    pub raw: Value,
}

/// What the tuner cares about from the player instance.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineSignal {
    /// Audio is flowing.
    Started,
    Paused(bool),
    /// The track played to the end.
    Finished,
    Failed(String),
}

impl MpvEvent {
    pub fn as_property_change(&self) -> Option<(u64, &Value)> {
        if self.raw.get("event")?.as_str()? == "property-change" {
            let id = self.raw.get("id")?.as_u64()?;
            let data = self.raw.get("data").unwrap_or(&Value::Null);
            Some((id, data))
        } else {
            None
        }
    }

    pub fn event_name(&self) -> Option<&str> {
        self.raw.get("event")?.as_str()
    }

    /// Map a raw event onto an engine signal.  `end-file` with reason
    /// `stop` is what mpv sends when we replace or stop a file ourselves,
    /// so it is ignored.
    pub fn to_signal(&self) -> Option<EngineSignal> {
        if let Some((id, data)) = self.as_property_change() {
            return match id {
                OBS_CORE_IDLE if data.as_bool() == Some(false) => Some(EngineSignal::Started),
                OBS_PAUSE => data.as_bool().map(EngineSignal::Paused),
                _ => None,
            };
        }
        match self.event_name()? {
            "end-file" => {
                let reason = self.raw.get("reason").and_then(Value::as_str).unwrap_or("unknown");
                match reason {
                    "eof" => Some(EngineSignal::Finished),
                    "error" => {
                        let detail = self
                            .raw
                            .get("file_error")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error");
                        Some(EngineSignal::Failed(format!("playback error: {detail}")))
                    }
                    "quit" => Some(EngineSignal::Failed("mpv exited".into())),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

/// Cloneable handle to the writer task.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
}

impl MpvHandle {
    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let mut payload = serde_json::to_string(&json!({ "command": command, "request_id": req_id }))?;
        payload.push('\n');

        let (reply, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest { req_id, payload, reply })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn loadfile(&self, url: &str) -> anyhow::Result<()> {
        self.send(json!(["loadfile", url, "replace"])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        let pct = (volume * 100.0).clamp(0.0, 100.0);
        self.send(json!(["set_property", "volume", pct])).await?;
        Ok(())
    }

    pub async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.send(json!(["set_property", "pause", paused])).await?;
        Ok(())
    }

    pub async fn observe_playback(&self) {
        for (id, name) in [(OBS_CORE_IDLE, "core-idle"), (OBS_PAUSE, "pause")] {
            match self.send(json!(["observe_property", id, name])).await {
                Ok(_) => debug!("mpv: observe_property id={} name={}", id, name),
                Err(e) => warn!("mpv: observe_property {} failed: {}", name, e),
            }
        }
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        self.send(json!(["get_property", "volume"])).await?;
        Ok(())
    }
}

/// Owns one mpv child process.
pub struct MpvDriver {
    role: &'static str,
    socket_name: String,
    extra_args: Vec<String>,
    process: Option<tokio::process::Child>,
    pub last_volume: f32,
}

impl MpvDriver {
    pub fn new(role: &'static str, volume: f32) -> Self {
        Self {
            role,
            socket_name: platform::mpv_socket_name(role),
            extra_args: Vec::new(),
            process: None,
            last_volume: volume,
        }
    }

    pub fn with_args(mut self, args: &[&str]) -> Self {
        self.extra_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn process_alive(&mut self) -> bool {
        match self.process {
            Some(ref mut child) => child.try_wait().ok().flatten().is_none(),
            None => false,
        }
    }

    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
        #[cfg(unix)]
        let _ = tokio::fs::remove_file(&self.socket_name).await;
    }

    pub async fn spawn_and_connect(&mut self, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvHandle> {
        self.kill().await;

        let mpv_binary = platform::find_mpv_binary().ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;
        info!("mpv[{}]: spawning {}", self.role, mpv_binary.display());

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg("--quiet")
            .arg(platform::mpv_socket_arg(&self.socket_name))
            .arg(format!("--volume={}", (self.last_volume * 100.0).clamp(0.0, 100.0).round() as i64))
            .args(&self.extra_args)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        self.process = Some(child);

        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if let Ok(handle) = self.connect(event_tx.clone()).await {
                info!("mpv[{}]: connected to IPC", self.role);
                return Ok(handle);
            }
        }
        anyhow::bail!("mpv[{}] IPC endpoint did not appear", self.role)
    }

    #[cfg(unix)]
    async fn connect(&self, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvHandle> {
        let stream = tokio::net::UnixStream::connect(PathBuf::from(&self.socket_name)).await?;
        let (read_half, write_half) = stream.into_split();
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }

    #[cfg(windows)]
    async fn connect(&self, event_tx: mpsc::Sender<MpvEvent>) -> anyhow::Result<MpvHandle> {
        use tokio::net::windows::named_pipe::ClientOptions;
        let pipe = ClientOptions::new().open(format!(r"\\.\pipe\{}", self.socket_name))?;
        let (read_half, write_half) = tokio::io::split(pipe);
        Ok(start_io_tasks(read_half, write_half, event_tx))
    }
}

fn start_io_tasks<R, W>(read_half: R, write_half: W, event_tx: mpsc::Sender<MpvEvent>) -> MpvHandle
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);
    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    tokio::spawn(reader_task(BufReader::new(read_half), pending, event_tx));
    MpvHandle { tx: cmd_tx }
}

async fn fail_all(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

async fn reader_task<R>(mut reader: BufReader<R>, pending: PendingMap, event_tx: mpsc::Sender<MpvEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                fail_all(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(Value::as_u64) {
                    let Some(tx) = pending.lock().await.remove(&req_id) else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                        continue;
                    };
                    let result = match val["error"].as_str() {
                        Some("success") => Ok(val),
                        other => Err(anyhow::anyhow!("mpv error: {}", other.unwrap_or("unknown error"))),
                    };
                    let _ = tx.send(result);
                } else {
                    debug!("mpv reader: event {}", trimmed);
                    let _ = event_tx.send(MpvEvent { raw: val }).await;
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                fail_all(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register before writing so the reader can always match the reply.
        pending.lock().await.insert(req.req_id, req.reply);
        debug!("mpv writer: req={} {}", req.req_id, req.payload.trim());
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── track player ──────────────────────────────────────────────────────────────

struct PlayerInner {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    health: MpvHealth,
}

/// The track-playing mpv.  Spawned lazily on the first load; signals are
/// forwarded to `signal_tx`.
pub struct MpvPlayer {
    inner: Mutex<PlayerInner>,
    signal_tx: mpsc::Sender<EngineSignal>,
}

impl MpvPlayer {
    pub fn new(volume: f32, signal_tx: mpsc::Sender<EngineSignal>) -> Self {
        Self {
            inner: Mutex::new(PlayerInner {
                driver: MpvDriver::new("player", volume),
                handle: None,
                health: MpvHealth::Absent,
            }),
            signal_tx,
        }
    }

    /// Heartbeat: drop the handle if the process died or stopped answering.
    pub async fn check_alive(&self) -> MpvHealth {
        let mut inner = self.inner.lock().await;
        let Some(handle) = inner.handle.clone() else {
            return inner.health.clone();
        };
        let alive = inner.driver.process_alive() && handle.ping().await.is_ok();
        if !alive {
            warn!("mpv[player]: process died");
            inner.handle = None;
            inner.health = MpvHealth::Dead;
        }
        inner.health.clone()
    }

    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.handle = None;
        inner.driver.kill().await;
        inner.health = MpvHealth::Absent;
    }

    async fn ensure_handle(&self) -> anyhow::Result<MpvHandle> {
        let mut inner = self.inner.lock().await;
        if inner.handle.is_some() && !inner.driver.process_alive() {
            warn!("mpv[player]: process died, respawning");
            inner.handle = None;
        }
        if let Some(handle) = &inner.handle {
            return Ok(handle.clone());
        }

        let (event_tx, mut event_rx) = mpsc::channel::<MpvEvent>(64);
        let signal_tx = self.signal_tx.clone();
        tokio::spawn(async move {
            while let Some(evt) = event_rx.recv().await {
                if let Some(signal) = evt.to_signal() {
                    if signal_tx.send(signal).await.is_err() {
                        break;
                    }
                }
            }
        });

        inner.health = MpvHealth::Starting;
        let handle = match inner.driver.spawn_and_connect(event_tx).await {
            Ok(h) => h,
            Err(e) => {
                inner.health = MpvHealth::Dead;
                return Err(e);
            }
        };
        handle.observe_playback().await;
        inner.health = MpvHealth::Running;
        inner.handle = Some(handle.clone());
        Ok(handle)
    }
}

#[async_trait]
impl PlaybackEngine for MpvPlayer {
    async fn load(&self, url: &str) -> anyhow::Result<()> {
        let handle = self.ensure_handle().await?;
        let volume = self.inner.lock().await.driver.last_volume;
        handle.loadfile(url).await?;
        handle.set_pause(false).await?;
        handle.set_volume(volume).await
    }

    async fn set_pause(&self, paused: bool) -> anyhow::Result<()> {
        self.ensure_handle().await?.set_pause(paused).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let handle = self.inner.lock().await.handle.clone();
        match handle {
            Some(h) => h.stop().await,
            None => Ok(()),
        }
    }

    async fn set_volume(&self, volume: f32) -> anyhow::Result<()> {
        let handle = {
            let mut inner = self.inner.lock().await;
            inner.driver.last_volume = volume;
            inner.handle.clone()
        };
        match handle {
            Some(h) => h.set_volume(volume).await,
            None => Ok(()),
        }
    }
}

// ── interference bed ──────────────────────────────────────────────────────────

struct StaticInner {
    driver: MpvDriver,
    handle: Option<MpvHandle>,
    level: f32,
}

/// Audio subsystem backed by a second mpv looping filtered noise.
pub struct MpvAudio {
    inner: Mutex<StaticInner>,
    config: MpvConfig,
}

impl MpvAudio {
    pub fn new(config: MpvConfig) -> Self {
        let driver = MpvDriver::new("static", 0.0).with_args(&["--loop-file=inf", "--audio-display=no"]);
        Self {
            inner: Mutex::new(StaticInner {
                driver,
                handle: None,
                level: 0.0,
            }),
            config,
        }
    }

    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.handle = None;
        inner.driver.kill().await;
    }

    fn fade_steps(&self) -> usize {
        (self.config.fade_ms / FADE_STEP.as_millis() as u64).max(1) as usize
    }
}

#[async_trait]
impl AudioSubsystem for MpvAudio {
    /// A daemon has no gesture policy; audio is possible when mpv exists.
    async fn test_autoplay_capability(&self) -> bool {
        let found = platform::find_mpv_binary().is_some();
        if !found {
            warn!("mpv[static]: no mpv binary, autoplay unavailable");
        }
        found
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.ensure_audio_context().await
    }

    async fn ensure_audio_context(&self) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.handle.is_some() && inner.driver.process_alive() {
            return Ok(());
        }
        // The bed's events are of no interest.
        let (event_tx, mut event_rx) = mpsc::channel::<MpvEvent>(16);
        tokio::spawn(async move { while event_rx.recv().await.is_some() {} });

        let handle = inner.driver.spawn_and_connect(event_tx).await?;
        handle.set_volume(0.0).await?;
        handle.loadfile(STATIC_SOURCE).await?;
        inner.level = 0.0;
        inner.handle = Some(handle);
        info!("mpv[static]: interference bed running");
        Ok(())
    }

    async fn transition_to_frequency(&self, frequency: Frequency, station_present: bool) -> anyhow::Result<()> {
        let target = if station_present {
            0.0
        } else {
            static_level(frequency, self.config.interference_volume)
        };
        let (handle, from) = {
            let inner = self.inner.lock().await;
            let handle = inner
                .handle
                .clone()
                .ok_or_else(|| anyhow::anyhow!("interference bed not initialized"))?;
            (handle, inner.level)
        };
        debug!("mpv[static]: {} fade {:.2} → {:.2}", frequency, from, target);
        // The level is kept per step; an aborted fade resumes from where it stopped.
        for level in crossfade_ramp(from, target, self.fade_steps()) {
            handle.set_volume(level).await?;
            self.inner.lock().await.level = level;
            tokio::time::sleep(FADE_STEP).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(raw: Value) -> MpvEvent {
        MpvEvent { raw }
    }

    #[test]
    fn test_end_file_reasons() {
        let eof = event(json!({"event": "end-file", "reason": "eof"}));
        assert_eq!(eof.to_signal(), Some(EngineSignal::Finished));

        let stop = event(json!({"event": "end-file", "reason": "stop"}));
        assert_eq!(stop.to_signal(), None);

        let err = event(json!({"event": "end-file", "reason": "error", "file_error": "loading failed"}));
        assert_eq!(
            err.to_signal(),
            Some(EngineSignal::Failed("playback error: loading failed".into()))
        );
    }

    #[test]
    fn test_property_changes() {
        let flowing = event(json!({"event": "property-change", "id": OBS_CORE_IDLE, "data": false}));
        assert_eq!(flowing.to_signal(), Some(EngineSignal::Started));

        let idle = event(json!({"event": "property-change", "id": OBS_CORE_IDLE, "data": true}));
        assert_eq!(idle.to_signal(), None);

        let paused = event(json!({"event": "property-change", "id": OBS_PAUSE, "data": true}));
        assert_eq!(paused.to_signal(), Some(EngineSignal::Paused(true)));
    }

    #[tokio::test]
    async fn test_io_tasks_route_replies_and_events() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_r, client_w) = tokio::io::split(client);
        let (event_tx, mut event_rx) = mpsc::channel(4);
        let handle = start_io_tasks(client_r, client_w, event_tx);

        let fake_mpv = tokio::spawn(async move {
            let (server_r, mut server_w) = tokio::io::split(server);
            let mut lines = BufReader::new(server_r).lines();
            let line = lines.next_line().await.unwrap().unwrap();
            let req: Value = serde_json::from_str(&line).unwrap();
            let id = req["request_id"].as_u64().unwrap();
            server_w
                .write_all(b"{\"event\":\"end-file\",\"reason\":\"eof\"}\n")
                .await
                .unwrap();
            let reply = format!("{{\"request_id\":{id},\"error\":\"success\",\"data\":50.0}}\n");
            server_w.write_all(reply.as_bytes()).await.unwrap();
        });

        handle.ping().await.unwrap();
        let evt = event_rx.recv().await.unwrap();
        assert_eq!(evt.to_signal(), Some(EngineSignal::Finished));
        fake_mpv.await.unwrap();
    }
}
