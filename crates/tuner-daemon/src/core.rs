//! TunerCore: the single owner of all tuner state.
//!
//! Every external input (client commands, directory answers, player-state
//! documents, mpv signals, timers) arrives as a `TunerEvent` on one channel
//! and is handled to completion before the next one.  Slow work (station
//! lookups, interference fades) runs in spawned tasks, so an answer for a
//! frequency the dial has already left is simply dropped.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use tuner_core::audio::{AudioSubsystem, PlaybackEngine};
use tuner_core::autoplay::{AutoPlayCoordinator, InitialAction, PlayerSnapshot};
use tuner_core::config::Config;
use tuner_core::failed::FailedTracks;
use tuner_core::frequency::Direction;
use tuner_core::interference::InterferenceOrchestrator;
use tuner_core::model::{PlayerState, PlaylistItem, Station};
use tuner_core::playback::{PlaybackMachine, PlaybackStatus};
use tuner_core::player_state::{PlayerStateEvent, PlayerStateSource, SubscriptionSlot};
use tuner_core::protocol::{Command, MpvHealth, TunerState};
use tuner_core::selection::TrackSelector;
use tuner_core::signal::SignalStamp;
use tuner_core::state::StateManager;
use tuner_core::station_sync::StationSync;
use tuner_core::tuning::TuningStore;
use tuner_core::{Frequency, TunerError};

use crate::mpv::EngineSignal;
use crate::tts::TtsClient;
use crate::BroadcastMessage;

#[derive(Debug)]
pub enum TunerEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// A spawned lookup finished.
    StationResolved {
        frequency: Frequency,
        result: tuner_core::Result<Option<Station>>,
    },
    /// Another instance changed the stations.
    SyncBumped,
    PlayerState {
        station_id: String,
        event: PlayerStateEvent,
    },
    Engine(EngineSignal),
    EngineHealth(MpvHealth),
    /// Settle delay after a tune elapsed.
    AutoplayDue { frequency: Frequency },
    ScanStep,
    Shutdown,
}

/// Callback for the cross-instance signal watcher.  The send happens on its
/// own task so a busy core delays the resync instead of losing it.
pub fn forward_sync_bumps(event_tx: mpsc::Sender<TunerEvent>) -> impl Fn(SignalStamp) + Send + 'static {
    move |stamp| {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tx.send(TunerEvent::SyncBumped).await.is_err() {
                debug!("TunerCore: gone before resync from {}", stamp.origin);
            }
        });
    }
}

/// External collaborators the core drives.
pub struct Collaborators {
    pub sync: Arc<StationSync>,
    pub engine: Arc<dyn PlaybackEngine>,
    pub audio: Arc<dyn AudioSubsystem>,
    pub player_states: Arc<dyn PlayerStateSource>,
    pub tts: Option<TtsClient>,
}

#[derive(Debug, Clone, Copy)]
struct Scan {
    direction: Direction,
    /// Steps left before a full sweep of the band is done.
    remaining: usize,
}

pub struct TunerCore {
    config: Config,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
    event_tx: mpsc::Sender<TunerEvent>,

    sync: Arc<StationSync>,
    engine: Arc<dyn PlaybackEngine>,
    audio: Arc<dyn AudioSubsystem>,
    player_states: Arc<dyn PlayerStateSource>,
    tts: Option<TtsClient>,

    tuning: TuningStore,
    station: Option<Station>,
    /// Frequency whose lookup is in flight.
    resolving: Option<Frequency>,
    selector: TrackSelector,
    failed: FailedTracks,
    playback: PlaybackMachine,
    autoplay: AutoPlayCoordinator,
    interference: InterferenceOrchestrator,
    slot: SubscriptionSlot,
    player_state: Option<PlayerState>,
    scan: Option<Scan>,
    mpv_health: MpvHealth,
}

impl TunerCore {
    pub fn new(
        config: Config,
        tuning: TuningStore,
        parts: Collaborators,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<TunerEvent>,
    ) -> Self {
        let autoplay = AutoPlayCoordinator::new(Duration::from_millis(config.playback.autoplay_delay_ms));
        Self {
            config,
            state_manager: Arc::new(StateManager::new()),
            broadcast_tx,
            event_tx,
            interference: InterferenceOrchestrator::new(parts.audio.clone()),
            sync: parts.sync,
            engine: parts.engine,
            audio: parts.audio,
            player_states: parts.player_states,
            tts: parts.tts,
            tuning,
            station: None,
            resolving: None,
            selector: TrackSelector::new(),
            failed: FailedTracks::new(),
            playback: PlaybackMachine::new(),
            autoplay,
            slot: SubscriptionSlot::new(),
            player_state: None,
            scan: None,
            mpv_health: MpvHealth::Absent,
        }
    }

    pub fn state_manager(&self) -> Arc<StateManager> {
        Arc::clone(&self.state_manager)
    }

    pub async fn run(mut self, mut event_rx: mpsc::Receiver<TunerEvent>) -> anyhow::Result<()> {
        info!("TunerCore: starting event loop on {}", self.tuning.frequency());
        self.engine.set_volume(self.tuning.volume()).await.ok();
        self.resolve_current();
        self.publish().await;

        while let Some(evt) = event_rx.recv().await {
            if !self.handle_event(evt).await {
                break;
            }
        }

        self.cleanup().await;
        Ok(())
    }

    /// Returns false when the loop should stop.
    pub async fn handle_event(&mut self, evt: TunerEvent) -> bool {
        match evt {
            TunerEvent::Shutdown => {
                info!("TunerCore: shutdown requested");
                return false;
            }
            TunerEvent::ClientCommand(cmd) => {
                debug!("TunerCore: command {:?}", cmd);
                if let Err(e) = self.handle_command(cmd).await {
                    error!("TunerCore: command error: {:#}", e);
                    let _ = self.broadcast_tx.send(BroadcastMessage::Error(format!("{e:#}")));
                }
            }
            TunerEvent::StationResolved { frequency, result } => {
                self.on_station_resolved(frequency, result).await;
            }
            TunerEvent::SyncBumped => {
                info!("TunerCore: stations changed elsewhere, resyncing");
                self.sync.force_refresh().await;
                self.resolve_current();
            }
            TunerEvent::PlayerState { station_id, event } => {
                self.on_player_state(station_id, event);
            }
            TunerEvent::Engine(signal) => self.on_engine_signal(signal).await,
            TunerEvent::EngineHealth(health) => {
                if health != self.mpv_health {
                    info!("TunerCore: mpv health {:?} → {:?}", self.mpv_health, health);
                    if health.is_unhealthy() && self.playback.is_active() {
                        self.fail_current("mpv process died").await;
                    }
                    self.mpv_health = health;
                }
            }
            TunerEvent::AutoplayDue { frequency } => self.on_autoplay_due(frequency).await,
            TunerEvent::ScanStep => self.on_scan_step().await,
        }
        self.publish().await;
        true
    }

    async fn cleanup(&mut self) {
        self.autoplay.teardown();
        self.interference.halt();
        self.slot.unsubscribe();
        if let Err(e) = self.engine.stop().await {
            debug!("TunerCore: stop on shutdown: {}", e);
        }
        info!("TunerCore: stopped");
    }

    // ── tuning ────────────────────────────────────────────────────────────────

    async fn tune(&mut self, mhz: f64) -> anyhow::Result<()> {
        let frequency = match Frequency::new(mhz) {
            Ok(f) => f,
            Err(e) => {
                self.tuning.set_error(Some(e.to_string()));
                return Err(e.into());
            }
        };
        self.tune_to(frequency).await
    }

    async fn tune_to(&mut self, frequency: Frequency) -> anyhow::Result<()> {
        self.tuning.set_frequency(frequency).await?;
        self.resolve_current();
        Ok(())
    }

    /// Look up whatever is on the dial now, off the loop.
    fn resolve_current(&mut self) {
        let frequency = self.tuning.frequency();
        self.resolving = Some(frequency);
        let sync = Arc::clone(&self.sync);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = sync.resolve_frequency(frequency).await;
            let _ = tx.send(TunerEvent::StationResolved { frequency, result }).await;
        });
    }

    async fn on_station_resolved(&mut self, frequency: Frequency, result: tuner_core::Result<Option<Station>>) {
        if frequency != self.tuning.frequency() {
            debug!("TunerCore: dropping stale lookup for {}", frequency);
            return;
        }
        self.resolving = None;
        let station = match result {
            Ok(station) => {
                self.tuning.set_error(None);
                station
            }
            Err(e) => {
                self.tuning.set_error(Some(e.to_string()));
                None
            }
        };
        self.apply_station(station).await;
    }

    async fn apply_station(&mut self, station: Option<Station>) {
        let old_id = self.station.as_ref().map(|s| s.id.clone());
        let new_id = station.as_ref().map(|s| s.id.clone());

        if old_id != new_id {
            info!(
                "TunerCore: {} → {}",
                self.tuning.frequency(),
                station.as_ref().map(|s| s.name.as_str()).unwrap_or("(static)")
            );
            self.selector.reset_for_new_station();
            self.player_state = None;
            if self.playback.is_active() {
                if let Err(e) = self.engine.stop().await {
                    warn!("TunerCore: stop on station change failed: {:#}", e);
                }
                self.playback.set_idle();
            }
        }
        self.station = station;
        self.tuning
            .set_signal_strength(if self.station.is_some() { 100 } else { 0 });

        let tx = self.event_tx.clone();
        self.slot.switch_to(new_id.as_deref(), self.player_states.as_ref(), tx, |station_id, event| {
            TunerEvent::PlayerState { station_id, event }
        });

        if self.station.is_some() && self.scan.is_some() {
            info!("TunerCore: scan found a station on {}", self.tuning.frequency());
            self.stop_scan();
        }

        self.react_to_tune().await;
    }

    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            frequency: self.tuning.frequency(),
            station_present: self.station.is_some(),
            // A source left behind by a failure is not something to resume.
            track_loaded: self.selector.current().is_some()
                && self.playback.source().is_some()
                && self.playback.status() != PlaybackStatus::Error,
            is_playing: self.playback.is_active(),
        }
    }

    async fn react_to_tune(&mut self) {
        let reaction = self.autoplay.on_tuned(&self.snapshot());
        if let Some((frequency, present)) = reaction.interference {
            self.interference.transition(frequency, present);
        }
        if let Some(delay) = reaction.autoplay_after {
            let frequency = self.tuning.frequency();
            debug!("TunerCore: autoplay on {} in {:?}", frequency, delay);
            self.autoplay
                .schedule(delay, self.event_tx.clone(), TunerEvent::AutoplayDue { frequency });
        }
    }

    async fn on_autoplay_due(&mut self, frequency: Frequency) {
        if frequency != self.tuning.frequency() || self.station.is_none() || self.playback.is_active() {
            debug!("TunerCore: autoplay for {} no longer applies", frequency);
            return;
        }
        self.play_next().await;
    }

    // ── scanning ──────────────────────────────────────────────────────────────

    fn start_scan(&mut self, direction: Direction) {
        info!("TunerCore: scanning {:?} from {}", direction, self.tuning.frequency());
        self.scan = Some(Scan {
            direction,
            remaining: Frequency::band_len(),
        });
        self.tuning.set_scanning(true);
        self.schedule_scan_step();
    }

    fn stop_scan(&mut self) {
        if self.scan.take().is_some() {
            self.tuning.set_scanning(false);
        }
    }

    fn schedule_scan_step(&self) {
        let tx = self.event_tx.clone();
        let delay = Duration::from_millis(self.config.playback.scan_step_ms);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(TunerEvent::ScanStep).await;
        });
    }

    async fn on_scan_step(&mut self) {
        let Some(scan) = self.scan else {
            return;
        };
        if self.resolving.is_some() {
            self.schedule_scan_step();
            return;
        }
        if scan.remaining == 0 {
            info!("TunerCore: full sweep without a station");
            self.stop_scan();
            return;
        }
        self.scan = Some(Scan {
            remaining: scan.remaining - 1,
            ..scan
        });
        match self.tuning.step(scan.direction).await {
            Ok(_) => self.resolve_current(),
            Err(e) => {
                warn!("TunerCore: scan step failed: {}", e);
                self.stop_scan();
                return;
            }
        }
        self.schedule_scan_step();
    }

    // ── playback ──────────────────────────────────────────────────────────────

    fn playlist(&self) -> &[PlaylistItem] {
        self.station.as_ref().map(|s| s.playlist.as_slice()).unwrap_or(&[])
    }

    async fn play_next(&mut self) {
        let next = self.selector.next(self.playlist(), &self.failed).cloned();
        match next {
            Some(item) => self.play_item(item).await,
            None => info!("TunerCore: nothing playable on {}", self.tuning.frequency()),
        }
    }

    async fn play_item(&mut self, item: PlaylistItem) {
        if matches!(self.playback.status(), PlaybackStatus::Playing | PlaybackStatus::Loading) {
            self.playback.set_idle();
        }
        self.selector.select(item.clone());
        if let Err(e) = self.playback.begin_loading(item.id.clone()) {
            warn!("TunerCore: cannot load {}: {}", item.id, e);
            return;
        }
        info!("TunerCore: loading {} \"{}\"", item.id, item.title);

        let loaded = match self.source_for(&item).await {
            Ok(url) => self.engine.load(&url).await,
            Err(e) => Err(e),
        };
        match loaded {
            Ok(()) => self.publish_player_state(true).await,
            Err(e) => self.fail_current(&format!("{e:#}")).await,
        }
    }

    /// Music plays from its URL; a message plays its pre-rendered URL or
    /// freshly synthesized speech.
    async fn source_for(&self, item: &PlaylistItem) -> anyhow::Result<String> {
        if !item.url.is_empty() {
            return Ok(item.url.clone());
        }
        if !item.is_message() {
            anyhow::bail!("track {} has no URL", item.id);
        }
        let tts = self
            .tts
            .as_ref()
            .ok_or_else(|| TunerError::Playback("no speech service for DJ messages".into()))?;
        let script = item.content.as_deref().unwrap_or_default();
        let dj = self.station.as_ref().map(|s| s.dj_character_id.as_str()).unwrap_or_default();
        let path = tts.speak(&item.id, script, dj).await?;
        Ok(path.to_string_lossy().into_owned())
    }

    async fn fail_current(&mut self, message: &str) {
        if let Some(id) = self.playback.source().map(str::to_owned) {
            if self.failed.add(id.clone()) {
                info!("TunerCore: {} marked failed ({} total)", id, self.failed.len());
            }
        }
        self.playback.fail(message);
        self.publish_player_state(false).await;
    }

    async fn resume(&mut self) -> anyhow::Result<()> {
        if self.playback.status() == PlaybackStatus::Paused {
            self.playback.toggle_pause()?;
            self.engine.set_pause(false).await?;
            self.publish_player_state(true).await;
        }
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        self.engine.stop().await?;
        self.playback.set_idle();
        self.publish_player_state(false).await;
        Ok(())
    }

    async fn on_engine_signal(&mut self, signal: EngineSignal) {
        debug!("TunerCore: engine {:?} while {:?}", signal, self.playback.status());
        match signal {
            EngineSignal::Started => {
                if self.playback.status() == PlaybackStatus::Loading {
                    if let Err(e) = self.playback.started() {
                        warn!("TunerCore: {}", e);
                    }
                }
            }
            EngineSignal::Paused(paused) => {
                let status = self.playback.status();
                let out_of_step = (paused && status == PlaybackStatus::Playing)
                    || (!paused && status == PlaybackStatus::Paused);
                if out_of_step {
                    let _ = self.playback.toggle_pause();
                }
            }
            EngineSignal::Finished => {
                if !matches!(self.playback.status(), PlaybackStatus::Playing | PlaybackStatus::Paused) {
                    return;
                }
                if self.config.playback.auto_advance && self.autoplay.autoplay_ready() {
                    self.play_next().await;
                } else {
                    self.playback.set_idle();
                    self.publish_player_state(false).await;
                }
            }
            EngineSignal::Failed(message) => {
                if self.playback.is_active() {
                    self.fail_current(&message).await;
                }
            }
        }
    }

    fn on_player_state(&mut self, station_id: String, event: PlayerStateEvent) {
        if self.station.as_ref().map(|s| s.id.as_str()) != Some(station_id.as_str()) {
            debug!("TunerCore: dropping player state for {}", station_id);
            return;
        }
        match event {
            PlayerStateEvent::Loading => debug!("TunerCore: player state for {} loading", station_id),
            PlayerStateEvent::Snapshot(doc) => self.player_state = doc,
            PlayerStateEvent::Error(e) => warn!("TunerCore: player state for {}: {}", station_id, e),
        }
    }

    async fn publish_player_state(&mut self, is_playing: bool) {
        let Some(station) = &self.station else {
            return;
        };
        let doc = PlayerState {
            station_id: station.id.clone(),
            track_id: self.selector.current_id().map(str::to_owned),
            is_playing,
            updated_at: chrono::Utc::now(),
        };
        self.player_state = Some(doc.clone());
        if let Err(e) = self.player_states.publish(doc).await {
            warn!("TunerCore: publishing player state failed: {:#}", e);
        }
    }

    // ── user gestures ─────────────────────────────────────────────────────────

    async fn on_interaction(&mut self, kind: tuner_core::autoplay::InteractionKind) -> anyhow::Result<()> {
        if !self.autoplay.observe_interaction(kind) {
            return Ok(());
        }
        if !self.autoplay.initialize(self.audio.as_ref()).await? {
            return Ok(());
        }
        match self.autoplay.initial_action(&self.snapshot()) {
            InitialAction::ResumeTrack => self.resume().await?,
            InitialAction::StartInterference(frequency) => {
                self.interference.transition(frequency, false);
            }
            InitialAction::Nothing => {}
        }
        self.react_to_tune().await;
        Ok(())
    }

    /// A manual play is also what unlocks audio when autoplay was refused.
    async fn ensure_audio(&self) {
        if !self.autoplay.audio_initialized() {
            if let Err(e) = self.audio.ensure_audio_context().await {
                warn!("TunerCore: audio context unavailable: {:#}", e);
            }
        }
    }

    // ── command handlers ──────────────────────────────────────────────────────

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        match cmd {
            Command::Tune { frequency } => {
                self.stop_scan();
                self.tune(frequency).await?;
            }
            Command::SetSlider { value } => self.tuning.set_slider_value(value).await?,
            Command::Scan { direction } => self.start_scan(direction),
            Command::StopScan => self.stop_scan(),
            Command::Interact { kind } => self.on_interaction(kind).await?,
            Command::Play => {
                self.ensure_audio().await;
                match self.playback.status() {
                    PlaybackStatus::Paused => self.resume().await?,
                    PlaybackStatus::Playing | PlaybackStatus::Loading => {}
                    PlaybackStatus::Idle | PlaybackStatus::Error => {
                        let replay = self
                            .selector
                            .current()
                            .filter(|item| item.is_playable() && !self.failed.has(&item.id))
                            .cloned();
                        match replay {
                            Some(item) => self.play_item(item).await,
                            None => self.play_next().await,
                        }
                    }
                }
            }
            Command::PlayTrack { track_id } => {
                let item = self
                    .station
                    .as_ref()
                    .and_then(|s| s.find_item(&track_id))
                    .cloned()
                    .ok_or_else(|| TunerError::Playback(format!("no track {track_id} on this station")))?;
                if !item.is_playable() {
                    return Err(TunerError::Playback(format!("{track_id} has nothing to play")).into());
                }
                // Picking a failed track by hand is a retry.
                self.failed.remove(&item.id);
                self.ensure_audio().await;
                self.play_item(item).await;
            }
            Command::TogglePause => {
                let status = self.playback.toggle_pause()?;
                self.engine.set_pause(status == PlaybackStatus::Paused).await?;
                self.publish_player_state(status == PlaybackStatus::Playing).await;
            }
            Command::Stop => self.stop().await?,
            Command::Next => {
                self.ensure_audio().await;
                self.play_next().await;
            }
            Command::Prev => {
                let prev = self.selector.previous(self.playlist(), &self.failed).cloned();
                match prev {
                    Some(item) => self.play_item(item).await,
                    None => info!("TunerCore: no previous track"),
                }
            }
            Command::ClearError => self.playback.clear_error()?,
            Command::ClearFailed => {
                info!("TunerCore: clearing {} failed track(s)", self.failed.len());
                self.failed.clear();
            }
            Command::CreateStation { station } => {
                let created = self.sync.directory().create_station(station).await?;
                info!("TunerCore: created \"{}\" on {}", created.name, created.frequency);
                self.sync.force_refresh().await;
                if let Err(e) = self.sync.notify_updated().await {
                    warn!("TunerCore: could not notify other instances: {:#}", e);
                }
                self.resolve_current();
            }
            Command::RefreshStations => {
                self.sync.force_refresh().await;
                self.resolve_current();
            }
            Command::ResetTuning => {
                self.stop_scan();
                self.tuning.reset().await?;
                self.resolve_current();
            }
            Command::Volume { value } => {
                self.tuning.set_volume(value).await?;
                self.engine.set_volume(self.tuning.volume()).await?;
            }
            Command::GetState => {}
        }
        Ok(())
    }

    // ── publishing ────────────────────────────────────────────────────────────

    fn build_state(&self) -> TunerState {
        let playlist = self.playlist();
        TunerState {
            rev: 0,
            tuning: self.tuning.state().clone(),
            station: self.station.clone(),
            current_track: self.selector.current().cloned(),
            history: self.selector.history(),
            playback_status: self.playback.status(),
            error_message: self.playback.error_message().map(str::to_owned),
            failed_tracks: self.failed.ids(),
            can_go_forward: self.selector.can_go_forward(playlist, &self.failed),
            can_go_back: self.selector.can_go_back(),
            audio_initialized: self.autoplay.audio_initialized(),
            autoplay_ready: self.autoplay.autoplay_ready(),
            player_state: self.player_state.clone(),
            volume: self.tuning.volume(),
            mpv_health: self.mpv_health.clone(),
            last_sync: self.sync.last_sync(),
        }
    }

    async fn publish(&self) {
        self.state_manager.publish(self.build_state()).await;
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }
}
