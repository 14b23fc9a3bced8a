mod core;
mod http;
mod mpv;
mod remote;
mod socket;
mod store;
mod tts;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use tuner_core::audio::{AudioSubsystem, PlaybackEngine};
use tuner_core::config::Config;
use tuner_core::player_state::PlayerStateSource;
use tuner_core::signal::FileSignal;
use tuner_core::station_sync::{StationDirectory, StationSync};
use tuner_core::tuning::TuningStore;

use crate::core::{forward_sync_bumps, Collaborators, TunerCore, TunerEvent};

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    Log(String),
    Error(String),
}

/// Forwards WARN and ERROR events to connected clients.
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }
        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        event.record(&mut MessageVisitor(&mut message));
        // No receivers is fine.
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = tuner_core::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("tunerd.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(log_file).with_ansi(false))
        .with(BroadcastLayer {
            sender: broadcast_tx.clone(),
        })
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,tuner_daemon=debug,tuner_core=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);
    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let (event_tx, event_rx) = mpsc::channel::<TunerEvent>(256);
    let shutdown = CancellationToken::new();

    // Stations: remote directory if configured, else the shared local store.
    let directory: Arc<dyn StationDirectory> = match &config.stations.directory_url {
        Some(url) => {
            info!("Stations from {}", url);
            Arc::new(remote::HttpStationDirectory::new(url)?)
        }
        None => Arc::new(
            store::FileStationStore::open(config.stations.store_file.clone(), &config.stations.stations_toml)
                .await?,
        ),
    };
    let signal = Arc::new(FileSignal::new(config.daemon.signal_file.clone()));
    info!("Instance origin {}", signal.origin());
    let sync = Arc::new(StationSync::new(directory, config.sync.policy()).with_signal(signal.clone()));

    let poll = Duration::from_millis(config.sync.signal_poll_ms);
    let _watcher = signal.watch(
        poll,
        shutdown.child_token(),
        forward_sync_bumps(event_tx.clone()),
    );

    // Audio: one mpv for tracks, one for the static bed.
    let (signal_tx, mut signal_rx) = mpsc::channel(64);
    let player = Arc::new(mpv::MpvPlayer::new(config.mpv.default_volume, signal_tx));
    let bed = Arc::new(mpv::MpvAudio::new(config.mpv.clone()));
    let engine_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(signal) = signal_rx.recv().await {
            if engine_tx.send(TunerEvent::Engine(signal)).await.is_err() {
                break;
            }
        }
    });

    let heartbeat_player = player.clone();
    let heartbeat_tx = event_tx.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(10)).await;
            let health = heartbeat_player.check_alive().await;
            if heartbeat_tx.send(TunerEvent::EngineHealth(health)).await.is_err() {
                break;
            }
        }
    });

    let player_states: Arc<dyn PlayerStateSource> = Arc::new(store::FilePlayerStates::new(
        data_dir.join("player_state"),
        poll,
    ));
    let tts = match tts::TtsClient::new(&config.tts, tuner_core::platform::speech_dir()) {
        Ok(client) => Some(client),
        Err(e) => {
            warn!("TTS unavailable: {}", e);
            None
        }
    };

    let parts = Collaborators {
        sync,
        engine: player.clone() as Arc<dyn PlaybackEngine>,
        audio: bed.clone() as Arc<dyn AudioSubsystem>,
        player_states,
        tts,
    };
    let tuning = TuningStore::new(config.daemon.tuning_file.clone());
    let tuner = TunerCore::new(config.clone(), tuning, parts, broadcast_tx.clone(), event_tx.clone());
    let state_manager = tuner.state_manager();

    let _socket_handle = socket::start_server(
        config.http.bind_address.clone(),
        tuner_core::platform::DAEMON_TCP_PORT,
        state_manager.clone(),
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            state_manager.clone(),
            event_tx.clone(),
        );
    }

    let ctrl_c_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = ctrl_c_tx.send(TunerEvent::Shutdown).await;
        }
    });

    info!("Tuner initialised, running event loop");
    tuner.run(event_rx).await?;

    shutdown.cancel();
    player.shutdown().await;
    bed.shutdown().await;
    Ok(())
}
