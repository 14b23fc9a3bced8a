use crate::core::TunerEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tuner_core::autoplay::InteractionKind;
use tuner_core::frequency::{MAX_MHZ, MIN_MHZ};
use tuner_core::model::NewStation;
use tuner_core::protocol::{Command, TunerState};
use tuner_core::state::StateManager;

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<TunerEvent>,
}

#[derive(Deserialize)]
struct InteractBody {
    #[serde(default = "default_interaction")]
    kind: InteractionKind,
}

fn default_interaction() -> InteractionKind {
    InteractionKind::Click
}

pub fn router(state_manager: Arc<StateManager>, event_tx: mpsc::Sender<TunerEvent>) -> Router {
    let app_state = HttpState { state_manager, event_tx };
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/tune/:freq", post(tune))
        .route("/api/scan/:direction", post(scan))
        .route("/api/play", post(play))
        .route("/api/pause", post(toggle_pause))
        .route("/api/stop", post(stop))
        .route("/api/next", post(next_track))
        .route("/api/prev", post(prev_track))
        .route("/api/interact", post(interact))
        .route("/api/clear-error", post(clear_error))
        .route("/api/refresh", post(refresh))
        .route("/api/stations", post(create_station))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<TunerEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(state_manager, event_tx);
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };
        info!("HTTP API server listening on http://{}", addr);
        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn send(state: &HttpState, cmd: Command) -> StatusCode {
    info!("HTTP API: {:?}", cmd);
    if state.event_tx.send(TunerEvent::ClientCommand(cmd)).await.is_err() {
        error!("HTTP API: core is gone");
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::ACCEPTED
}

async fn get_state(State(state): State<HttpState>) -> Json<TunerState> {
    Json(state.state_manager.get_state().await)
}

async fn tune(State(state): State<HttpState>, Path(freq): Path<f64>) -> StatusCode {
    if !(MIN_MHZ..=MAX_MHZ).contains(&freq) {
        return StatusCode::UNPROCESSABLE_ENTITY;
    }
    send(&state, Command::Tune { frequency: freq }).await
}

async fn scan(State(state): State<HttpState>, Path(direction): Path<String>) -> StatusCode {
    let cmd = match direction.as_str() {
        "up" => Command::Scan { direction: tuner_core::frequency::Direction::Up },
        "down" => Command::Scan { direction: tuner_core::frequency::Direction::Down },
        "stop" => Command::StopScan,
        _ => return StatusCode::NOT_FOUND,
    };
    send(&state, cmd).await
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Play).await
}

async fn toggle_pause(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::TogglePause).await
}

async fn stop(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Stop).await
}

async fn next_track(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Next).await
}

async fn prev_track(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::Prev).await
}

async fn interact(State(state): State<HttpState>, body: Option<Json<InteractBody>>) -> StatusCode {
    let kind = body.map(|Json(b)| b.kind).unwrap_or_else(default_interaction);
    send(&state, Command::Interact { kind }).await
}

async fn clear_error(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::ClearError).await
}

async fn refresh(State(state): State<HttpState>) -> StatusCode {
    send(&state, Command::RefreshStations).await
}

async fn create_station(State(state): State<HttpState>, Json(station): Json<NewStation>) -> StatusCode {
    send(&state, Command::CreateStation { station }).await
}
