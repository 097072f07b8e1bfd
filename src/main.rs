use anyhow::Context;
use axum::extract::{State, WebSocketUpgrade};
use axum::http::Method;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

mod app;
mod chat;
mod game;
mod protocol;
mod shared;
mod transport;
mod users;

use app::App;
use chat::ChatStore;
use game::map::MapIndex;
use game::riddle::source::{HttpRiddleSource, StaticRiddleSource};
use game::riddle::{RiddleConfig, RiddleEngine};
use transport::ws_session::handle_socket;
use users::UserRegistry;

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let map = Arc::new(MapIndex::embedded().context("failed to load embedded map")?);
    let users = Arc::new(UserRegistry::new());
    let chat = Arc::new(ChatStore::new());
    let riddle = Arc::new(RiddleEngine::new(riddle_config_from_env()));

    let app_state = Arc::new(App::new(users, chat, Arc::clone(&riddle), map));

    // Riddle state changes fan out ahead of the next tick so winners and new
    // rounds are visible immediately.
    let broadcast_app = Arc::clone(&app_state);
    riddle.on_state_change(move |state| {
        let frame = protocol::encode_message(protocol::MSG_TREASURE_HUNT_STATE, &state);
        broadcast_app.broadcast_all_rooms(&frame);
    });
    match HttpRiddleSource::from_env() {
        Some(source) => riddle.spawn(source),
        None => {
            tracing::warn!("RIDDLE_API_KEY not set, serving built-in riddles");
            riddle.spawn(StaticRiddleSource::new());
        }
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);
    let router: Router = Router::new()
        .route("/api/health", get(health))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(app_state);

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8080);
    let address = format!("0.0.0.0:{port}");
    tracing::info!("listening on {address}");

    let listener = tokio::net::TcpListener::bind(&address).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(OkResponse { ok: true })
}

async fn ws_handler(ws: WebSocketUpgrade, State(app): State<Arc<App>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, app))
}

fn riddle_config_from_env() -> RiddleConfig {
    let defaults = RiddleConfig::default();
    RiddleConfig {
        active_duration: env_duration_secs("RIDDLE_ACTIVE_SECS", defaults.active_duration),
        hint_offset: env_duration_secs("RIDDLE_HINT_OFFSET_SECS", defaults.hint_offset),
        cooldown_duration: env_duration_secs("RIDDLE_COOLDOWN_SECS", defaults.cooldown_duration),
        win_freeze_duration: env_duration_secs(
            "RIDDLE_WIN_FREEZE_SECS",
            defaults.win_freeze_duration,
        ),
        max_rounds_per_day: env::var("RIDDLE_MAX_ROUNDS")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(defaults.max_rounds_per_day),
    }
}

fn env_duration_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
