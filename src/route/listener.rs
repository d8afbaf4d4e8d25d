use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use http::HeaderMap;
use tokio::sync::broadcast;
use tracing::{info, warn};

use api::request::{
    ListenerMessage, ACTION_HEARTBEAT, ACTION_PLAYER_STATUS, ACTION_START_LISTENING,
    ACTION_STOP_LISTENING,
};

use crate::admission;
use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new().route(api::path::LISTENER_WS, any(listener))
}

/// Listener status socket: anonymous connections are allowed, every
/// handshake pays the per-IP toll.
async fn listener(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> crate::result::Result<Response> {
    let ip = admission::client_ip(
        &headers,
        Some(addr),
        state.config.ratelimit.use_x_forwarded_for,
    );
    admission::check_listener_handshake(&state.limiter, &ip)?;

    let username = auth::verify_request(
        &headers,
        params.get("token").map(String::as_str),
        &state.config.auth.secret,
        &state.config.auth.tokens,
    )
    .map(|claims| claims.sub);

    Ok(ws.on_upgrade(move |socket| handle_listener(state, socket, username)))
}

async fn handle_listener(state: AppState, mut socket: WebSocket, username: Option<String>) {
    let session_id = uuid::Uuid::new_v4().to_string();
    let mut status_rx = state.listeners.subscribe();
    info!(
        "listener connection {} (user: {})",
        session_id,
        username.as_deref().unwrap_or("anonymous")
    );

    loop {
        tokio::select! {
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    handle_message(&state, &mut socket, &session_id, &username, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    state.listeners.on_stop(&session_id);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("[{}] listener transport error: {}", session_id, err);
                    state.listeners.on_stop(&session_id);
                    break;
                }
            },
            update = status_rx.recv() => match update {
                Ok(json) => {
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        state.listeners.on_stop(&session_id);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    info!("listener connection closed : {}", session_id);
}

async fn handle_message(
    state: &AppState,
    socket: &mut WebSocket,
    session_id: &str,
    username: &Option<String>,
    text: &str,
) {
    let message: ListenerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            warn!("[{}] bad listener message: {}", session_id, err);
            return;
        }
    };

    match message.action.as_str() {
        ACTION_START_LISTENING => {
            state
                .listeners
                .on_start(session_id, username.clone(), message.broadcast_id);
            // New listener gets a snapshot right away rather than
            // waiting out the broadcast interval.
            let snapshot = state.listeners.build_snapshot().await;
            if let Ok(json) = serde_json::to_string(&snapshot) {
                let _ = socket.send(Message::Text(json.into())).await;
            }
        }
        ACTION_STOP_LISTENING => state.listeners.on_stop(session_id),
        ACTION_PLAYER_STATUS => state
            .listeners
            .on_player_status(session_id, message.is_playing.unwrap_or(false)),
        ACTION_HEARTBEAT => state.listeners.on_heartbeat(session_id),
        unknown => warn!("[{}] unknown listener action: {}", session_id, unknown),
    }
}
