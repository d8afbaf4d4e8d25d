use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use http::HeaderMap;
use serde_json::json;
use tracing::{error, info};

use crate::admission;
use crate::route::AppState;

/// WebSocket close code for a server-side fault, mirroring the 1011
/// "internal error" status.
const CLOSE_SERVER_ERROR: u16 = 1011;

/// Level feedback cadence, in frames.
const LEVEL_EVERY: u64 = 50;

pub fn route() -> Router<AppState> {
    Router::new().route(api::path::LIVE_WS, any(live))
}

/// DJ audio ingest: admission runs before the upgrade, so a rejected
/// caller never allocates a session or a subprocess.
async fn live(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> crate::result::Result<Response> {
    let claims = auth::verify_request(
        &headers,
        params.get("token").map(String::as_str),
        &state.config.auth.secret,
        &state.config.auth.tokens,
    );
    let ip = admission::client_ip(
        &headers,
        Some(addr),
        state.config.ratelimit.use_x_forwarded_for,
    );
    admission::check_live_handshake(&state.limiter, &ip, claims.as_ref())?;

    let dj = claims.map(|claims| claims.sub);
    Ok(ws.on_upgrade(move |socket| handle_live(state, socket, dj)))
}

async fn handle_live(state: AppState, mut socket: WebSocket, dj: Option<String>) {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!(
        "live ingest connection {} (dj: {})",
        session_id,
        dj.as_deref().unwrap_or("anonymous")
    );

    let session = match state.relays.open(&session_id).await {
        Ok(session) => session,
        Err(err) => {
            error!("[{}] relay open failed: {:?}", session_id, err);
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_SERVER_ERROR,
                    reason: "audio pipeline unavailable".into(),
                })))
                .await;
            return;
        }
    };

    let hello = json!({ "status": "connected", "session": session_id }).to_string();
    let _ = socket.send(Message::Text(hello.into())).await;

    loop {
        match socket.recv().await {
            Some(Ok(Message::Binary(frame))) => {
                if let Err(err) = session.write(&frame).await {
                    error!("[{}] frame forward failed: {:?}", session_id, err);
                    let _ = socket
                        .send(Message::Close(Some(CloseFrame {
                            code: CLOSE_SERVER_ERROR,
                            reason: "audio pipeline failed".into(),
                        })))
                        .await;
                    state.relays.close(&session_id).await;
                    break;
                }
                let frames = session.frames().await;
                if frames % LEVEL_EVERY == 0 {
                    let level = json!({ "type": "LEVEL", "level": session.level() });
                    let _ = socket.send(Message::Text(level.to_string().into())).await;
                }
            }
            Some(Ok(Message::Close(_))) | None => {
                state.relays.close(&session_id).await;
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                error!("[{}] transport error: {}", session_id, err);
                state.relays.abort(&session_id).await;
                break;
            }
        }
    }
    info!("live ingest connection closed : {}", session_id);
}
