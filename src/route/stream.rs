use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new().route(api::path::STREAM_STATUS, get(status))
}

async fn status(
    State(state): State<AppState>,
) -> crate::result::Result<Json<api::response::StreamStatus>> {
    let status = state
        .monitor
        .status(
            state.listeners.connected_count(),
            state.listeners.active_count(),
        )
        .await;
    Ok(Json(status))
}
