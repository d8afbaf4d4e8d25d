use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};

use auth::claims::Claims;

use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::BROADCASTS, post(create).get(list))
        .route(&api::path::broadcast("{id}"), get(info))
        .route(&api::path::broadcast_start("{id}"), post(start))
        .route(&api::path::broadcast_end("{id}"), post(end))
        .route(&api::path::broadcast_test("{id}"), post(test))
        .route(&api::path::handover("{id}"), post(initiate_handover))
        .route(&api::path::handovers("{id}"), get(handover_history))
        .route(&api::path::current_dj("{id}"), get(current_dj))
}

async fn create(
    State(state): State<AppState>,
    Json(req): Json<api::request::CreateBroadcast>,
) -> crate::result::Result<Json<api::response::Broadcast>> {
    if req.title.trim().is_empty() {
        return Err(crate::error::AppError::validation("title is required"));
    }
    let broadcast = state.broadcasts.create(req.title, req.description);
    Ok(Json(broadcast.info()))
}

async fn list(
    State(state): State<AppState>,
) -> crate::result::Result<Json<Vec<api::response::Broadcast>>> {
    Ok(Json(state.broadcasts.list()))
}

async fn info(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> crate::result::Result<Json<api::response::Broadcast>> {
    Ok(Json(state.broadcasts.get(&id)?.info()))
}

async fn start(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> crate::result::Result<Json<api::response::Broadcast>> {
    Ok(Json(state.broadcasts.start(&id, &claims.sub)?))
}

async fn end(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> crate::result::Result<Json<api::response::Broadcast>> {
    Ok(Json(state.broadcasts.end(&id)?))
}

async fn test(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> crate::result::Result<Json<api::response::Broadcast>> {
    Ok(Json(state.broadcasts.test(&id)?))
}

async fn initiate_handover(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<api::request::Handover>,
) -> crate::result::Result<Json<api::response::HandoverRecord>> {
    let record = state
        .handover
        .initiate(&id, &req.new_dj, &claims.sub, claims.role, req.reason)?;
    Ok(Json(record))
}

async fn handover_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> crate::result::Result<Json<Vec<api::response::HandoverRecord>>> {
    Ok(Json(state.handover.history(&id)?))
}

async fn current_dj(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> crate::result::Result<Json<api::response::CurrentDj>> {
    Ok(Json(api::response::CurrentDj {
        username: state.handover.current_active_dj(&id)?,
    }))
}
