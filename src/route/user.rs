use axum::extract::{Path, State};
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};

use crate::route::AppState;
use crate::user::User;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::USERS, post(upsert))
        .route(&api::path::user("{username}"), get(info))
        .layer(middleware::from_fn(auth::access::admin_middleware))
}

async fn upsert(
    State(state): State<AppState>,
    Json(req): Json<api::request::UpsertUser>,
) -> crate::result::Result<Json<api::response::User>> {
    if req.username.trim().is_empty() {
        return Err(crate::error::AppError::validation("username is required"));
    }
    let user = User {
        username: req.username.trim().to_string(),
        role: req.role,
        active: req.active,
    };
    state.users.upsert(user.clone());
    Ok(Json(api::response::User {
        username: user.username,
        role: user.role,
        active: user.active,
    }))
}

async fn info(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> crate::result::Result<Json<api::response::User>> {
    let user = state
        .users
        .get(&username)
        .ok_or_else(|| crate::error::AppError::not_found("user not found"))?;
    Ok(Json(api::response::User {
        username: user.username,
        role: user.role,
        active: user.active,
    }))
}
