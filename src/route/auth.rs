use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::routing::post;
use axum::{Json, Router};
use http::HeaderMap;

use crate::admission;
use crate::error::AppError;
use crate::limit::Scope;
use crate::route::AppState;

pub fn route() -> Router<AppState> {
    Router::new().route(api::path::AUTH_VERIFY, post(verify))
}

/// Resolve a presented credential to an identity and role. Blocked
/// callers are turned away before any verification work; a failed
/// verification consumes an extra token from both auth buckets.
/// Nothing is refunded on success; a lockout ends by refill.
async fn verify(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(req): Json<api::request::VerifyCredential>,
) -> crate::result::Result<Json<api::response::VerifiedIdentity>> {
    let limiter = &state.limiter;
    let ip = admission::client_ip(
        &headers,
        Some(addr),
        state.config.ratelimit.use_x_forwarded_for,
    );
    let username_key = req.username.clone().unwrap_or_default();

    let blocked = limiter.is_exhausted(Scope::AuthIp, &ip)
        || (!username_key.is_empty() && limiter.is_exhausted(Scope::AuthUsername, &username_key));
    if blocked {
        return Err(AppError::TooManyRequests(limiter.retry_after_secs()));
    }

    match auth::verify(&req.token, &state.config.auth.secret, &state.config.auth.tokens) {
        Some(claims) => Ok(Json(api::response::VerifiedIdentity {
            username: claims.sub,
            role: claims.role,
        })),
        None => {
            limiter.try_consume(Scope::AuthIp, &ip);
            if !username_key.is_empty() {
                limiter.try_consume(Scope::AuthUsername, &username_key);
            }
            Err(AppError::permission("invalid credential"))
        }
    }
}
