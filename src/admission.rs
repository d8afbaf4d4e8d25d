use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http::HeaderMap;

use auth::claims::Claims;

use api::response::Role;

use crate::error::AppError;
use crate::limit::{RateLimiter, Scope};
use crate::metrics;
use crate::result::Result;
use crate::route::AppState;

/// Rate-limit gate for the plain HTTP surface. Auth paths consume the
/// per-IP auth bucket and then, when a username is present, the
/// per-username bucket, short-circuiting on the first failure so one
/// request is never charged twice for the same rejection.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let limiter = &state.limiter;
    let path = request.uri().path();
    if !limiter.enabled() || !path.starts_with("/api/") {
        return next.run(request).await;
    }

    let ip = client_ip(
        request.headers(),
        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0),
        state.config.ratelimit.use_x_forwarded_for,
    );

    if path.starts_with("/api/auth/") {
        if !limiter.try_consume(Scope::AuthIp, &ip) {
            return too_many(limiter);
        }
        if let Some(username) = header_username(request.headers()) {
            if !limiter.try_consume(Scope::AuthUsername, &username) {
                return too_many(limiter);
            }
        }
    } else if !limiter.try_consume(Scope::ApiIp, &ip) {
        return too_many(limiter);
    }

    next.run(request).await
}

fn too_many(limiter: &RateLimiter) -> Response {
    metrics::RATE_LIMITED.inc();
    AppError::TooManyRequests(limiter.retry_after_secs()).into_response()
}

fn header_username(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-auth-username")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|username| !username.is_empty())
        .map(String::from)
}

/// Handshake gate for the DJ ingest socket. A verified DJ bypasses
/// the per-IP bucket entirely; every other caller, anonymous or not,
/// pays per IP.
pub fn check_live_handshake(
    limiter: &RateLimiter,
    ip: &str,
    claims: Option<&Claims>,
) -> Result<()> {
    if claims.map(|claims| claims.role == Role::Dj).unwrap_or(false) {
        return Ok(());
    }
    check_listener_handshake(limiter, ip)
}

pub fn check_listener_handshake(limiter: &RateLimiter, ip: &str) -> Result<()> {
    if limiter.try_consume(Scope::WsHandshakeIp, ip) {
        Ok(())
    } else {
        metrics::RATE_LIMITED.inc();
        Err(AppError::TooManyRequests(limiter.retry_after_secs()))
    }
}

/// Client address for bucket keying, honoring the first hop in
/// X-Forwarded-For when the deployment fronts us with a proxy.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, use_x_forwarded_for: bool) -> String {
    if use_x_forwarded_for {
        if let Some(forwarded) = headers
            .get("x-forwarded-for")
            .and_then(|value| value.to_str().ok())
        {
            if let Some(first) = forwarded.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "192.0.2.1:9999".parse().unwrap();

        assert_eq!(client_ip(&headers, Some(peer), true), "203.0.113.7");
        assert_eq!(client_ip(&headers, Some(peer), false), "192.0.2.1");
        assert_eq!(client_ip(&HeaderMap::new(), Some(peer), true), "192.0.2.1");
        assert_eq!(client_ip(&HeaderMap::new(), None, true), "unknown");
    }

    #[test]
    fn test_dj_bypasses_handshake_bucket() {
        let mut cfg = crate::config::RateLimit::default();
        cfg.ws_handshake_per_minute = 1;
        let limiter = RateLimiter::new(cfg);

        let dj = Claims {
            sub: "dj.jane".to_string(),
            role: Role::Dj,
            exp: 0,
        };
        let fan = Claims {
            sub: "fan".to_string(),
            role: Role::Listener,
            exp: 0,
        };

        for _ in 0..5 {
            assert!(check_live_handshake(&limiter, "10.0.0.1", Some(&dj)).is_ok());
        }
        // Non-DJ and anonymous callers share the per-IP bucket.
        assert!(check_live_handshake(&limiter, "10.0.0.1", Some(&fan)).is_ok());
        assert!(matches!(
            check_live_handshake(&limiter, "10.0.0.1", None),
            Err(AppError::TooManyRequests(_))
        ));
    }
}
