use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::middleware;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tower_http::validate_request::ValidateRequestHeaderLayer;
use tracing::{info_span, Level};

use crate::broadcast::handover::HandoverCoordinator;
use crate::broadcast::BroadcastRegistry;
use crate::config::Config;
use crate::hook::webhook::WebHook;
use crate::hook::EventHook;
use crate::limit::RateLimiter;
use crate::listener::ListenerAggregator;
use crate::monitor::StreamMonitor;
use crate::relay::RelayManager;
use crate::route::AppState;
use crate::user::UserDirectory;

pub mod config;
pub mod log;

mod admission;
mod broadcast;
mod error;
mod hook;
mod limit;
mod listener;
mod metrics;
mod monitor;
mod relay;
mod result;
mod route;
mod user;

const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn serve<F>(cfg: Config, listener: TcpListener, signal: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let (event_sender, _) = tokio::sync::broadcast::channel(16);

    let users = Arc::new(UserDirectory::new());
    let broadcasts = Arc::new(BroadcastRegistry::new());
    let handover = Arc::new(HandoverCoordinator::new(
        broadcasts.clone(),
        users.clone(),
        event_sender.clone(),
    ));
    let limiter = Arc::new(RateLimiter::new(cfg.ratelimit.clone()));
    let relays = Arc::new(RelayManager::new(cfg.stream.clone(), event_sender.clone()));
    let monitor = Arc::new(StreamMonitor::new(cfg.stream.clone(), relays.clone()));
    let listeners = Arc::new(ListenerAggregator::new(
        broadcasts.clone(),
        monitor.clone(),
        event_sender.clone(),
        Duration::from_secs(cfg.status.interval),
    ));

    for webhook_url in cfg.webhook.webhooks.iter() {
        let webhook = WebHook::new(webhook_url.clone());
        let recv = event_sender.subscribe();
        tokio::spawn(async move {
            webhook.hook(recv).await;
        });
    }

    tokio::spawn(listeners.clone().run());

    {
        let limiter = limiter.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(LIMITER_SWEEP_INTERVAL).await;
                limiter.sweep_idle();
            }
        });
    }

    let app_state = AppState {
        config: cfg.clone(),
        broadcasts,
        handover,
        users,
        relays,
        listeners,
        monitor,
        limiter,
    };

    let auth_layer = ValidateRequestHeaderLayer::custom(auth::ManyValidate::new(
        cfg.auth.secret,
        cfg.auth.tokens,
    ));

    let app = Router::new()
        .merge(
            route::broadcast::route()
                .merge(route::user::route())
                .layer(auth_layer),
        )
        .merge(route::stream::route())
        .merge(route::auth::route())
        .merge(route::live::route())
        .merge(route::listener::route())
        .route(api::path::METRICS, get(metrics))
        .with_state(app_state.clone())
        .layer(middleware::from_fn_with_state(
            app_state,
            admission::rate_limit_middleware,
        ))
        .layer(if cfg.http.cors {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        })
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    info_span!(
                        "http_request",
                        uri = ?request.uri(),
                        method = ?request.method(),
                    )
                })
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO))
                .on_failure(tower_http::trace::DefaultOnFailure::new().level(Level::INFO)),
        );

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(signal)
    .await
    .unwrap();
}

async fn metrics() -> String {
    metrics::ENCODER
        .encode_to_string(&metrics::REGISTRY.gather())
        .unwrap_or_default()
}
