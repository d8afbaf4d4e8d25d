use std::sync::Arc;

use crate::broadcast::handover::HandoverCoordinator;
use crate::broadcast::BroadcastRegistry;
use crate::config::Config;
use crate::limit::RateLimiter;
use crate::listener::ListenerAggregator;
use crate::monitor::StreamMonitor;
use crate::relay::RelayManager;
use crate::user::UserDirectory;

pub mod auth;
pub mod broadcast;
pub mod live;
pub mod listener;
pub mod stream;
pub mod user;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub broadcasts: Arc<BroadcastRegistry>,
    pub handover: Arc<HandoverCoordinator>,
    pub users: Arc<UserDirectory>,
    pub relays: Arc<RelayManager>,
    pub listeners: Arc<ListenerAggregator>,
    pub monitor: Arc<StreamMonitor>,
    pub limiter: Arc<RateLimiter>,
}
