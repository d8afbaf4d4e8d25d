use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use api::event::{StatusSnapshot, STATUS_KIND};

use crate::broadcast::BroadcastRegistry;
use crate::hook::Event;
use crate::metrics;
use crate::monitor::StreamMonitor;

#[derive(Debug, Clone)]
pub struct ListenerSession {
    pub username: Option<String>,
    pub broadcast_id: Option<String>,
    pub playing: bool,
}

/// Registry of connected listener sessions plus the periodic status
/// broadcast. Sessions are only removed on an explicit stop or an
/// observed disconnect; a heartbeat is a liveness log, not a lease.
pub struct ListenerAggregator {
    sessions: DashMap<String, ListenerSession>,
    broadcasts: Arc<BroadcastRegistry>,
    monitor: Arc<StreamMonitor>,
    event_sender: broadcast::Sender<Event>,
    status_sender: broadcast::Sender<String>,
    interval: Duration,
}

impl ListenerAggregator {
    pub fn new(
        broadcasts: Arc<BroadcastRegistry>,
        monitor: Arc<StreamMonitor>,
        event_sender: broadcast::Sender<Event>,
        interval: Duration,
    ) -> Self {
        let (status_sender, _) = broadcast::channel(16);
        ListenerAggregator {
            sessions: DashMap::new(),
            broadcasts,
            monitor,
            event_sender,
            status_sender,
            interval,
        }
    }

    /// Serialized snapshots pushed to every listener socket.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.status_sender.subscribe()
    }

    pub fn on_start(
        &self,
        session_id: &str,
        username: Option<String>,
        broadcast_id: Option<String>,
    ) {
        if let Some(id) = &broadcast_id {
            if let Err(err) = self.broadcasts.record_listener_join(id) {
                warn!("listener join signal for broadcast {} failed: {:?}", id, err);
            }
        }
        info!(
            "listener started : {} (user: {})",
            session_id,
            username.as_deref().unwrap_or("anonymous")
        );
        self.sessions.insert(
            session_id.to_string(),
            ListenerSession {
                username,
                broadcast_id,
                playing: true,
            },
        );
        metrics::LISTENER_SESSIONS.set(self.sessions.len() as i64);
    }

    pub fn on_stop(&self, session_id: &str) {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return;
        };
        if let Some(id) = &session.broadcast_id {
            if let Err(err) = self.broadcasts.record_listener_leave(id) {
                warn!("listener leave signal for broadcast {} failed: {:?}", id, err);
            }
        }
        info!(
            "listener stopped : {} (user: {})",
            session_id,
            session.username.as_deref().unwrap_or("anonymous")
        );
        metrics::LISTENER_SESSIONS.set(self.sessions.len() as i64);
    }

    pub fn on_player_status(&self, session_id: &str, playing: bool) {
        if let Some(mut session) = self.sessions.get_mut(session_id) {
            session.playing = playing;
            debug!("player status for {} : playing={}", session_id, playing);
        }
    }

    pub fn on_heartbeat(&self, session_id: &str) {
        if self.sessions.contains_key(session_id) {
            debug!("heartbeat from listener : {}", session_id);
        }
    }

    pub fn connected_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn active_count(&self) -> usize {
        self.sessions.iter().filter(|entry| entry.playing).count()
    }

    pub async fn build_snapshot(&self) -> StatusSnapshot {
        let live_broadcast = self.broadcasts.current_live();
        let is_live = live_broadcast.is_some() || self.monitor.is_stream_live().await;

        // Locally tracked players win; fall back to the streaming
        // server's own count when nobody reports through us.
        let mut listener_count = self.active_count() as u64;
        if listener_count == 0 {
            listener_count = self.monitor.listener_count().await;
        }

        let (broadcast_id, peak) = match &live_broadcast {
            Some(broadcast) => {
                let info = broadcast.info();
                (Some(broadcast.id.clone()), Some(info.peak_listeners))
            }
            None => (None, None),
        };

        StatusSnapshot {
            kind: STATUS_KIND.to_string(),
            is_live,
            listener_count,
            peak_listener_count: peak,
            broadcast_id,
            health: Some(self.monitor.health().await),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Compute one snapshot and publish it to sockets and the event
    /// bus. Publish failures are logged and dropped.
    pub async fn broadcast_status(&self) {
        let snapshot = self.build_snapshot().await;
        match serde_json::to_string(&snapshot) {
            Ok(json) => {
                let _ = self.status_sender.send(json);
            }
            Err(err) => warn!("status snapshot serialize failed: {}", err),
        }
        let _ = self.event_sender.send(Event::Status(snapshot));
    }

    /// Periodic broadcast loop; also re-emits immediately whenever a
    /// stream goes up or down.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut events = self.event_sender.subscribe();
        loop {
            let emit = tokio::select! {
                _ = ticker.tick() => {
                    // Idle skip: nobody connected and nothing on air.
                    !(self.sessions.is_empty() && !self.broadcasts.any_live())
                }
                event = events.recv() => match event {
                    Ok(Event::Stream(_)) => true,
                    Ok(_) => false,
                    Err(broadcast::error::RecvError::Lagged(_)) => false,
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            if emit {
                self.broadcast_status().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Stream;
    use crate::relay::RelayManager;

    fn aggregator() -> (Arc<ListenerAggregator>, Arc<BroadcastRegistry>) {
        let (event_sender, _) = broadcast::channel(16);
        let broadcasts = Arc::new(BroadcastRegistry::new());
        let relays = Arc::new(RelayManager::new(Stream::default(), event_sender.clone()));
        let monitor = Arc::new(StreamMonitor::new(Stream::default(), relays));
        let aggregator = Arc::new(ListenerAggregator::new(
            broadcasts.clone(),
            monitor,
            event_sender,
            Duration::from_secs(5),
        ));
        (aggregator, broadcasts)
    }

    #[test]
    fn test_start_stop_counts() {
        let (aggregator, _) = aggregator();
        assert_eq!(aggregator.connected_count(), 0);

        aggregator.on_start("s1", Some("jane".to_string()), None);
        aggregator.on_start("s2", None, None);
        assert_eq!(aggregator.connected_count(), 2);
        assert_eq!(aggregator.active_count(), 2);

        aggregator.on_player_status("s2", false);
        assert_eq!(aggregator.active_count(), 1);
        // Unknown session: no-op.
        aggregator.on_player_status("nope", true);
        aggregator.on_heartbeat("nope");

        aggregator.on_stop("s1");
        aggregator.on_stop("s1");
        assert_eq!(aggregator.connected_count(), 1);

        aggregator.on_stop("s2");
        assert_eq!(aggregator.connected_count(), 0);
    }

    #[test]
    fn test_join_leave_signals_feed_broadcast_analytics() {
        let (aggregator, broadcasts) = aggregator();
        let broadcast = broadcasts.create("show".to_string(), "".to_string());

        aggregator.on_start("s1", None, Some(broadcast.id.clone()));
        aggregator.on_start("s2", None, Some(broadcast.id.clone()));
        aggregator.on_stop("s1");

        let info = broadcast.info();
        assert_eq!(info.listener_count, 1);
        assert_eq!(info.peak_listeners, 2);

        // A bogus broadcast id is logged, never fatal.
        aggregator.on_start("s3", None, Some("missing".to_string()));
        assert_eq!(aggregator.connected_count(), 2);
    }
}
