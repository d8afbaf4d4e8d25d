use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use api::event::Health;
use api::response::StreamStatus;

use crate::config::Stream;
use crate::relay::RelayManager;

/// Listener and bitrate figures for the configured mount, as reported
/// by the streaming server.
#[derive(Debug, Clone, Default)]
pub struct MountStats {
    pub listeners: u64,
    pub bitrate: Option<u64>,
}

/// Read-only view of the streaming server. Egress success is never
/// observed directly; liveness is inferred from local relay activity
/// and the server's status document.
pub struct StreamMonitor {
    cfg: Stream,
    client: reqwest::Client,
    relays: Arc<RelayManager>,
}

impl StreamMonitor {
    pub fn new(cfg: Stream, relays: Arc<RelayManager>) -> Self {
        let timeout = Duration::from_secs(cfg.status_timeout.max(1));
        StreamMonitor {
            cfg,
            client: reqwest::Client::builder()
                .connect_timeout(timeout)
                .timeout(timeout)
                .build()
                .unwrap(),
            relays,
        }
    }

    pub async fn is_server_up(&self) -> bool {
        match self.client.get(self.cfg.base_url()).send().await {
            Ok(response) => response.status().as_u16() < 400,
            Err(err) => {
                warn!("streaming server unreachable: {}", err);
                false
            }
        }
    }

    pub async fn mount_stats(&self) -> Option<MountStats> {
        let response = match self.client.get(self.cfg.status_url()).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                warn!("status document fetch failed: {}", response.status());
                return None;
            }
            Err(err) => {
                warn!("status document fetch failed: {}", err);
                return None;
            }
        };
        match response.text().await {
            Ok(body) => parse_mount_stats(&body, &self.cfg.mount),
            Err(err) => {
                warn!("status document read failed: {}", err);
                None
            }
        }
    }

    /// A local relay session short-circuits; otherwise ask the server
    /// whether the mount is up.
    pub async fn is_stream_live(&self) -> bool {
        self.relays.active_count() > 0 || self.mount_stats().await.is_some()
    }

    pub async fn listener_count(&self) -> u64 {
        self.mount_stats().await.map(|stats| stats.listeners).unwrap_or(0)
    }

    pub async fn status(&self, connected_listeners: usize, active_listeners: usize) -> StreamStatus {
        let server_up = self.is_server_up().await;
        let live = self.is_stream_live().await;
        let server = if server_up { "UP" } else { "DOWN" };
        let active_sessions = self.relays.active_count();
        StreamStatus {
            live,
            server: server.to_string(),
            stream_url: self.cfg.stream_url(),
            icecast_reachable: server_up,
            active_sessions,
            connected_listeners,
            active_listeners,
            audio_level: (active_sessions > 0).then(|| self.relays.peak_level()),
        }
    }

    pub async fn health(&self) -> Health {
        let server_up = self.is_server_up().await;
        let stats = self.mount_stats().await;
        Health {
            healthy: server_up && (self.relays.active_count() == 0 || stats.is_some()),
            server_reachable: server_up,
            bitrate: stats.and_then(|stats| stats.bitrate),
        }
    }
}

/// Pick the configured mount out of an icecast `status-json.xsl`
/// document. `source` is an object for a single mount and an array
/// when several are up.
pub(crate) fn parse_mount_stats(body: &str, mount: &str) -> Option<MountStats> {
    let doc: Value = serde_json::from_str(body).ok()?;
    let source = doc.get("icestats")?.get("source")?;
    let sources: Vec<&Value> = match source {
        Value::Array(entries) => entries.iter().collect(),
        Value::Object(_) => vec![source],
        _ => return None,
    };
    sources.into_iter().find_map(|entry| {
        let matches_mount = entry
            .get("listenurl")
            .and_then(Value::as_str)
            .map(|url| url.ends_with(mount))
            .or_else(|| {
                entry
                    .get("mount")
                    .and_then(Value::as_str)
                    .map(|m| m == mount)
            })
            .unwrap_or(false);
        if !matches_mount {
            return None;
        }
        Some(MountStats {
            listeners: entry.get("listeners").and_then(Value::as_u64).unwrap_or(0),
            bitrate: entry.get("bitrate").and_then(Value::as_u64).or_else(|| {
                entry
                    .get("audio_info")
                    .and_then(Value::as_str)
                    .and_then(parse_audio_info_bitrate)
            }),
        })
    })
}

fn parse_audio_info_bitrate(audio_info: &str) -> Option<u64> {
    audio_info.split(';').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        match key.trim() {
            "bitrate" | "ice-bitrate" => value.trim().parse().ok(),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATUS_SINGLE: &str = r#"{
        "icestats": {
            "host": "radio.example.org",
            "source": {
                "listenurl": "http://radio.example.org:8000/live.ogg",
                "listeners": 12,
                "bitrate": 128,
                "server_type": "application/ogg"
            }
        }
    }"#;

    const STATUS_MULTI: &str = r#"{
        "icestats": {
            "source": [
                {
                    "listenurl": "http://radio.example.org:8000/other",
                    "listeners": 3
                },
                {
                    "listenurl": "http://radio.example.org:8000/live.ogg",
                    "listeners": 7,
                    "audio_info": "channels=2;samplerate=48000;bitrate=128"
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_single_source() {
        let stats = parse_mount_stats(STATUS_SINGLE, "/live.ogg").unwrap();
        assert_eq!(stats.listeners, 12);
        assert_eq!(stats.bitrate, Some(128));
    }

    #[test]
    fn test_parse_source_array() {
        let stats = parse_mount_stats(STATUS_MULTI, "/live.ogg").unwrap();
        assert_eq!(stats.listeners, 7);
        assert_eq!(stats.bitrate, Some(128));
    }

    #[test]
    fn test_mount_absent() {
        assert!(parse_mount_stats(STATUS_SINGLE, "/nope.ogg").is_none());
        assert!(parse_mount_stats("{}", "/live.ogg").is_none());
        assert!(parse_mount_stats("not json", "/live.ogg").is_none());
        // No sources at all: the server is idle.
        assert!(parse_mount_stats(r#"{"icestats":{}}"#, "/live.ogg").is_none());
    }
}
