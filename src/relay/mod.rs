use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::config::Stream;
use crate::error::AppError;
use crate::hook::{Event, StreamEvent, StreamEventType};
use crate::metrics;
use crate::relay::transcoder::Transcoder;
use crate::result::Result;

mod transcoder;

const CLOSE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Starting,
    Streaming,
    Closing,
    Closed,
}

struct Inner {
    state: RelayState,
    transcoder: Option<Transcoder>,
    frames: u64,
}

/// One audio ingest connection and the transcoder subprocess it owns.
/// The subprocess is never shared and never restarted; a broken
/// session requires the client to establish a fresh one.
pub struct RelaySession {
    pub id: String,
    level: AtomicU8,
    inner: Mutex<Inner>,
}

impl RelaySession {
    async fn open(id: &str, cfg: &Stream) -> Result<Self> {
        let (program, args) = cfg.transcoder_command();
        info!(
            "[{}] starting transcoder, egress {}",
            id,
            cfg.masked_egress_url()
        );
        let transcoder = Transcoder::launch(&program, &args, id)
            .await
            .map_err(|err| AppError::resource_fault(format!("transcoder launch: {}", err)))?;
        Ok(RelaySession {
            id: id.to_string(),
            level: AtomicU8::new(0),
            inner: Mutex::new(Inner {
                state: RelayState::Starting,
                transcoder: Some(transcoder),
                frames: 0,
            }),
        })
    }

    /// Forward one binary frame. Frames are written in arrival order;
    /// a dead subprocess surfaces as a fault for the caller to tear
    /// the session down.
    pub async fn write(&self, frame: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if matches!(inner.state, RelayState::Closing | RelayState::Closed) {
            return Err(AppError::resource_fault("session is not streaming"));
        }
        let transcoder = inner
            .transcoder
            .as_mut()
            .ok_or_else(|| AppError::resource_fault("transcoder gone"))?;
        transcoder
            .write(frame)
            .await
            .map_err(|err| AppError::resource_fault(format!("transcoder write: {}", err)))?;
        inner.state = RelayState::Streaming;
        inner.frames += 1;
        self.level.store(audio_level(frame), Ordering::Relaxed);
        Ok(())
    }

    /// Graceful teardown: close the subprocess input, wait out the
    /// grace period, then force-kill. Safe to call more than once;
    /// only the first caller touches the process.
    pub async fn close(&self) {
        let transcoder = {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, RelayState::Closing | RelayState::Closed) {
                return;
            }
            inner.state = RelayState::Closing;
            inner.transcoder.take()
        };
        if let Some(transcoder) = transcoder {
            transcoder.shutdown(CLOSE_GRACE).await;
        }
        self.inner.lock().await.state = RelayState::Closed;
    }

    /// Transport-error teardown: no grace period.
    pub async fn abort(&self) {
        let transcoder = {
            let mut inner = self.inner.lock().await;
            if matches!(inner.state, RelayState::Closing | RelayState::Closed) {
                return;
            }
            inner.state = RelayState::Closing;
            inner.transcoder.take()
        };
        if let Some(transcoder) = transcoder {
            transcoder.kill().await;
        }
        self.inner.lock().await.state = RelayState::Closed;
    }

    pub async fn state(&self) -> RelayState {
        self.inner.lock().await.state
    }

    pub async fn frames(&self) -> u64 {
        self.inner.lock().await.frames
    }

    pub fn level(&self) -> u8 {
        self.level.load(Ordering::Relaxed)
    }
}

/// Audio level as a 0-100 percentage: RMS over 16-bit little-endian
/// stereo PCM frames. Non-PCM input reads as noise.
pub fn audio_level(frame: &[u8]) -> u8 {
    if frame.len() < 4 {
        return 0;
    }
    let mut sum_squares: u64 = 0;
    let mut samples: u64 = 0;
    for chunk in frame.chunks_exact(4) {
        let left = i16::from_le_bytes([chunk[0], chunk[1]]) as i64;
        let right = i16::from_le_bytes([chunk[2], chunk[3]]) as i64;
        sum_squares += (left * left) as u64 + (right * right) as u64;
        samples += 2;
    }
    if samples == 0 {
        return 0;
    }
    let rms = ((sum_squares / samples) as f64).sqrt();
    ((rms / i16::MAX as f64) * 100.0).min(100.0) as u8
}

/// All active relay sessions. Removal-on-close goes through the map
/// exactly once, so concurrent teardown triggers never double-free
/// the subprocess.
pub struct RelayManager {
    cfg: Stream,
    sessions: DashMap<String, Arc<RelaySession>>,
    event_sender: broadcast::Sender<Event>,
}

impl RelayManager {
    pub fn new(cfg: Stream, event_sender: broadcast::Sender<Event>) -> Self {
        RelayManager {
            cfg,
            sessions: DashMap::new(),
            event_sender,
        }
    }

    pub async fn open(&self, session_id: &str) -> Result<Arc<RelaySession>> {
        let session = Arc::new(RelaySession::open(session_id, &self.cfg).await?);
        self.sessions.insert(session_id.to_string(), session.clone());
        metrics::RELAY_SESSIONS.set(self.sessions.len() as i64);
        info!("relay session up : {}", session_id);
        if self.sessions.len() == 1 {
            let _ = self.event_sender.send(Event::Stream(StreamEvent {
                r#type: StreamEventType::Up,
                stream: session_id.to_string(),
            }));
        }
        Ok(session)
    }

    pub async fn close(&self, session_id: &str) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            session.close().await;
            self.on_removed(session_id);
        }
    }

    pub async fn abort(&self, session_id: &str) {
        if let Some((_, session)) = self.sessions.remove(session_id) {
            warn!("relay session aborted : {}", session_id);
            session.abort().await;
            self.on_removed(session_id);
        }
    }

    fn on_removed(&self, session_id: &str) {
        metrics::RELAY_SESSIONS.set(self.sessions.len() as i64);
        info!("relay session down : {}", session_id);
        if self.sessions.is_empty() {
            let _ = self.event_sender.send(Event::Stream(StreamEvent {
                r#type: StreamEventType::Down,
                stream: session_id.to_string(),
            }));
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Loudest level over the active sessions, for the status surface.
    pub fn peak_level(&self) -> u8 {
        self.sessions
            .iter()
            .map(|entry| entry.level())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cat_config() -> Stream {
        let mut cfg = Stream::default();
        cfg.command = Some("cat".to_string());
        cfg
    }

    #[tokio::test]
    async fn test_session_close_is_idempotent() {
        let (event_sender, _) = broadcast::channel(4);
        let manager = RelayManager::new(cat_config(), event_sender);

        let session = manager.open("s1").await.unwrap();
        assert_eq!(session.state().await, RelayState::Starting);
        assert_eq!(manager.active_count(), 1);

        session.write(b"aaaa").await.unwrap();
        session.write(b"bbbb").await.unwrap();
        assert_eq!(session.state().await, RelayState::Streaming);
        assert_eq!(session.frames().await, 2);
        assert!(session.level() > 0);
        assert_eq!(manager.peak_level(), session.level());

        session.close().await;
        assert_eq!(session.state().await, RelayState::Closed);
        // Second close is a no-op, not a double-terminate.
        session.close().await;
        session.abort().await;
        assert_eq!(session.state().await, RelayState::Closed);

        assert!(session.write(b"cccc").await.is_err());

        manager.close("s1").await;
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn test_manager_emits_stream_events() {
        let (event_sender, mut events) = broadcast::channel(8);
        let manager = RelayManager::new(cat_config(), event_sender);

        manager.open("s1").await.unwrap();
        manager.open("s2").await.unwrap();
        manager.close("s1").await;
        manager.close("s2").await;
        // Closing an unknown session is harmless.
        manager.close("s2").await;

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let Event::Stream(stream_event) = event {
                seen.push(stream_event.r#type);
            }
        }
        // Up on first open, Down on last close, nothing in between.
        assert_eq!(seen, vec![StreamEventType::Up, StreamEventType::Down]);
    }

    #[tokio::test]
    async fn test_launch_failure_registers_nothing() {
        let (event_sender, _) = broadcast::channel(4);
        let mut cfg = Stream::default();
        cfg.command = Some("definitely-not-a-real-binary".to_string());
        let manager = RelayManager::new(cfg, event_sender);

        assert!(matches!(
            manager.open("s1").await,
            Err(AppError::ResourceFault(_))
        ));
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn test_audio_level() {
        assert_eq!(audio_level(&[]), 0);
        assert_eq!(audio_level(&[0, 0, 0, 0]), 0);

        // Full-scale square wave reads near 100.
        let loud: Vec<u8> = std::iter::repeat([0xff_u8, 0x7f, 0xff, 0x7f])
            .take(64)
            .flatten()
            .collect();
        assert!(audio_level(&loud) >= 99);

        let quiet: Vec<u8> = std::iter::repeat([0x10_u8, 0x00, 0x10, 0x00])
            .take(64)
            .flatten()
            .collect();
        assert!(audio_level(&quiet) < 5);
    }
}
