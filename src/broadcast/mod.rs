use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

use api::response::{BroadcastStatus, HandoverRecord};

use crate::error::AppError;
use crate::result::Result;

pub mod handover;

pub fn can_transition(from: BroadcastStatus, to: BroadcastStatus) -> bool {
    use BroadcastStatus::*;
    match from {
        Scheduled => matches!(to, Live | Testing),
        Testing => matches!(to, Live | Ended),
        Live => matches!(to, Ended),
        Ended => false,
    }
}

/// On-air state of one broadcast. The ownership pointer and the
/// handover history live behind a single lock so a reader never sees
/// one updated without the other.
pub(crate) struct OnAir {
    pub status: BroadcastStatus,
    pub started_by: Option<String>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub current_dj: Option<String>,
    pub history: Vec<HandoverRecord>,
    pub listeners: u64,
    pub peak_listeners: u64,
}

pub struct Broadcast {
    pub id: String,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub(crate) state: RwLock<OnAir>,
}

impl Broadcast {
    fn new(id: String, title: String, description: String) -> Self {
        Broadcast {
            id,
            title,
            description,
            created_at: Utc::now(),
            state: RwLock::new(OnAir {
                status: BroadcastStatus::Scheduled,
                started_by: None,
                actual_start: None,
                actual_end: None,
                current_dj: None,
                history: Vec::new(),
                listeners: 0,
                peak_listeners: 0,
            }),
        }
    }

    pub fn status(&self) -> BroadcastStatus {
        self.state.read().unwrap().status
    }

    pub fn info(&self) -> api::response::Broadcast {
        let state = self.state.read().unwrap();
        api::response::Broadcast {
            id: self.id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            status: state.status,
            created_at: self.created_at,
            started_by: state.started_by.clone(),
            actual_start: state.actual_start,
            actual_end: state.actual_end,
            current_dj: state.current_dj.clone(),
            listener_count: state.listeners,
            peak_listeners: state.peak_listeners,
        }
    }
}

pub struct BroadcastRegistry {
    broadcasts: DashMap<String, Arc<Broadcast>>,
}

impl BroadcastRegistry {
    pub fn new() -> Self {
        BroadcastRegistry {
            broadcasts: DashMap::new(),
        }
    }

    pub fn create(&self, title: String, description: String) -> Arc<Broadcast> {
        let id = uuid::Uuid::new_v4().to_string();
        let broadcast = Arc::new(Broadcast::new(id.clone(), title, description));
        self.broadcasts.insert(id.clone(), broadcast.clone());
        info!("create broadcast : {}", id);
        broadcast
    }

    pub fn get(&self, id: &str) -> Result<Arc<Broadcast>> {
        self.broadcasts
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| AppError::not_found("broadcast not found"))
    }

    pub fn list(&self) -> Vec<api::response::Broadcast> {
        self.broadcasts
            .iter()
            .map(|entry| entry.info())
            .collect()
    }

    fn transition(
        &self,
        id: &str,
        to: BroadcastStatus,
        apply: impl FnOnce(&mut OnAir),
    ) -> Result<api::response::Broadcast> {
        let broadcast = self.get(id)?;
        {
            let mut state = broadcast.state.write().unwrap();
            if !can_transition(state.status, to) {
                return Err(AppError::invalid_state(format!(
                    "broadcast cannot go from {:?} to {:?}",
                    state.status, to
                )));
            }
            state.status = to;
            apply(&mut state);
        }
        info!("broadcast {} : {:?}", id, to);
        Ok(broadcast.info())
    }

    pub fn start(&self, id: &str, starter: &str) -> Result<api::response::Broadcast> {
        let starter = starter.to_string();
        self.transition(id, BroadcastStatus::Live, |state| {
            state.started_by = Some(starter);
            state.actual_start = Some(Utc::now());
        })
    }

    pub fn end(&self, id: &str) -> Result<api::response::Broadcast> {
        self.transition(id, BroadcastStatus::Ended, |state| {
            state.actual_end = Some(Utc::now());
        })
    }

    pub fn test(&self, id: &str) -> Result<api::response::Broadcast> {
        self.transition(id, BroadcastStatus::Testing, |_| {})
    }

    pub fn any_live(&self) -> bool {
        self.broadcasts
            .iter()
            .any(|entry| entry.status() == BroadcastStatus::Live)
    }

    pub fn current_live(&self) -> Option<Arc<Broadcast>> {
        self.broadcasts
            .iter()
            .find(|entry| entry.status() == BroadcastStatus::Live)
            .map(|entry| entry.clone())
    }

    /// Listener-count analytics feed from the status aggregator.
    pub fn record_listener_join(&self, id: &str) -> Result<()> {
        let broadcast = self.get(id)?;
        let mut state = broadcast.state.write().unwrap();
        state.listeners += 1;
        state.peak_listeners = state.peak_listeners.max(state.listeners);
        Ok(())
    }

    pub fn record_listener_leave(&self, id: &str) -> Result<()> {
        let broadcast = self.get(id)?;
        let mut state = broadcast.state.write().unwrap();
        state.listeners = state.listeners.saturating_sub(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_transitions() {
        use BroadcastStatus::*;
        assert!(can_transition(Scheduled, Live));
        assert!(can_transition(Scheduled, Testing));
        assert!(can_transition(Testing, Live));
        assert!(can_transition(Live, Ended));
        assert!(!can_transition(Scheduled, Ended));
        assert!(!can_transition(Live, Scheduled));
        assert!(!can_transition(Ended, Live));
    }

    #[test]
    fn test_lifecycle() {
        let registry = BroadcastRegistry::new();
        let broadcast = registry.create("morning show".to_string(), "".to_string());
        let id = broadcast.id.clone();

        assert!(!registry.any_live());
        let info = registry.start(&id, "dj.jane").unwrap();
        assert_eq!(info.status, BroadcastStatus::Live);
        assert_eq!(info.started_by.as_deref(), Some("dj.jane"));
        assert!(info.actual_start.is_some());
        assert!(registry.any_live());

        // Already live; a second start is rejected.
        assert!(matches!(
            registry.start(&id, "dj.jane"),
            Err(AppError::InvalidState(_))
        ));

        registry.end(&id).unwrap();
        assert!(!registry.any_live());
    }

    #[test]
    fn test_listener_analytics_peak() {
        let registry = BroadcastRegistry::new();
        let broadcast = registry.create("show".to_string(), "".to_string());
        let id = broadcast.id.clone();

        registry.record_listener_join(&id).unwrap();
        registry.record_listener_join(&id).unwrap();
        registry.record_listener_leave(&id).unwrap();
        registry.record_listener_join(&id).unwrap();

        let info = broadcast.info();
        assert_eq!(info.listener_count, 2);
        assert_eq!(info.peak_listeners, 2);

        assert!(registry.record_listener_join("missing").is_err());
    }
}
