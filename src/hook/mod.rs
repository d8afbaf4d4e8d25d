use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use api::event::{CurrentDjEvent, HandoverEvent, StatusSnapshot};

pub mod webhook;

/// Everything published on the outbound event bus. Delivery is
/// best-effort; senders ignore the result and subscribers that lag
/// simply miss events.
#[derive(Clone, Debug)]
pub enum Event {
    Handover(HandoverEvent),
    CurrentDj(CurrentDjEvent),
    Status(StatusSnapshot),
    Stream(StreamEvent),
}

#[derive(Clone, Debug)]
pub struct StreamEvent {
    pub r#type: StreamEventType,
    pub stream: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEventType {
    Up,
    Down,
}

impl Event {
    pub fn topic(&self) -> String {
        match self {
            Event::Handover(event) => format!("/topic/broadcast/{}/handover", event.broadcast_id),
            Event::CurrentDj(event) => {
                format!("/topic/broadcast/{}/current-dj", event.broadcast_id)
            }
            Event::Status(_) => "/topic/listener-status".to_string(),
            Event::Stream(_) => "/topic/stream".to_string(),
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Event::Handover(event) => serde_json::to_value(event).unwrap_or_default(),
            Event::CurrentDj(event) => serde_json::to_value(event).unwrap_or_default(),
            Event::Status(snapshot) => serde_json::to_value(snapshot).unwrap_or_default(),
            Event::Stream(event) => json!({
                "type": match event.r#type {
                    StreamEventType::Up => "STREAM_UP",
                    StreamEventType::Down => "STREAM_DOWN",
                },
                "stream": event.stream,
            }),
        }
    }
}

#[async_trait]
pub trait EventHook {
    async fn hook(&self, event_receiver: broadcast::Receiver<Event>);
}
