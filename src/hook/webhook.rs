use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use super::{Event, EventHook};

/// Pushes every bus event to one webhook URL as
/// `{"topic": ..., "payload": ...}`. Failures are logged and dropped.
#[derive(Clone, Debug)]
pub struct WebHook {
    url: String,
    client: Client,
}

impl WebHook {
    pub fn new(url: String) -> Self {
        WebHook {
            url,
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_millis(300))
                .timeout(Duration::from_millis(500))
                .build()
                .unwrap(),
        }
    }

    async fn event_handler(&self, event: Event) {
        let body = json!({
            "topic": event.topic(),
            "payload": event.payload(),
        });
        match self.client.post(&self.url).json(&body).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    debug!(url = self.url, ?status, "event webhook success");
                } else {
                    warn!(url = self.url, ?status, "event webhook error");
                }
            }
            Err(err) => {
                warn!(url = self.url, ?err, "event webhook error");
            }
        }
    }
}

#[async_trait]
impl EventHook for WebHook {
    async fn hook(&self, mut event_receiver: broadcast::Receiver<Event>) {
        loop {
            match event_receiver.recv().await {
                Ok(event) => self.event_handler(event).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(url = self.url, skipped, "event webhook lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
