// src/tracking/events.rs
//! Stage-change notifications.
//! Delivery is at-least-once and best-effort; subscribers reconcile by
//! re-reading the persisted stage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, RwLock};

/// `(errorCode, cause)` of a run that ended in Fail
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureMarker {
    pub code: String,
    pub cause: String,
}

/// Published after every checkpoint, and once more when a run fails
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageChanged {
    pub video_id: String,
    pub stage: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureMarker>,
}

impl StageChanged {
    pub fn new(video_id: &str, stage: i32) -> Self {
        Self {
            video_id: video_id.to_string(),
            stage,
            error: None,
        }
    }

    pub fn with_error(mut self, code: &str, cause: &str) -> Self {
        self.error = Some(FailureMarker {
            code: code.to_string(),
            cause: cause.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, Error)]
pub enum PublishError {
    #[error("event delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &StageChanged) -> Result<(), PublishError>;
}

/// A live subscription to one run's stage changes
pub struct Subscription {
    pub id: u64,
    pub video_id: String,
    pub receiver: mpsc::UnboundedReceiver<StageChanged>,
}

/// In-process live channel, keyed by videoId (backs the websocket feed)
#[derive(Default)]
pub struct EventHub {
    subscribers: RwLock<HashMap<String, Vec<(u64, mpsc::UnboundedSender<StageChanged>)>>>,
    next_id: AtomicU64,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, video_id: &str) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .write()
            .await
            .entry(video_id.to_string())
            .or_default()
            .push((id, sender));
        tracing::info!("📡 Registered stage subscriber {} for run: {}", id, video_id);
        Subscription {
            id,
            video_id: video_id.to_string(),
            receiver,
        }
    }

    pub async fn unsubscribe(&self, video_id: &str, id: u64) {
        let mut subscribers = self.subscribers.write().await;
        if let Some(senders) = subscribers.get_mut(video_id) {
            senders.retain(|(sender_id, _)| *sender_id != id);
            if senders.is_empty() {
                subscribers.remove(video_id);
            }
        }
        tracing::info!("📡 Unregistered stage subscriber {} for run: {}", id, video_id);
    }

    pub async fn subscriber_count(&self, video_id: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(video_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventPublisher for EventHub {
    async fn publish(&self, event: &StageChanged) -> Result<(), PublishError> {
        let mut subscribers = self.subscribers.write().await;
        let Some(senders) = subscribers.get_mut(&event.video_id) else {
            tracing::debug!("No live subscribers for run {}, stage {} not pushed", event.video_id, event.stage);
            return Ok(());
        };

        // Closed receivers are dropped here
        senders.retain(|(_, sender)| sender.send(event.clone()).is_ok());
        tracing::info!(
            "📤 Pushed stage {} for run {} to {} subscriber(s)",
            event.stage,
            event.video_id,
            senders.len()
        );
        if senders.is_empty() {
            subscribers.remove(&event.video_id);
        }
        Ok(())
    }
}

/// POSTs each notification to an external listener
pub struct WebhookPublisher {
    client: Client,
    url: String,
    backoff: ExponentialBackoff,
}

impl WebhookPublisher {
    pub fn new(url: &str) -> Self {
        Self {
            client: Client::new(),
            url: url.to_string(),
            backoff: ExponentialBackoff {
                initial_interval: Duration::from_millis(500),
                max_interval: Duration::from_secs(5),
                max_elapsed_time: Some(Duration::from_secs(30)),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl EventPublisher for WebhookPublisher {
    async fn publish(&self, event: &StageChanged) -> Result<(), PublishError> {
        let operation = || async {
            let response = self
                .client
                .post(&self.url)
                .timeout(Duration::from_secs(10))
                .json(event)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(format!("webhook unreachable: {}", e)))?;

            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                return Err(backoff::Error::transient(format!("webhook returned {}", status)));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(format!("webhook returned {}", status)));
            }
            Ok(())
        };

        retry(self.backoff.clone(), operation)
            .await
            .map_err(PublishError::Delivery)
    }
}

/// Publishes to every inner publisher; one failing does not stop the others
#[derive(Default)]
pub struct FanoutPublisher {
    publishers: Vec<Arc<dyn EventPublisher>>,
}

impl FanoutPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publishers.push(publisher);
        self
    }
}

#[async_trait]
impl EventPublisher for FanoutPublisher {
    async fn publish(&self, event: &StageChanged) -> Result<(), PublishError> {
        let mut first_error = None;
        for publisher in &self.publishers {
            if let Err(e) = publisher.publish(event).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
