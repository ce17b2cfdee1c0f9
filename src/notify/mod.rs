//! Outbound notifications.
//!
//! Services hand committed events to an [`EventPublisher`], which never
//! blocks: a full queue drops the event with a warning. A dispatcher task
//! drains the queue into a [`NotificationSink`]; sink failures are logged
//! and never reach the state transition that raised the event.

mod nats;

pub use nats::NatsSink;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::events::CommerceEvent;

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("publish failed: {0}")]
    Publish(String),
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn emit(&self, event_type: &str, order_id: Uuid, payload: &serde_json::Value) -> Result<(), NotifyError>;
}

/// Writes events to the log; the default when no broker is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn emit(&self, event_type: &str, order_id: Uuid, payload: &serde_json::Value) -> Result<(), NotifyError> {
        tracing::info!(event_type, %order_id, %payload, "notification");
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct EventPublisher {
    queue: mpsc::Sender<CommerceEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<CommerceEvent>) {
        let (queue, rx) = mpsc::channel(capacity.max(1));
        (Self { queue }, rx)
    }

    pub fn publish(&self, event: CommerceEvent) {
        if let Err(err) = self.queue.try_send(event) {
            let event = match &err {
                mpsc::error::TrySendError::Full(e) | mpsc::error::TrySendError::Closed(e) => e,
            };
            tracing::warn!(event_type = event.event_type(), order_id = %event.order_id(), "notification dropped: {err}");
        }
    }
}

pub fn spawn_dispatcher(mut rx: mpsc::Receiver<CommerceEvent>, sink: Arc<dyn NotificationSink>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let event_type = event.event_type();
            let order_id = event.order_id();
            let delivered = match serde_json::to_value(&event) {
                Ok(payload) => sink.emit(event_type, order_id, &payload).await,
                Err(err) => Err(err.into()),
            };
            if let Err(err) = delivered {
                tracing::warn!(event_type, %order_id, error = %err, "notification delivery failed");
            }
        }
        tracing::debug!("notification queue closed");
    })
}
