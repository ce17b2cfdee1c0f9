use async_trait::async_trait;
use uuid::Uuid;

use super::{NotificationSink, NotifyError};

/// Publishes each event on `{prefix}.{event_type}`.
#[derive(Clone)]
pub struct NatsSink {
    client: async_nats::Client,
    prefix: String,
}

impl NatsSink {
    pub fn new(client: async_nats::Client, prefix: impl Into<String>) -> Self {
        Self { client, prefix: prefix.into() }
    }

    pub fn subject(&self, event_type: &str) -> String {
        format!("{}.{event_type}", self.prefix)
    }
}

#[async_trait]
impl NotificationSink for NatsSink {
    async fn emit(&self, event_type: &str, order_id: Uuid, payload: &serde_json::Value) -> Result<(), NotifyError> {
        let body = serde_json::to_vec(payload)?;
        self.client
            .publish(self.subject(event_type), body.into())
            .await
            .map_err(|e| NotifyError::Publish(e.to_string()))?;
        tracing::debug!(event_type, %order_id, "published notification");
        Ok(())
    }
}
