//! Payment bridge port.
//!
//! Every gateway implements [`PaymentGateway`]; the [`GatewayRegistry`] picks
//! one per payment method and runs each call under the configured timeout.
//! Gateways never touch the database.

mod offline;
mod sandbox;
mod stripe;

pub use offline::OfflineGateway;
pub use sandbox::{SandboxGateway, SandboxScript};
pub use stripe::StripeGateway;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::PaymentMethod;
use crate::domain::value_objects::Money;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("declined: {0}")]
    Declined(String),
    #[error("gateway call timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("{0} is not supported by the configured gateways")]
    Unsupported(&'static str),
    #[error("webhook signature verification failed")]
    InvalidSignature,
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

/// Authoritative state of an intent as reported by the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GatewayOutcome {
    Succeeded { charge_id: Option<String> },
    Failed { reason: String },
    Pending,
}

#[derive(Clone, Debug)]
pub struct IntentRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub amount: Money,
    pub method: PaymentMethod,
    pub customer_email: String,
    pub idempotency_key: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GatewayIntent {
    pub intent_id: String,
    pub client_secret: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RefundRequest {
    pub intent_id: String,
    pub charge_id: Option<String>,
    pub amount: Money,
    pub reason: Option<String>,
    /// Same key for a retried refund; gateways must not refund twice.
    pub idempotency_key: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GatewayRefund {
    pub refund_id: String,
}

/// A verified push notification about one intent.
#[derive(Clone, Debug, PartialEq)]
pub struct WebhookEvent {
    pub intent_id: String,
    pub outcome: GatewayOutcome,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, method: PaymentMethod) -> bool;

    async fn create_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError>;

    /// Drives the intent towards capture and reports where it ended up.
    async fn confirm(&self, intent_id: &str) -> Result<GatewayOutcome, GatewayError>;

    /// Reads the intent state without side effects.
    async fn retrieve(&self, intent_id: &str) -> Result<GatewayOutcome, GatewayError>;

    async fn refund(&self, request: &RefundRequest) -> Result<GatewayRefund, GatewayError>;

    /// Verifies and decodes a webhook. `Ok(None)` means the event is valid
    /// but irrelevant to payment state.
    fn parse_webhook(&self, _headers: &HeaderMap, _body: &[u8]) -> Result<Option<WebhookEvent>, GatewayError> {
        Err(GatewayError::Unsupported("webhooks"))
    }
}

/// Gateways by name and method, plus the timeout every outbound call runs under.
pub struct GatewayRegistry {
    gateways: Vec<Arc<dyn PaymentGateway>>,
    timeout: Duration,
}

impl GatewayRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self { gateways: Vec::new(), timeout }
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.push(gateway);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn for_method(&self, method: PaymentMethod) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways
            .iter()
            .find(|g| g.supports(method))
            .cloned()
            .ok_or(GatewayError::Unsupported(method.as_str()))
    }

    pub fn by_name(&self, name: &str) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        self.gateways
            .iter()
            .find(|g| g.name() == name)
            .cloned()
            .ok_or(GatewayError::Unsupported("gateway"))
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T, GatewayError>>) -> Result<T, GatewayError> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout),
        }
    }

    pub async fn create_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError> {
        let gateway = self.for_method(request.method)?;
        self.bounded(gateway.create_intent(request)).await
    }

    pub async fn confirm(&self, method: PaymentMethod, intent_id: &str) -> Result<GatewayOutcome, GatewayError> {
        let gateway = self.for_method(method)?;
        self.bounded(gateway.confirm(intent_id)).await
    }

    pub async fn retrieve(&self, method: PaymentMethod, intent_id: &str) -> Result<GatewayOutcome, GatewayError> {
        let gateway = self.for_method(method)?;
        self.bounded(gateway.retrieve(intent_id)).await
    }

    pub async fn refund(&self, method: PaymentMethod, request: &RefundRequest) -> Result<GatewayRefund, GatewayError> {
        let gateway = self.for_method(method)?;
        self.bounded(gateway.refund(request)).await
    }

    pub fn parse_webhook(&self, gateway: &str, headers: &HeaderMap, body: &[u8]) -> Result<Option<WebhookEvent>, GatewayError> {
        self.by_name(gateway)?.parse_webhook(headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Currency;
    use rust_decimal_macros::dec;

    fn request(method: PaymentMethod) -> IntentRequest {
        IntentRequest {
            order_id: Uuid::new_v4(),
            order_number: "ORD-20240101-000001".into(),
            amount: Money::new(dec!(30.50), &Currency::eur()),
            method,
            customer_email: "buyer@example.com".into(),
            idempotency_key: "k".into(),
        }
    }

    #[tokio::test]
    async fn routes_by_method() {
        let registry = GatewayRegistry::new(Duration::from_secs(10))
            .with(Arc::new(SandboxGateway::new()))
            .with(Arc::new(OfflineGateway::new()));
        assert_eq!(registry.for_method(PaymentMethod::Stripe).unwrap().name(), "sandbox");
        assert_eq!(registry.for_method(PaymentMethod::CashOnDelivery).unwrap().name(), "offline");

        let empty = GatewayRegistry::new(Duration::from_secs(10));
        assert!(matches!(
            empty.create_intent(&request(PaymentMethod::Paypal)).await,
            Err(GatewayError::Unsupported("paypal"))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_gateway_times_out() {
        let sandbox = Arc::new(SandboxGateway::new());
        let registry = GatewayRegistry::new(Duration::from_secs(10)).with(sandbox.clone());
        let intent = registry.create_intent(&request(PaymentMethod::Stripe)).await.unwrap();

        sandbox.script(SandboxScript::Delay(Duration::from_secs(60)));
        let result = registry.confirm(PaymentMethod::Stripe, &intent.intent_id).await;
        assert_eq!(result, Err(GatewayError::Timeout));
    }
}
