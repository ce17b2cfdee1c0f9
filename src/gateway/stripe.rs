//! Stripe PaymentIntents over the REST API.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;

use super::{GatewayError, GatewayIntent, GatewayOutcome, GatewayRefund, IntentRequest, PaymentGateway, RefundRequest, WebhookEvent};
use crate::clock::Clock;
use crate::config::StripeConfig;
use crate::domain::aggregates::PaymentMethod;
use crate::domain::value_objects::Money;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "stripe-signature";
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub struct StripeGateway {
    client: Client,
    api_base: String,
    api_key: String,
    webhook_secret: Option<String>,
    clock: Arc<dyn Clock>,
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    client_secret: Option<String>,
    status: String,
    latest_charge: Option<String>,
    last_payment_error: Option<StripeErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeRefund {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    #[serde(rename = "type")]
    kind: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeIntent,
}

fn outcome_of(intent: &StripeIntent) -> GatewayOutcome {
    match intent.status.as_str() {
        "succeeded" => GatewayOutcome::Succeeded { charge_id: intent.latest_charge.clone() },
        "canceled" => GatewayOutcome::Failed { reason: "payment canceled".to_string() },
        "requires_payment_method" => match &intent.last_payment_error {
            Some(err) => GatewayOutcome::Failed { reason: describe(err) },
            None => GatewayOutcome::Pending,
        },
        _ => GatewayOutcome::Pending,
    }
}

fn describe(err: &StripeErrorDetail) -> String {
    err.message
        .clone()
        .or_else(|| err.code.clone())
        .unwrap_or_else(|| "payment declined".to_string())
}

fn minor_units(amount: &Money) -> Result<String, GatewayError> {
    amount
        .to_minor_units()
        .map(|v| v.to_string())
        .ok_or_else(|| GatewayError::InvalidResponse(format!("amount {amount} out of range")))
}

impl StripeGateway {
    pub fn new(config: &StripeConfig, clock: Arc<dyn Clock>) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .user_agent("commerce-core")
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
            clock,
        })
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(format!("{}{path}", self.api_base)).bearer_auth(&self.api_key)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout
            } else {
                GatewayError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(|e| GatewayError::InvalidResponse(e.to_string()));
        }
        let message = response
            .json::<StripeErrorBody>()
            .await
            .map(|body| describe(&body.error))
            .unwrap_or_else(|_| status.to_string());
        match status {
            StatusCode::PAYMENT_REQUIRED => Err(GatewayError::Declined(message)),
            s if s.is_server_error() => Err(GatewayError::Transport(message)),
            _ => Err(GatewayError::InvalidResponse(message)),
        }
    }

    async fn fetch(&self, intent_id: &str) -> Result<StripeIntent, GatewayError> {
        let request = self
            .client
            .get(format!("{}/v1/payment_intents/{intent_id}", self.api_base))
            .bearer_auth(&self.api_key);
        self.send(request).await
    }

    /// Checks a `Stripe-Signature` header (`t=...,v1=...`) against the body.
    fn verify_signature(&self, secret: &str, header: &str, body: &[u8]) -> Result<(), GatewayError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", t)) => timestamp = Some(t),
                Some(("v1", sig)) => signatures.push(sig),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or(GatewayError::InvalidSignature)?;
        let issued: i64 = timestamp.parse().map_err(|_| GatewayError::InvalidSignature)?;
        if (self.clock.now().timestamp() - issued).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(GatewayError::InvalidSignature);
        }

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| GatewayError::InvalidSignature)?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        let verified = signatures.iter().any(|sig| {
            hex::decode(sig).map_or(false, |raw| mac.clone().verify_slice(&raw).is_ok())
        });
        if verified {
            Ok(())
        } else {
            Err(GatewayError::InvalidSignature)
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn name(&self) -> &'static str {
        "stripe"
    }

    fn supports(&self, method: PaymentMethod) -> bool {
        method == PaymentMethod::Stripe
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError> {
        let amount = minor_units(&request.amount)?;
        let currency = request.amount.currency().code().to_ascii_lowercase();
        let order_id = request.order_id.to_string();
        let form = [
            ("amount", amount.as_str()),
            ("currency", currency.as_str()),
            ("receipt_email", request.customer_email.as_str()),
            ("automatic_payment_methods[enabled]", "true"),
            ("metadata[order_id]", order_id.as_str()),
            ("metadata[order_number]", request.order_number.as_str()),
        ];
        let intent: StripeIntent = self
            .send(
                self.post("/v1/payment_intents")
                    .header("Idempotency-Key", &request.idempotency_key)
                    .form(&form),
            )
            .await?;
        Ok(GatewayIntent { intent_id: intent.id, client_secret: intent.client_secret })
    }

    async fn confirm(&self, intent_id: &str) -> Result<GatewayOutcome, GatewayError> {
        let mut intent = self.fetch(intent_id).await?;
        if intent.status == "requires_capture" {
            intent = self
                .send(
                    self.post(&format!("/v1/payment_intents/{intent_id}/capture"))
                        .header("Idempotency-Key", format!("capture-{intent_id}")),
                )
                .await?;
        }
        Ok(outcome_of(&intent))
    }

    async fn retrieve(&self, intent_id: &str) -> Result<GatewayOutcome, GatewayError> {
        Ok(outcome_of(&self.fetch(intent_id).await?))
    }

    async fn refund(&self, request: &RefundRequest) -> Result<GatewayRefund, GatewayError> {
        let amount = minor_units(&request.amount)?;
        let mut form = vec![
            ("payment_intent", request.intent_id.as_str()),
            ("amount", amount.as_str()),
            ("reason", "requested_by_customer"),
        ];
        if let Some(reason) = &request.reason {
            form.push(("metadata[reason]", reason.as_str()));
        }
        let refund: StripeRefund = self
            .send(
                self.post("/v1/refunds")
                    .header("Idempotency-Key", &request.idempotency_key)
                    .form(&form),
            )
            .await?;
        Ok(GatewayRefund { refund_id: refund.id })
    }

    fn parse_webhook(&self, headers: &HeaderMap, body: &[u8]) -> Result<Option<WebhookEvent>, GatewayError> {
        let secret = self.webhook_secret.as_deref().ok_or(GatewayError::Unsupported("stripe webhooks"))?;
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or(GatewayError::InvalidSignature)?;
        self.verify_signature(secret, header, body)?;

        let event: StripeEvent =
            serde_json::from_slice(body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let outcome = match event.kind.as_str() {
            "payment_intent.succeeded" | "payment_intent.payment_failed" | "payment_intent.canceled" => {
                outcome_of(&event.data.object)
            }
            _ => return Ok(None),
        };
        Ok(Some(WebhookEvent { intent_id: event.data.object.id, outcome }))
    }
}
