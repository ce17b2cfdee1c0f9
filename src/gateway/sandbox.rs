//! In-process gateway for test mode.
//!
//! Confirms succeed unless a [`SandboxScript`] says otherwise. Webhooks are
//! unsigned JSON bodies of the form
//! `{"intent_id": "...", "status": "succeeded", "charge_id": "..."}`.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use super::{GatewayError, GatewayIntent, GatewayOutcome, GatewayRefund, IntentRequest, PaymentGateway, RefundRequest, WebhookEvent};
use crate::domain::aggregates::PaymentMethod;

/// Behaviour applied to the next `confirm` call.
#[derive(Clone, Debug)]
pub enum SandboxScript {
    Decline(String),
    /// Sleep before answering; long enough delays trip the registry timeout.
    Delay(Duration),
    /// Leave the intent pending, as an asynchronous capture would.
    Pending,
    Unavailable,
}

#[derive(Debug)]
struct SandboxIntent {
    amount: Decimal,
    outcome: GatewayOutcome,
    refunded: Decimal,
}

#[derive(Debug, Default)]
struct SandboxState {
    intents: HashMap<String, SandboxIntent>,
    /// Idempotency key to the intent it opened.
    intent_keys: HashMap<String, (String, String)>,
    refunds: HashMap<String, String>,
    scripts: VecDeque<SandboxScript>,
}

#[derive(Debug, Default)]
pub struct SandboxGateway {
    state: Mutex<SandboxState>,
}

#[derive(Deserialize)]
struct SandboxWebhook {
    intent_id: String,
    #[serde(flatten)]
    outcome: GatewayOutcome,
}

impl SandboxGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SandboxState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn script(&self, script: SandboxScript) {
        self.state().scripts.push_back(script);
    }

    /// Forces the gateway-side state of an intent, as if settled out of band.
    pub fn settle(&self, intent_id: &str, outcome: GatewayOutcome) {
        if let Some(intent) = self.state().intents.get_mut(intent_id) {
            intent.outcome = outcome;
        }
    }

    pub fn refunded(&self, intent_id: &str) -> Decimal {
        self.state().intents.get(intent_id).map_or(Decimal::ZERO, |i| i.refunded)
    }

    fn outcome(&self, intent_id: &str) -> Result<GatewayOutcome, GatewayError> {
        self.state()
            .intents
            .get(intent_id)
            .map(|i| i.outcome.clone())
            .ok_or_else(|| GatewayError::InvalidResponse(format!("unknown intent {intent_id}")))
    }
}

#[async_trait]
impl PaymentGateway for SandboxGateway {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    fn supports(&self, method: PaymentMethod) -> bool {
        matches!(method, PaymentMethod::Stripe | PaymentMethod::Paypal)
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError> {
        let mut state = self.state();
        if let Some((intent_id, client_secret)) = state.intent_keys.get(&request.idempotency_key) {
            return Ok(GatewayIntent { intent_id: intent_id.clone(), client_secret: Some(client_secret.clone()) });
        }
        let intent_id = format!("sbx_pi_{}", Uuid::new_v4().simple());
        let client_secret = format!("{intent_id}_secret");
        state.intents.insert(
            intent_id.clone(),
            SandboxIntent { amount: request.amount.amount(), outcome: GatewayOutcome::Pending, refunded: Decimal::ZERO },
        );
        state
            .intent_keys
            .insert(request.idempotency_key.clone(), (intent_id.clone(), client_secret.clone()));
        Ok(GatewayIntent { intent_id, client_secret: Some(client_secret) })
    }

    async fn confirm(&self, intent_id: &str) -> Result<GatewayOutcome, GatewayError> {
        let current = self.outcome(intent_id)?;
        if current != GatewayOutcome::Pending {
            return Ok(current);
        }
        let script = self.state().scripts.pop_front();
        let outcome = match script {
            Some(SandboxScript::Decline(reason)) => GatewayOutcome::Failed { reason },
            Some(SandboxScript::Pending) => GatewayOutcome::Pending,
            Some(SandboxScript::Unavailable) => return Err(GatewayError::Transport("sandbox unavailable".into())),
            Some(SandboxScript::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                GatewayOutcome::Succeeded { charge_id: Some(format!("sbx_ch_{}", Uuid::new_v4().simple())) }
            }
            None => GatewayOutcome::Succeeded { charge_id: Some(format!("sbx_ch_{}", Uuid::new_v4().simple())) },
        };
        self.settle(intent_id, outcome.clone());
        Ok(outcome)
    }

    async fn retrieve(&self, intent_id: &str) -> Result<GatewayOutcome, GatewayError> {
        self.outcome(intent_id)
    }

    async fn refund(&self, request: &RefundRequest) -> Result<GatewayRefund, GatewayError> {
        let mut state = self.state();
        if let Some(refund_id) = state.refunds.get(&request.idempotency_key) {
            return Ok(GatewayRefund { refund_id: refund_id.clone() });
        }
        let intent = state
            .intents
            .get_mut(&request.intent_id)
            .ok_or_else(|| GatewayError::InvalidResponse(format!("unknown intent {}", request.intent_id)))?;
        if !matches!(intent.outcome, GatewayOutcome::Succeeded { .. }) {
            return Err(GatewayError::Declined("intent was not captured".into()));
        }
        if intent.refunded + request.amount.amount() > intent.amount {
            return Err(GatewayError::Declined("refund exceeds captured amount".into()));
        }
        intent.refunded += request.amount.amount();
        let refund_id = format!("sbx_re_{}", Uuid::new_v4().simple());
        state.refunds.insert(request.idempotency_key.clone(), refund_id.clone());
        Ok(GatewayRefund { refund_id })
    }

    fn parse_webhook(&self, _headers: &HeaderMap, body: &[u8]) -> Result<Option<WebhookEvent>, GatewayError> {
        let hook: SandboxWebhook =
            serde_json::from_slice(body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        if !self.state().intents.contains_key(&hook.intent_id) {
            return Err(GatewayError::InvalidSignature);
        }
        self.settle(&hook.intent_id, hook.outcome.clone());
        Ok(Some(WebhookEvent { intent_id: hook.intent_id, outcome: hook.outcome }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::{Currency, Money};
    use rust_decimal_macros::dec;

    fn intent_request() -> IntentRequest {
        IntentRequest {
            order_id: Uuid::new_v4(),
            order_number: "ORD-1".into(),
            amount: Money::new(dec!(30.50), &Currency::eur()),
            method: PaymentMethod::Stripe,
            customer_email: "buyer@example.com".into(),
            idempotency_key: "intent-1".into(),
        }
    }

    #[tokio::test]
    async fn scripted_decline_then_repeatable_outcome() {
        let gateway = SandboxGateway::new();
        let intent = gateway.create_intent(&intent_request()).await.unwrap();
        gateway.script(SandboxScript::Decline("card declined".into()));
        let first = gateway.confirm(&intent.intent_id).await.unwrap();
        assert_eq!(first, GatewayOutcome::Failed { reason: "card declined".into() });
        assert_eq!(gateway.confirm(&intent.intent_id).await.unwrap(), first);
    }

    #[tokio::test]
    async fn intent_keys_are_idempotent() {
        let gateway = SandboxGateway::new();
        let first = gateway.create_intent(&intent_request()).await.unwrap();
        let again = gateway.create_intent(&intent_request()).await.unwrap();
        assert_eq!(first, again);

        let other = IntentRequest { idempotency_key: "intent-2".into(), ..intent_request() };
        assert_ne!(gateway.create_intent(&other).await.unwrap().intent_id, first.intent_id);
    }

    #[tokio::test]
    async fn refunds_are_idempotent_and_bounded() {
        let gateway = SandboxGateway::new();
        let intent = gateway.create_intent(&intent_request()).await.unwrap();
        gateway.confirm(&intent.intent_id).await.unwrap();

        let refund = RefundRequest {
            intent_id: intent.intent_id.clone(),
            charge_id: None,
            amount: Money::new(dec!(10), &Currency::eur()),
            reason: None,
            idempotency_key: "r1".into(),
        };
        let a = gateway.refund(&refund).await.unwrap();
        let b = gateway.refund(&refund).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(gateway.refunded(&intent.intent_id), dec!(10));

        let too_much = RefundRequest { amount: Money::new(dec!(25), &Currency::eur()), idempotency_key: "r2".into(), ..refund };
        assert!(matches!(gateway.refund(&too_much).await, Err(GatewayError::Declined(_))));
    }

    #[test]
    fn webhook_for_unknown_intent_is_rejected() {
        let gateway = SandboxGateway::new();
        let body = br#"{"intent_id":"sbx_pi_unknown","status":"succeeded","charge_id":null}"#;
        assert_eq!(gateway.parse_webhook(&HeaderMap::new(), body), Err(GatewayError::InvalidSignature));
    }
}
