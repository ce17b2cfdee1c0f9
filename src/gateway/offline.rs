//! Bank transfer and cash on delivery.
//!
//! Money moves outside any gateway, so intents stay pending until staff
//! record the receipt through the capture endpoint. Refunds are paid out by
//! hand; the returned id only keys the ledger row.

use async_trait::async_trait;
use uuid::Uuid;

use super::{GatewayError, GatewayIntent, GatewayOutcome, GatewayRefund, IntentRequest, PaymentGateway, RefundRequest};
use crate::domain::aggregates::PaymentMethod;

#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineGateway;

impl OfflineGateway {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PaymentGateway for OfflineGateway {
    fn name(&self) -> &'static str {
        "offline"
    }

    fn supports(&self, method: PaymentMethod) -> bool {
        method.is_offline()
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError> {
        let prefix = match request.method {
            PaymentMethod::BankTransfer => "bt",
            _ => "cod",
        };
        Ok(GatewayIntent { intent_id: format!("{prefix}_{}", Uuid::new_v4().simple()), client_secret: None })
    }

    async fn confirm(&self, _intent_id: &str) -> Result<GatewayOutcome, GatewayError> {
        Ok(GatewayOutcome::Pending)
    }

    async fn retrieve(&self, _intent_id: &str) -> Result<GatewayOutcome, GatewayError> {
        Ok(GatewayOutcome::Pending)
    }

    async fn refund(&self, request: &RefundRequest) -> Result<GatewayRefund, GatewayError> {
        Ok(GatewayRefund { refund_id: format!("manual_{}", request.idempotency_key) })
    }
}
