//! Payment Aggregate

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::order::PaymentStatus;
use crate::error::CommerceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card payments through Stripe.
    Stripe,
    Paypal,
    BankTransfer,
    CashOnDelivery,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::Paypal => "paypal",
            Self::BankTransfer => "bank_transfer",
            Self::CashOnDelivery => "cash_on_delivery",
        }
    }

    /// Settled out of band and captured manually by staff.
    pub fn is_offline(self) -> bool { matches!(self, Self::BankTransfer | Self::CashOnDelivery) }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentMethod {
    type Err = CommerceError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" | "card" => Ok(Self::Stripe),
            "paypal" => Ok(Self::Paypal),
            "bank_transfer" => Ok(Self::BankTransfer),
            "cash_on_delivery" | "cod" => Ok(Self::CashOnDelivery),
            other => Err(CommerceError::invalid("payment_method", format!("unknown payment method {other:?}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub currency: String,
    /// Gateway-assigned intent id; unique, the reconciliation key.
    pub intent_id: String,
    /// Handed back when the open intent is requested again; never serialised.
    #[serde(skip_serializing, default)]
    pub client_secret: Option<String>,
    pub charge_id: Option<String>,
    pub refund_amount: Decimal,
    pub refund_reason: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl Payment {
    pub fn pending(order_id: Uuid, method: PaymentMethod, amount: Decimal, currency: &str, intent_id: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(), order_id, method, status: PaymentStatus::Pending, amount,
            currency: currency.to_string(), intent_id, client_secret: None, charge_id: None, refund_amount: Decimal::ZERO,
            refund_reason: None, failure_reason: None, created_at: now, updated_at: now,
            completed_at: None, refunded_at: None,
        }
    }

    /// Still waiting on the gateway.
    pub fn is_open(&self) -> bool {
        matches!(self.status, PaymentStatus::Pending | PaymentStatus::Processing)
    }

    pub fn refundable(&self) -> Decimal {
        match self.status {
            PaymentStatus::Completed => (self.amount - self.refund_amount).max(Decimal::ZERO),
            _ => Decimal::ZERO,
        }
    }

    fn advance(&mut self, next: PaymentStatus, now: DateTime<Utc>) -> Result<(), CommerceError> {
        if !self.status.can_transition_to(next) {
            return Err(CommerceError::transition("payment", self.status, next));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> Result<(), CommerceError> {
        if self.status == PaymentStatus::Processing {
            return Ok(());
        }
        self.advance(PaymentStatus::Processing, now)
    }

    pub fn complete(&mut self, charge_id: Option<String>, now: DateTime<Utc>) -> Result<(), CommerceError> {
        self.mark_processing(now)?;
        self.advance(PaymentStatus::Completed, now)?;
        self.charge_id = charge_id.or_else(|| self.charge_id.take());
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn fail(&mut self, reason: String, now: DateTime<Utc>) -> Result<(), CommerceError> {
        self.mark_processing(now)?;
        self.advance(PaymentStatus::Failed, now)?;
        self.failure_reason = Some(reason);
        Ok(())
    }

    /// Adds `amount` to the cumulative refund; flips to `refunded` once the
    /// whole captured amount has been returned.
    pub fn record_refund(&mut self, amount: Decimal, reason: Option<String>, now: DateTime<Utc>) -> Result<(), CommerceError> {
        if amount <= Decimal::ZERO {
            return Err(CommerceError::invalid("amount", "refund amount must be positive"));
        }
        if amount > self.refundable() {
            return Err(CommerceError::invalid("amount", format!("refund {amount} exceeds refundable {}", self.refundable())));
        }
        self.refund_amount += amount;
        if reason.is_some() {
            self.refund_reason = reason;
        }
        self.updated_at = now;
        if self.refund_amount >= self.amount {
            self.advance(PaymentStatus::Refunded, now)?;
            self.refunded_at = Some(now);
        }
        Ok(())
    }
}

/// One gateway refund, kept as a ledger under its payment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PaymentRefund {
    pub id: Uuid,
    pub payment_id: Uuid,
    pub gateway_refund_id: String,
    pub amount: Decimal,
    pub reason: Option<String>,
    pub return_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
