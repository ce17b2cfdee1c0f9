//! Order Aggregate
//!
//! An order is written once at checkout. Afterwards only its status fields,
//! refund marker, tracking data and lifecycle timestamps change, and every
//! status change is mirrored by an [`OrderStatusHistory`] row.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::payment::PaymentMethod;
use crate::error::CommerceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { Pending, Paid, Processing, Shipped, Delivered, Cancelled, Refunded }

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid | Cancelled)
                | (Paid, Processing | Shipped | Cancelled | Refunded)
                | (Processing, Shipped | Cancelled | Refunded)
                | (Shipped, Delivered | Refunded)
                | (Delivered, Refunded)
        )
    }

    /// No further transitions are possible.
    pub fn is_final(self) -> bool { matches!(self, Self::Cancelled | Self::Refunded) }

    /// Goods have not left the warehouse yet.
    pub fn is_before_shipment(self) -> bool { matches!(self, Self::Pending | Self::Paid | Self::Processing) }

    pub fn is_returnable(self) -> bool { matches!(self, Self::Shipped | Self::Delivered) }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus { Pending, Processing, Completed, Failed, Refunded }

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }

    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Completed | Failed)
                | (Completed, Refunded)
        )
    }

    pub fn is_settled(self) -> bool { matches!(self, Self::Completed | Self::Failed | Self::Refunded) }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Address {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(max = 200))]
    pub company: Option<String>,
    #[validate(length(min = 1, max = 255))]
    pub street1: String,
    #[validate(length(max = 255))]
    pub street2: Option<String>,
    #[validate(length(min = 1, max = 120))]
    pub city: String,
    #[validate(length(max = 120))]
    pub state: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub zip: String,
    /// ISO 3166-1 alpha-2.
    #[validate(length(equal = 2))]
    pub country: String,
    #[validate(length(max = 40))]
    pub phone: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub store_id: Uuid,
    pub user_id: Option<Uuid>,
    pub guest_session_id: Option<String>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    /// Method chosen at checkout; the default for payment intents.
    pub payment_method: PaymentMethod,
    pub customer_email: String,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    #[sqlx(json)]
    pub shipping_address: Address,
    #[sqlx(json)]
    pub billing_address: Address,
    pub currency: String,
    pub subtotal: Decimal,
    pub shipping_total: Decimal,
    pub tax_total: Decimal,
    pub discount_total: Decimal,
    pub total: Decimal,
    /// Cumulative refunds; non-zero below `total` marks a partial refund.
    pub refunded_amount: Decimal,
    pub coupon_code: Option<String>,
    pub shipping_method: Option<String>,
    pub tracking_number: Option<String>,
    pub customer_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

/// Facts outside the order row that gate guarded transitions.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransitionFacts {
    /// At least one payment row is `completed`.
    pub has_completed_payment: bool,
    /// Sum of completed payment amounts.
    pub captured: Decimal,
    /// Caller explicitly accepts a refund below the order total.
    pub allow_partial_refund: bool,
}

impl Order {
    pub fn is_partially_refunded(&self) -> bool {
        self.refunded_amount > Decimal::ZERO && self.refunded_amount < self.total
    }

    pub fn is_fully_refunded(&self) -> bool {
        self.total > Decimal::ZERO && self.refunded_amount >= self.total
    }

    pub fn remaining_refundable(&self) -> Decimal { (self.total - self.refunded_amount).max(Decimal::ZERO) }

    /// Validates `self.status -> next` against the state machine and the
    /// payment guards, then stamps the lifecycle timestamp. Does not persist.
    pub fn transition(&mut self, next: OrderStatus, facts: TransitionFacts, now: DateTime<Utc>) -> Result<OrderStatus, CommerceError> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(CommerceError::transition("order", from, next));
        }
        match next {
            OrderStatus::Paid if !facts.has_completed_payment || facts.captured < self.total => {
                return Err(CommerceError::transition("order", from, "paid (no completed payment covers the total)"));
            }
            OrderStatus::Refunded if !self.is_fully_refunded() && !facts.allow_partial_refund => {
                return Err(CommerceError::transition("order", from, "refunded (refunds do not cover the total)"));
            }
            _ => {}
        }
        self.status = next;
        self.updated_at = now;
        match next {
            OrderStatus::Paid => self.paid_at = Some(now),
            OrderStatus::Shipped => self.shipped_at = Some(now),
            OrderStatus::Delivered => self.delivered_at = Some(now),
            OrderStatus::Cancelled => self.cancelled_at = Some(now),
            OrderStatus::Refunded => self.refunded_at = Some(now),
            OrderStatus::Pending | OrderStatus::Processing => {}
        }
        Ok(from)
    }

    /// Payment-status moves are independent of the order status machine.
    pub fn set_payment_status(&mut self, next: PaymentStatus, now: DateTime<Utc>) -> Result<(), CommerceError> {
        if self.payment_status == next {
            return Ok(());
        }
        // A failed attempt may be retried with a fresh intent.
        let retry = self.payment_status == PaymentStatus::Failed && next == PaymentStatus::Processing;
        if !retry && !self.payment_status.can_transition_to(next) {
            return Err(CommerceError::transition("order payment", self.payment_status, next));
        }
        self.payment_status = next;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub sku: String,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct OrderStatusHistory {
    pub id: Uuid,
    pub order_id: Uuid,
    /// Per-order sequence, assigned by the store on append.
    pub seq: i32,
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub note: String,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl OrderStatusHistory {
    pub fn entry(order_id: Uuid, old_status: Option<OrderStatus>, new_status: OrderStatus, note: impl Into<String>, actor_id: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self { id: Uuid::now_v7(), order_id, seq: 0, old_status, new_status, note: note.into(), actor_id, created_at: now }
    }
}

/// Readers must sort, not trust insertion order.
pub fn sort_history(entries: &mut [OrderStatusHistory]) {
    entries.sort_by_key(|e| (e.created_at, e.seq));
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use rust_decimal_macros::dec;

    pub fn order(status: OrderStatus) -> Order {
        let now = Utc::now();
        Order {
            id: Uuid::new_v4(), order_number: "ORD-20240101-000001".into(), store_id: Uuid::nil(),
            user_id: Some(Uuid::new_v4()), guest_session_id: None, status, payment_status: PaymentStatus::Pending,
            payment_method: PaymentMethod::Stripe, customer_email: "buyer@example.com".into(), customer_name: "Buyer".into(), customer_phone: None,
            shipping_address: Address::default(), billing_address: Address::default(), currency: "EUR".into(),
            subtotal: dec!(20.00), shipping_total: dec!(5.00), tax_total: dec!(5.50), discount_total: dec!(0),
            total: dec!(30.50), refunded_amount: dec!(0), coupon_code: None, shipping_method: Some("standard".into()),
            tracking_number: None, customer_notes: None, created_at: now, updated_at: now,
            paid_at: None, shipped_at: None, delivered_at: None, cancelled_at: None, refunded_at: None,
        }
    }
}
