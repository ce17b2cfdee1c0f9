//! Domain events, published after the transaction that raised them commits.
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{OrderStatus, ReturnStatus};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommerceEvent {
    OrderCreated { order_id: Uuid, order_number: String, total: Decimal, currency: String, email: String },
    OrderStatusChanged { order_id: Uuid, from: OrderStatus, to: OrderStatus, note: String },
    PaymentCompleted { order_id: Uuid, intent_id: String, amount: Decimal },
    PaymentFailed { order_id: Uuid, intent_id: String, reason: String },
    PaymentRefunded { order_id: Uuid, amount: Decimal, total_refunded: Decimal },
    ReturnRequested { order_id: Uuid, return_id: Uuid, return_number: String, refund_amount: Decimal },
    ReturnStatusChanged { order_id: Uuid, return_id: Uuid, from: ReturnStatus, to: ReturnStatus },
}

impl CommerceEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => "order.created",
            Self::OrderStatusChanged { .. } => "order.status_changed",
            Self::PaymentCompleted { .. } => "payment.completed",
            Self::PaymentFailed { .. } => "payment.failed",
            Self::PaymentRefunded { .. } => "payment.refunded",
            Self::ReturnRequested { .. } => "return.requested",
            Self::ReturnStatusChanged { .. } => "return.status_changed",
        }
    }

    pub fn order_id(&self) -> Uuid {
        match self {
            Self::OrderCreated { order_id, .. }
            | Self::OrderStatusChanged { order_id, .. }
            | Self::PaymentCompleted { order_id, .. }
            | Self::PaymentFailed { order_id, .. }
            | Self::PaymentRefunded { order_id, .. }
            | Self::ReturnRequested { order_id, .. }
            | Self::ReturnStatusChanged { order_id, .. } => *order_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let event = CommerceEvent::OrderStatusChanged {
            order_id: Uuid::nil(),
            from: OrderStatus::Pending,
            to: OrderStatus::Paid,
            note: "Payment confirmed".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order_status_changed");
        assert_eq!(json["to"], "paid");
        assert_eq!(event.event_type(), "order.status_changed");
    }
}
