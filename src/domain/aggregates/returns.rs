//! Return Aggregate

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::order::OrderItem;
use crate::error::CommerceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReturnStatus { Requested, Approved, Rejected, Received, Refunded, Completed }

impl ReturnStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Received => "received",
            Self::Refunded => "refunded",
            Self::Completed => "completed",
        }
    }

    pub fn can_transition_to(self, next: ReturnStatus) -> bool {
        use ReturnStatus::*;
        matches!(
            (self, next),
            (Requested, Approved | Rejected) | (Approved, Received) | (Received, Refunded) | (Refunded, Completed)
        )
    }

    /// Goods are (or will be) back with the merchant.
    pub fn counts_against_order(self) -> bool { self != Self::Rejected }

    pub fn is_restockable(self) -> bool { matches!(self, Self::Received | Self::Refunded | Self::Completed) }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ReturnReason { Defective, WrongItem, NotAsDescribed, NoLongerNeeded, Other }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ReturnLine {
    pub order_item_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Return {
    pub id: Uuid,
    pub return_number: String,
    pub store_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub status: ReturnStatus,
    pub reason: ReturnReason,
    pub reason_details: Option<String>,
    pub rejection_reason: Option<String>,
    #[sqlx(json)]
    pub items: Vec<ReturnLine>,
    pub refund_amount: Decimal,
    /// Set while a gateway refund for this return is in flight.
    pub refund_claim: Option<Uuid>,
    pub return_carrier: Option<String>,
    pub return_tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub restocked_at: Option<DateTime<Utc>>,
}

impl Return {
    pub fn transition(&mut self, next: ReturnStatus, now: DateTime<Utc>) -> Result<ReturnStatus, CommerceError> {
        let from = self.status;
        if !from.can_transition_to(next) {
            return Err(CommerceError::transition("return", from, next));
        }
        self.status = next;
        self.updated_at = now;
        let stamp = Some(now);
        match next {
            ReturnStatus::Approved => self.approved_at = stamp,
            ReturnStatus::Rejected => self.rejected_at = stamp,
            ReturnStatus::Received => self.received_at = stamp,
            ReturnStatus::Refunded => self.refunded_at = stamp,
            ReturnStatus::Completed => self.completed_at = stamp,
            ReturnStatus::Requested => {}
        }
        Ok(from)
    }

    pub fn reject(&mut self, reason: &str, now: DateTime<Utc>) -> Result<ReturnStatus, CommerceError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CommerceError::invalid("reason", "a rejection reason is required"));
        }
        let from = self.transition(ReturnStatus::Rejected, now)?;
        self.rejection_reason = Some(reason.to_string());
        Ok(from)
    }
}

/// Validates requested lines against the order and prior returns, and
/// prices them at the snapshot unit price.
pub fn price_return_lines(lines: &[ReturnLine], order_items: &[OrderItem], prior: &[Return]) -> Result<Decimal, CommerceError> {
    if lines.is_empty() {
        return Err(CommerceError::invalid("items", "at least one item must be returned"));
    }
    let mut already: HashMap<Uuid, i32> = HashMap::new();
    for r in prior.iter().filter(|r| r.status.counts_against_order()) {
        for line in &r.items {
            let total = already.entry(line.order_item_id).or_default();
            *total = total.saturating_add(line.quantity);
        }
    }
    let too_many = || CommerceError::invalid("items", "quantity exceeds what was ordered");
    let mut requested: HashMap<Uuid, i32> = HashMap::new();
    for line in lines {
        if line.quantity < 1 {
            return Err(CommerceError::invalid("items", "quantity must be at least 1"));
        }
        let total = requested.entry(line.order_item_id).or_default();
        *total = total.checked_add(line.quantity).ok_or_else(too_many)?;
    }

    let mut refund = Decimal::ZERO;
    for (order_item_id, qty) in requested {
        let item = order_items
            .iter()
            .find(|i| i.id == order_item_id)
            .ok_or_else(|| CommerceError::invalid("items", format!("order item {order_item_id} is not part of this order")))?;
        let returned = already.get(&order_item_id).copied().unwrap_or(0);
        if qty.checked_add(returned).ok_or_else(too_many)? > item.quantity {
            return Err(CommerceError::invalid(
                "items",
                format!("{}: {qty} requested, {} ordered, {returned} already returned", item.sku, item.quantity),
            ));
        }
        refund += item.unit_price * Decimal::from(qty);
    }
    Ok(refund)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ReturnStatusHistory {
    pub id: Uuid,
    pub return_id: Uuid,
    pub seq: i32,
    pub old_status: Option<ReturnStatus>,
    pub new_status: ReturnStatus,
    pub note: String,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl ReturnStatusHistory {
    pub fn entry(return_id: Uuid, old_status: Option<ReturnStatus>, new_status: ReturnStatus, note: impl Into<String>, actor_id: Option<Uuid>, now: DateTime<Utc>) -> Self {
        Self { id: Uuid::now_v7(), return_id, seq: 0, old_status, new_status, note: note.into(), actor_id, created_at: now }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order_item(qty: i32) -> OrderItem {
        OrderItem {
            id: Uuid::new_v4(), order_id: Uuid::new_v4(), product_id: Uuid::new_v4(), variant_id: None,
            name: "Widget".into(), sku: "SKU-1".into(), quantity: qty, unit_price: dec!(10.00),
            line_total: dec!(10.00) * Decimal::from(qty), created_at: Utc::now(),
        }
    }

    fn prior_return(item: &OrderItem, qty: i32, status: ReturnStatus) -> Return {
        let now = Utc::now();
        Return {
            id: Uuid::new_v4(), return_number: "RET-1".into(), store_id: Uuid::nil(), order_id: item.order_id,
            user_id: None, status, reason: ReturnReason::Defective, reason_details: None, rejection_reason: None,
            items: vec![ReturnLine { order_item_id: item.id, quantity: qty }], refund_amount: dec!(0),
            refund_claim: None, return_carrier: None, return_tracking_number: None, created_at: now, updated_at: now,
            approved_at: None, rejected_at: None, received_at: None, refunded_at: None, completed_at: None, restocked_at: None,
        }
    }

    #[test]
    fn huge_quantities_are_rejected_not_wrapped() {
        let item = order_item(2);
        let lines = [
            ReturnLine { order_item_id: item.id, quantity: i32::MAX },
            ReturnLine { order_item_id: item.id, quantity: i32::MAX },
        ];
        let err = price_return_lines(&lines, &[item.clone()], &[]).unwrap_err();
        assert_eq!(err.kind(), "validation");

        let prior = prior_return(&item, 1, ReturnStatus::Approved);
        let lines = [ReturnLine { order_item_id: item.id, quantity: i32::MAX }];
        assert_eq!(price_return_lines(&lines, &[item], &[prior]).unwrap_err().kind(), "validation");
    }

    #[test]
    fn prices_at_snapshot_unit_price() {
        let item = order_item(2);
        let lines = [ReturnLine { order_item_id: item.id, quantity: 1 }];
        assert_eq!(price_return_lines(&lines, &[item], &[]).unwrap(), dec!(10.00));
    }

    #[test]
    fn cumulative_returns_are_bounded() {
        let item = order_item(2);
        let lines = [ReturnLine { order_item_id: item.id, quantity: 2 }];
        let prior = [prior_return(&item, 1, ReturnStatus::Approved)];
        assert!(price_return_lines(&lines, &[item.clone()], &prior).is_err());

        let rejected = [prior_return(&item, 1, ReturnStatus::Rejected)];
        assert_eq!(price_return_lines(&lines, &[item], &rejected).unwrap(), dec!(20.00));
    }

    #[test]
    fn state_machine_and_rejection_reason() {
        let item = order_item(1);
        let mut r = prior_return(&item, 1, ReturnStatus::Requested);
        assert!(r.transition(ReturnStatus::Received, Utc::now()).is_err());
        assert!(r.reject("  ", Utc::now()).is_err());
        r.reject("outside return window", Utc::now()).unwrap();
        assert_eq!(r.status, ReturnStatus::Rejected);
        assert!(r.transition(ReturnStatus::Approved, Utc::now()).is_err());
    }
}
