use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::{group_deltas, transition_facts, transition_order, Deps, LockedCatalog, PaymentBridge, StockMove};
use crate::auth::Principal;
use crate::domain::aggregates::order::sort_history;
use crate::domain::aggregates::{
    InventoryReason, Order, OrderItem, OrderStatus, OrderStatusHistory, Payment, PaymentRefund,
};
use crate::error::{CommerceError, Result};
use crate::store::{Lock, Tx};

/// Order with everything a customer or operator needs to see alongside it.
#[derive(Clone, Debug, Serialize)]
pub struct OrderDetails {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub payments: Vec<Payment>,
    pub refunds: Vec<PaymentRefund>,
    pub history: Vec<OrderStatusHistory>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct UpdateOrderStatus {
    pub status: OrderStatus,
    #[validate(length(max = 1000))]
    pub note: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub tracking_number: Option<String>,
    /// Accept `refunded` although refunds do not cover the total.
    #[serde(default)]
    pub allow_partial_refund: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct CancelOutcome {
    pub order: Order,
    pub refunded: Decimal,
    /// Set when the order was cancelled but the refund must be retried.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_error: Option<String>,
}

#[derive(Clone)]
pub struct OrderService {
    deps: Deps,
    payments: PaymentBridge,
}

impl OrderService {
    pub fn new(deps: Deps, payments: PaymentBridge) -> Self {
        Self { deps, payments }
    }

    #[instrument(name = "orders.get", skip_all, fields(%store_id, %order_id))]
    pub async fn get(&self, principal: &Principal, store_id: Uuid, order_id: Uuid) -> Result<OrderDetails> {
        let mut tx = self.deps.store.begin().await?;
        let order = visible_order(&mut *tx, principal, store_id, order_id, Lock::Shared).await?;
        let items = tx.order_items(order.id).await?;
        let payments = tx.payments_for_order(order.id, Lock::Shared).await?;
        let refunds = tx.refunds_for_order(order.id).await?;
        let mut history = tx.order_history(order.id).await?;
        sort_history(&mut history);
        Ok(OrderDetails { order, items, payments, refunds, history })
    }

    #[instrument(name = "orders.history", skip_all, fields(%store_id, %order_id))]
    pub async fn history(&self, principal: &Principal, store_id: Uuid, order_id: Uuid) -> Result<Vec<OrderStatusHistory>> {
        let mut tx = self.deps.store.begin().await?;
        let order = visible_order(&mut *tx, principal, store_id, order_id, Lock::Shared).await?;
        let mut history = tx.order_history(order.id).await?;
        sort_history(&mut history);
        Ok(history)
    }

    /// Operator-driven status change. Cancellation takes the cancel path so
    /// stock comes back and captured money is refunded.
    #[instrument(name = "orders.update_status", skip_all, fields(%store_id, %order_id, status = %input.status))]
    pub async fn update_status(&self, principal: &Principal, store_id: Uuid, order_id: Uuid, input: UpdateOrderStatus) -> Result<Order> {
        principal.require_admin()?;
        input.validate()?;
        let note = input.note.clone().unwrap_or_default();
        if input.status == OrderStatus::Cancelled {
            return self.cancel(principal, store_id, order_id, input.note.as_deref()).await.map(|o| o.order);
        }
        let now = self.deps.clock.now();

        let mut tx = self.deps.store.begin().await?;
        let mut order = visible_order(&mut *tx, principal, store_id, order_id, Lock::Exclusive).await?;
        let payments = tx.payments_for_order(order.id, Lock::Shared).await?;
        if input.status == OrderStatus::Shipped {
            if let Some(tracking) = &input.tracking_number {
                order.tracking_number = Some(tracking.trim().to_string());
            }
        }
        let note = if note.is_empty() { format!("Status changed to {}", input.status) } else { note };
        let event = transition_order(
            &mut *tx,
            &mut order,
            input.status,
            transition_facts(&payments, input.allow_partial_refund),
            &note,
            principal.actor_id(),
            now,
        )
        .await?;
        tx.commit().await?;
        self.deps.events.publish(event);
        Ok(order)
    }

    /// Cancels before shipment: the owner while `pending`, an admin while
    /// `pending`, `paid` or `processing`. Stock returns in the same
    /// transaction; captured payments are refunded afterwards.
    #[instrument(name = "orders.cancel", skip_all, fields(%store_id, %order_id))]
    pub async fn cancel(&self, principal: &Principal, store_id: Uuid, order_id: Uuid, reason: Option<&str>) -> Result<CancelOutcome> {
        let now = self.deps.clock.now();
        let actor_id = principal.actor_id();

        let mut tx = self.deps.store.begin().await?;
        let mut order = visible_order(&mut *tx, principal, store_id, order_id, Lock::Exclusive).await?;
        if !principal.is_admin() && order.status != OrderStatus::Pending {
            return Err(CommerceError::forbidden("only pending orders can be cancelled by the customer"));
        }
        if !order.status.is_before_shipment() {
            return Err(CommerceError::transition("order", order.status, OrderStatus::Cancelled));
        }
        let payments = tx.payments_for_order(order.id, Lock::Exclusive).await?;
        let items = tx.order_items(order.id).await?;

        let note = match reason.map(str::trim).filter(|r| !r.is_empty()) {
            Some(reason) => format!("Order cancelled: {reason}"),
            None => "Order cancelled".to_string(),
        };
        let event = transition_order(&mut *tx, &mut order, OrderStatus::Cancelled, transition_facts(&payments, false), &note, actor_id, now).await?;

        let catalog = LockedCatalog::lock(&mut *tx, store_id, items.iter().map(|i| (i.product_id, i.variant_id))).await?;
        let mut restock = Vec::with_capacity(items.len());
        for item in &items {
            restock.push((catalog.item(item.product_id, item.variant_id)?, item.quantity));
        }
        StockMove {
            store_id,
            reason: InventoryReason::Cancellation,
            reference_id: Some(order.id),
            actor_id,
            note: Some(&order.order_number),
            now,
        }
        .apply(&mut *tx, group_deltas(restock))
        .await?;
        tx.commit().await?;
        self.deps.events.publish(event);

        let captured: Decimal = payments.iter().map(Payment::refundable).sum();
        if captured.is_zero() {
            return Ok(CancelOutcome { order, refunded: Decimal::ZERO, refund_error: None });
        }
        let refund = self
            .payments
            .refund_order(actor_id, store_id, order.id, None, Some("order cancelled".to_string()), None)
            .await;
        match refund {
            Ok(outcome) => Ok(CancelOutcome { order: outcome.order, refunded: outcome.refunded, refund_error: None }),
            Err(err) => {
                tracing::warn!(order_id = %order.id, error = %err, "order cancelled but refund failed");
                Ok(CancelOutcome { order, refunded: Decimal::ZERO, refund_error: Some(err.to_string()) })
            }
        }
    }
}

pub(crate) async fn visible_order(tx: &mut dyn Tx, principal: &Principal, store_id: Uuid, order_id: Uuid, lock: Lock) -> Result<Order> {
    let order = tx
        .order(order_id, lock)
        .await?
        .filter(|o| o.store_id == store_id)
        .ok_or_else(|| CommerceError::not_found("order", order_id))?;
    principal.ensure_visible(&order)?;
    Ok(order)
}
