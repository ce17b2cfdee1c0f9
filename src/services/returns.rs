//! Return/refund workflow.
//!
//! Returns are requested against shipped or delivered orders and walk
//! `requested → approved → received → refunded → completed` (or end in
//! `rejected`). The refund step runs through the payment bridge; a claim
//! token on the return keeps two operators from refunding it twice.

use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::orders::visible_order;
use super::{group_deltas, Deps, LockedCatalog, PaymentBridge, StockMove};
use crate::auth::Principal;
use crate::domain::aggregates::returns::price_return_lines;
use crate::domain::aggregates::{
    InventoryReason, Order, Return, ReturnLine, ReturnReason, ReturnStatus, ReturnStatusHistory,
};
use crate::domain::events::CommerceEvent;
use crate::error::{CommerceError, Result};
use crate::store::{Lock, SequenceKind, Tx};

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CreateReturn {
    #[validate]
    pub items: Vec<ReturnLine>,
    pub reason: ReturnReason,
    #[validate(length(max = 2000))]
    pub reason_details: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct UpdateReturnStatus {
    pub status: ReturnStatus,
    #[validate(length(max = 1000))]
    pub note: Option<String>,
    /// Required when rejecting.
    #[validate(length(max = 1000))]
    pub rejection_reason: Option<String>,
    #[validate(length(max = 100))]
    pub return_carrier: Option<String>,
    #[validate(length(max = 100))]
    pub return_tracking_number: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReturnDetails {
    #[serde(flatten)]
    pub ret: Return,
    pub history: Vec<ReturnStatusHistory>,
}

#[derive(Clone)]
pub struct ReturnService {
    deps: Deps,
    payments: PaymentBridge,
}

impl ReturnService {
    pub fn new(deps: Deps, payments: PaymentBridge) -> Self {
        Self { deps, payments }
    }

    #[instrument(name = "returns.create", skip_all, fields(%store_id, %order_id))]
    pub async fn create(&self, principal: &Principal, store_id: Uuid, order_id: Uuid, input: CreateReturn) -> Result<Return> {
        input.validate()?;
        let now = self.deps.clock.now();
        let actor_id = principal.actor_id();

        let mut tx = self.deps.store.begin().await?;
        let order = visible_order(&mut *tx, principal, store_id, order_id, Lock::Exclusive).await?;
        if !order.status.is_returnable() {
            return Err(CommerceError::transition("order", order.status, "returned"));
        }
        let items = tx.order_items(order.id).await?;
        let prior = tx.returns_for_order(order.id).await?;
        let refund_amount = price_return_lines(&input.items, &items, &prior)?;

        let seq = tx.next_sequence(store_id, SequenceKind::Return).await?;
        let ret = Return {
            id: Uuid::now_v7(),
            return_number: format!("RET-{}-{seq:06}", now.format("%Y%m%d")),
            store_id,
            order_id: order.id,
            user_id: order.user_id,
            status: ReturnStatus::Requested,
            reason: input.reason,
            reason_details: input.reason_details.map(|d| d.trim().to_string()).filter(|d| !d.is_empty()),
            rejection_reason: None,
            items: input.items,
            refund_amount,
            refund_claim: None,
            return_carrier: None,
            return_tracking_number: None,
            created_at: now,
            updated_at: now,
            approved_at: None,
            rejected_at: None,
            received_at: None,
            refunded_at: None,
            completed_at: None,
            restocked_at: None,
        };
        tx.insert_return(&ret).await?;
        tx.append_return_history(ReturnStatusHistory::entry(ret.id, None, ReturnStatus::Requested, "Return requested", actor_id, now))
            .await?;
        tx.commit().await?;

        tracing::info!(return_id = %ret.id, return_number = %ret.return_number, %refund_amount, "return requested");
        self.deps.events.publish(CommerceEvent::ReturnRequested {
            order_id: order.id,
            return_id: ret.id,
            return_number: ret.return_number.clone(),
            refund_amount,
        });
        Ok(ret)
    }

    #[instrument(name = "returns.get", skip_all, fields(%store_id, %return_id))]
    pub async fn get(&self, principal: &Principal, store_id: Uuid, return_id: Uuid) -> Result<ReturnDetails> {
        let mut tx = self.deps.store.begin().await?;
        let ret = tx
            .find_return(return_id, Lock::Shared)
            .await?
            .filter(|r| r.store_id == store_id)
            .ok_or_else(|| CommerceError::not_found("return", return_id))?;
        visible_order(&mut *tx, principal, store_id, ret.order_id, Lock::Shared)
            .await
            .map_err(|_| CommerceError::not_found("return", return_id))?;
        let mut history = tx.return_history(ret.id).await?;
        history.sort_by_key(|h| (h.created_at, h.seq));
        Ok(ReturnDetails { ret, history })
    }

    /// Operator status change. `refunded` goes through [`Self::refund`].
    #[instrument(name = "returns.update_status", skip_all, fields(%store_id, %return_id, status = %input.status))]
    pub async fn update_status(&self, principal: &Principal, store_id: Uuid, return_id: Uuid, input: UpdateReturnStatus) -> Result<Return> {
        principal.require_admin()?;
        input.validate()?;
        if input.status == ReturnStatus::Refunded {
            return self.refund(principal, store_id, return_id).await;
        }
        let now = self.deps.clock.now();

        let mut tx = self.deps.store.begin().await?;
        let (order, mut ret) = locked_return(&mut *tx, store_id, return_id).await?;
        if ret.refund_claim.is_some() {
            return Err(CommerceError::Conflict(format!("a refund for {} is in progress", ret.return_number)));
        }
        let from = match input.status {
            ReturnStatus::Rejected => {
                let reason = input.rejection_reason.as_deref().or(input.note.as_deref()).unwrap_or_default();
                ret.reject(reason, now)?
            }
            next => ret.transition(next, now)?,
        };
        if let Some(carrier) = input.return_carrier.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            ret.return_carrier = Some(carrier.to_string());
        }
        if let Some(tracking) = input.return_tracking_number.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            ret.return_tracking_number = Some(tracking.to_string());
        }
        let note = match input.note.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(note) => note.to_string(),
            None => format!("Status changed to {}", ret.status),
        };
        tx.update_return(&ret).await?;
        tx.append_return_history(ReturnStatusHistory::entry(ret.id, Some(from), ret.status, note, principal.actor_id(), now))
            .await?;
        tx.commit().await?;

        tracing::info!(return_id = %ret.id, %from, to = %ret.status, "return status changed");
        self.deps.events.publish(CommerceEvent::ReturnStatusChanged {
            order_id: order.id,
            return_id: ret.id,
            from,
            to: ret.status,
        });
        Ok(ret)
    }

    /// Refunds a received return through the payment bridge, then marks it
    /// `refunded`. Retrying after a failure reuses the same gateway
    /// idempotency keys, so money moves at most once per payment.
    #[instrument(name = "returns.refund", skip_all, fields(%store_id, %return_id))]
    pub async fn refund(&self, principal: &Principal, store_id: Uuid, return_id: Uuid) -> Result<Return> {
        principal.require_admin()?;
        let actor_id = principal.actor_id();
        let claim = Uuid::now_v7();

        let ret = {
            let mut tx = self.deps.store.begin().await?;
            let (_, mut ret) = locked_return(&mut *tx, store_id, return_id).await?;
            if !ret.status.can_transition_to(ReturnStatus::Refunded) {
                return Err(CommerceError::transition("return", ret.status, ReturnStatus::Refunded));
            }
            if ret.refund_claim.is_some() {
                return Err(CommerceError::Conflict(format!("a refund for {} is in progress", ret.return_number)));
            }
            ret.refund_claim = Some(claim);
            ret.updated_at = self.deps.clock.now();
            tx.update_return(&ret).await?;
            tx.commit().await?;
            ret
        };

        let outcome = self
            .payments
            .refund_order(
                actor_id,
                store_id,
                ret.order_id,
                Some(ret.refund_amount),
                Some(format!("return {}", ret.return_number)),
                Some(ret.id),
            )
            .await;
        if let Err(err) = outcome {
            tracing::warn!(return_id = %ret.id, error = %err, "return refund failed; releasing claim");
            self.release_claim(store_id, ret.id, claim).await?;
            return Err(err);
        }

        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let (order, mut ret) = locked_return(&mut *tx, store_id, return_id).await?;
        let from = ret.transition(ReturnStatus::Refunded, now)?;
        ret.refund_claim = None;
        tx.update_return(&ret).await?;
        tx.append_return_history(ReturnStatusHistory::entry(
            ret.id,
            Some(from),
            ReturnStatus::Refunded,
            format!("Refunded {} {}", ret.refund_amount, order.currency),
            actor_id,
            now,
        ))
        .await?;
        tx.commit().await?;

        tracing::info!(return_id = %ret.id, amount = %ret.refund_amount, "return refunded");
        self.deps.events.publish(CommerceEvent::ReturnStatusChanged {
            order_id: order.id,
            return_id: ret.id,
            from,
            to: ReturnStatus::Refunded,
        });
        Ok(ret)
    }

    /// Puts the returned units back on the shelf. Allowed once, from
    /// `received` onwards.
    #[instrument(name = "returns.restock", skip_all, fields(%store_id, %return_id))]
    pub async fn restock(&self, principal: &Principal, store_id: Uuid, return_id: Uuid) -> Result<Return> {
        principal.require_admin()?;
        let now = self.deps.clock.now();
        let actor_id = principal.actor_id();

        let mut tx = self.deps.store.begin().await?;
        let (order, mut ret) = locked_return(&mut *tx, store_id, return_id).await?;
        if !ret.status.is_restockable() {
            return Err(CommerceError::transition("return", ret.status, "restocked"));
        }
        if ret.restocked_at.is_some() {
            return Err(CommerceError::Conflict(format!("{} was already restocked", ret.return_number)));
        }

        let order_items = tx.order_items(order.id).await?;
        let mut lines = Vec::with_capacity(ret.items.len());
        for line in &ret.items {
            let item = order_items
                .iter()
                .find(|i| i.id == line.order_item_id)
                .ok_or_else(|| CommerceError::internal(format!("return {} references unknown order item", ret.id)))?;
            lines.push((item.product_id, item.variant_id, line.quantity));
        }
        let catalog = LockedCatalog::lock(&mut *tx, store_id, lines.iter().map(|(p, v, _)| (*p, *v))).await?;
        let mut deltas = Vec::with_capacity(lines.len());
        for (product_id, variant_id, quantity) in lines {
            deltas.push((catalog.item(product_id, variant_id)?, quantity));
        }
        StockMove {
            store_id,
            reason: InventoryReason::ReturnRestock,
            reference_id: Some(ret.id),
            actor_id,
            note: Some(&ret.return_number),
            now,
        }
        .apply(&mut *tx, group_deltas(deltas))
        .await?;

        ret.restocked_at = Some(now);
        ret.updated_at = now;
        tx.update_return(&ret).await?;
        tx.append_return_history(ReturnStatusHistory::entry(ret.id, Some(ret.status), ret.status, "Items restocked", actor_id, now))
            .await?;
        tx.commit().await?;
        tracing::info!(return_id = %ret.id, "return restocked");
        Ok(ret)
    }

    async fn release_claim(&self, store_id: Uuid, return_id: Uuid, claim: Uuid) -> Result<()> {
        let mut tx = self.deps.store.begin().await?;
        let (_, mut ret) = locked_return(&mut *tx, store_id, return_id).await?;
        if ret.refund_claim == Some(claim) {
            ret.refund_claim = None;
            ret.updated_at = self.deps.clock.now();
            tx.update_return(&ret).await?;
        }
        tx.commit().await
    }
}

/// Locks a return together with its order, order first.
async fn locked_return(tx: &mut dyn Tx, store_id: Uuid, return_id: Uuid) -> Result<(Order, Return)> {
    let order_id = tx
        .find_return(return_id, Lock::Shared)
        .await?
        .filter(|r| r.store_id == store_id)
        .map(|r| r.order_id)
        .ok_or_else(|| CommerceError::not_found("return", return_id))?;
    let order = tx
        .order(order_id, Lock::Exclusive)
        .await?
        .ok_or_else(|| CommerceError::internal(format!("return {return_id} references missing order {order_id}")))?;
    let ret = tx
        .find_return(return_id, Lock::Exclusive)
        .await?
        .ok_or_else(|| CommerceError::not_found("return", return_id))?;
    Ok((order, ret))
}
