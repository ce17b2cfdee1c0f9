//! Payment bridge: the order pipeline's only path to a gateway.
//!
//! Gateway state is reconciled into local rows by intent id through
//! [`PaymentBridge::reconcile`], whichever way the outcome arrives (explicit
//! confirm, webhook, offline capture, background sweep). A payment that is
//! already settled is never applied twice.

use axum::http::HeaderMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::orders::visible_order;
use super::{publish_all, transition_facts, transition_order, Deps};
use crate::auth::Principal;
use crate::domain::aggregates::{Order, OrderStatus, Payment, PaymentMethod, PaymentRefund, PaymentStatus};
use crate::domain::events::CommerceEvent;
use crate::domain::value_objects::{Currency, Money};
use crate::error::{CommerceError, Result};
use crate::gateway::{GatewayError, GatewayOutcome, IntentRequest, RefundRequest};
use crate::store::Lock;

#[derive(Clone, Debug, Serialize)]
pub struct PaymentIntentView {
    pub payment_id: Uuid,
    pub intent_id: String,
    pub client_secret: Option<String>,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
}

impl PaymentIntentView {
    fn of(payment: &Payment) -> Self {
        Self {
            payment_id: payment.id,
            intent_id: payment.intent_id.clone(),
            client_secret: payment.client_secret.clone(),
            method: payment.method,
            amount: payment.amount,
            currency: payment.currency.clone(),
            status: payment.status,
        }
    }
}

/// A payment and its order as they stand after an operation.
#[derive(Clone, Debug, Serialize)]
pub struct PaymentSnapshot {
    pub payment: Payment,
    pub order: Order,
}

#[derive(Clone, Debug, Default, Deserialize, Validate)]
pub struct RefundOrder {
    /// Defaults to everything still refundable.
    pub amount: Option<Decimal>,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RefundOutcome {
    pub order: Order,
    pub refunded: Decimal,
    pub refunds: Vec<PaymentRefund>,
}

const SURPLUS_REASON: &str = "captured beyond the order total";

/// Whether a refund returns order value or only money taken in excess of it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RefundScope {
    Order,
    Surplus,
}

#[derive(Clone)]
pub struct PaymentBridge {
    deps: Deps,
}

fn currency_of(order: &Order) -> Result<Currency> {
    Currency::new(&order.currency).map_err(|e| CommerceError::internal(format!("order {}: {e}", order.id)))
}

fn reuse_open_intent(open: &Payment, method: PaymentMethod) -> Result<PaymentIntentView> {
    if open.method != method {
        return Err(CommerceError::Conflict(format!(
            "payment {} by {} is still open; settle it before paying by {method}",
            open.intent_id, open.method
        )));
    }
    tracing::debug!(intent_id = %open.intent_id, status = %open.status, "returning the open intent");
    Ok(PaymentIntentView::of(open))
}

/// Moves the order's payment status towards `next`, leaving it alone once
/// money has been captured.
fn mark_order_payment(order: &mut Order, next: PaymentStatus, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
    if matches!(order.payment_status, PaymentStatus::Completed | PaymentStatus::Refunded) {
        return Ok(());
    }
    order.set_payment_status(PaymentStatus::Processing, now)?;
    order.set_payment_status(next, now)
}

impl PaymentBridge {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    /// Opens a gateway intent for the unpaid part of a pending order and
    /// records it as a `pending` payment. While an intent for the order is
    /// still open, that intent is returned instead of a second one, so the
    /// order can only be charged once.
    #[instrument(name = "payments.create_intent", skip_all, fields(%store_id, %order_id))]
    pub async fn create_intent(
        &self,
        principal: &Principal,
        store_id: Uuid,
        order_id: Uuid,
        method: Option<PaymentMethod>,
    ) -> Result<PaymentIntentView> {
        let (order, payments) = {
            let mut tx = self.deps.store.begin().await?;
            let order = visible_order(&mut *tx, principal, store_id, order_id, Lock::Shared).await?;
            let payments = tx.payments_for_order(order.id, Lock::Shared).await?;
            (order, payments)
        };
        if order.status != OrderStatus::Pending {
            return Err(CommerceError::transition("order", order.status, "awaiting payment"));
        }
        let method = method.unwrap_or(order.payment_method);
        if let Some(open) = payments.iter().find(|p| p.is_open()) {
            return reuse_open_intent(open, method);
        }
        let due = order.total - transition_facts(&payments, false).captured;
        if due <= Decimal::ZERO {
            return Err(CommerceError::Conflict(format!("order {} has nothing left to pay", order.order_number)));
        }
        let currency = currency_of(&order)?;

        // Concurrent callers share the key, so the gateway hands both the same intent.
        let intent = self
            .deps
            .gateways
            .create_intent(&IntentRequest {
                order_id: order.id,
                order_number: order.order_number.clone(),
                amount: Money::new(due, &currency),
                method,
                customer_email: order.customer_email.clone(),
                idempotency_key: format!("{}-intent-{}", order.id, payments.len() + 1),
            })
            .await?;

        let now = self.deps.clock.now();
        let mut payment = Payment::pending(order.id, method, due, &order.currency, intent.intent_id.clone(), now);
        payment.client_secret = intent.client_secret;
        let mut tx = self.deps.store.begin().await?;
        let current = tx
            .order(order.id, Lock::Exclusive)
            .await?
            .ok_or_else(|| CommerceError::not_found("order", order.id))?;
        if current.status != OrderStatus::Pending {
            tracing::warn!(order_id = %order.id, intent_id = %payment.intent_id, "order changed while the intent was opened");
            return Err(CommerceError::transition("order", current.status, "awaiting payment"));
        }
        let racing = tx.payments_for_order(order.id, Lock::Exclusive).await?;
        if let Some(open) = racing.iter().find(|p| p.is_open()) {
            if open.intent_id != payment.intent_id {
                tracing::warn!(order_id = %order.id, abandoned = %payment.intent_id, "another intent was opened first");
            }
            return reuse_open_intent(open, method);
        }
        tx.insert_payment(&payment).await?;
        tx.commit().await?;

        tracing::info!(order_id = %order.id, intent_id = %payment.intent_id, %method, amount = %due, "payment intent created");
        Ok(PaymentIntentView::of(&payment))
    }

    /// Asks the gateway to settle an intent. A settled payment returns its
    /// recorded result without another gateway call; a gateway that cannot
    /// answer in time leaves the payment `processing`.
    #[instrument(name = "payments.confirm", skip_all, fields(%store_id, %order_id, %intent_id))]
    pub async fn confirm(&self, principal: &Principal, store_id: Uuid, order_id: Uuid, intent_id: &str) -> Result<PaymentSnapshot> {
        let now = self.deps.clock.now();
        let method = {
            let mut tx = self.deps.store.begin().await?;
            let mut order = visible_order(&mut *tx, principal, store_id, order_id, Lock::Exclusive).await?;
            let mut payment = tx
                .payment_by_intent(intent_id, Lock::Exclusive)
                .await?
                .filter(|p| p.order_id == order.id)
                .ok_or_else(|| CommerceError::not_found("payment", intent_id))?;
            match payment.status {
                PaymentStatus::Completed | PaymentStatus::Refunded => return Ok(PaymentSnapshot { payment, order }),
                PaymentStatus::Failed => {
                    return Err(CommerceError::PaymentFailed(
                        payment.failure_reason.unwrap_or_else(|| "payment failed".to_string()),
                    ))
                }
                PaymentStatus::Pending => {
                    if order.status != OrderStatus::Pending {
                        return Err(CommerceError::transition("order", order.status, "awaiting payment"));
                    }
                    payment.mark_processing(now)?;
                    tx.update_payment(&payment).await?;
                    if !matches!(order.payment_status, PaymentStatus::Completed | PaymentStatus::Processing) {
                        order.set_payment_status(PaymentStatus::Processing, now)?;
                        tx.update_order(&order).await?;
                    }
                    tx.commit().await?;
                }
                PaymentStatus::Processing => {}
            }
            payment.method
        };

        let outcome = match self.deps.gateways.confirm(method, intent_id).await {
            Ok(GatewayOutcome::Pending) => return Err(CommerceError::PaymentPending { intent_id: intent_id.to_string() }),
            Ok(outcome) => outcome,
            Err(GatewayError::Declined(reason)) => GatewayOutcome::Failed { reason },
            Err(err @ (GatewayError::Timeout | GatewayError::Transport(_))) => {
                tracing::warn!(%intent_id, error = %err, "gateway did not settle the intent; left processing");
                return Err(CommerceError::PaymentPending { intent_id: intent_id.to_string() });
            }
            Err(err) => return Err(err.into()),
        };

        let snapshot = self.reconcile(intent_id, outcome, principal.actor_id()).await?;
        match snapshot.payment.status {
            PaymentStatus::Failed => Err(CommerceError::PaymentFailed(
                snapshot.payment.failure_reason.unwrap_or_else(|| "payment failed".to_string()),
            )),
            _ => Ok(snapshot),
        }
    }

    /// Applies an authoritative gateway outcome to the payment and its order.
    /// Idempotent per intent: once the payment is settled, later outcomes
    /// are ignored.
    #[instrument(name = "payments.reconcile", skip_all, fields(%intent_id))]
    pub async fn reconcile(&self, intent_id: &str, outcome: GatewayOutcome, actor_id: Option<Uuid>) -> Result<PaymentSnapshot> {
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let order_id = tx
            .payment_by_intent(intent_id, Lock::Shared)
            .await?
            .map(|p| p.order_id)
            .ok_or_else(|| CommerceError::not_found("payment", intent_id))?;
        let mut order = tx
            .order(order_id, Lock::Exclusive)
            .await?
            .ok_or_else(|| CommerceError::internal(format!("payment {intent_id} references missing order {order_id}")))?;
        let mut payment = tx
            .payment_by_intent(intent_id, Lock::Exclusive)
            .await?
            .ok_or_else(|| CommerceError::not_found("payment", intent_id))?;
        if payment.status.is_settled() {
            tracing::debug!(status = %payment.status, "payment already settled");
            return Ok(PaymentSnapshot { payment, order });
        }

        let mut events = Vec::new();
        let mut refund_late_capture = false;
        let mut surplus = Decimal::ZERO;
        match outcome {
            GatewayOutcome::Pending => return Ok(PaymentSnapshot { payment, order }),
            GatewayOutcome::Succeeded { charge_id } => {
                payment.complete(charge_id, now)?;
                tx.update_payment(&payment).await?;
                events.push(CommerceEvent::PaymentCompleted {
                    order_id: order.id,
                    intent_id: intent_id.to_string(),
                    amount: payment.amount,
                });

                let payments = tx.payments_for_order(order.id, Lock::Exclusive).await?;
                let facts = transition_facts(&payments, false);
                if facts.captured >= order.total {
                    mark_order_payment(&mut order, PaymentStatus::Completed, now)?;
                    if order.status == OrderStatus::Pending {
                        events.push(transition_order(&mut *tx, &mut order, OrderStatus::Paid, facts, "Payment confirmed", actor_id, now).await?);
                    } else {
                        tx.update_order(&order).await?;
                    }
                }
                if order.status == OrderStatus::Cancelled {
                    tracing::warn!(order_id = %order.id, "payment captured on a cancelled order; refunding");
                    refund_late_capture = true;
                } else {
                    surplus = (facts.captured - order.total).min(payment.amount);
                    if surplus > Decimal::ZERO {
                        tracing::warn!(order_id = %order.id, %surplus, "capture exceeds the order total; refunding the excess");
                    }
                }
            }
            GatewayOutcome::Failed { reason } => {
                payment.fail(reason.clone(), now)?;
                tx.update_payment(&payment).await?;
                mark_order_payment(&mut order, PaymentStatus::Failed, now)?;
                tx.update_order(&order).await?;
                events.push(CommerceEvent::PaymentFailed { order_id: order.id, intent_id: intent_id.to_string(), reason });
            }
        }
        tx.commit().await?;
        tracing::info!(order_id = %order.id, status = %payment.status, "payment reconciled");
        publish_all(&self.deps.events, events);

        if refund_late_capture {
            match self
                .refund_order(None, order.store_id, order.id, None, Some("payment captured after cancellation".to_string()), None)
                .await
            {
                Ok(outcome) => order = outcome.order,
                Err(err) => tracing::error!(order_id = %order.id, error = %err, "refund of late capture failed"),
            }
        } else if surplus > Decimal::ZERO {
            match self.refund_surplus(&payment, surplus).await {
                Ok(refunded) => payment = refunded,
                Err(err) => tracing::error!(order_id = %order.id, %intent_id, error = %err, "refund of surplus capture failed"),
            }
        }
        Ok(PaymentSnapshot { payment, order })
    }

    /// Verifies and applies a gateway push notification. Intents unknown to
    /// this core are acknowledged and ignored.
    #[instrument(name = "payments.webhook", skip_all, fields(%gateway))]
    pub async fn handle_webhook(&self, gateway: &str, headers: &HeaderMap, body: &[u8]) -> Result<Option<PaymentSnapshot>> {
        let Some(event) = self.deps.gateways.parse_webhook(gateway, headers, body)? else {
            tracing::debug!("webhook event ignored");
            return Ok(None);
        };
        match self.reconcile(&event.intent_id, event.outcome, None).await {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(CommerceError::NotFound { .. }) => {
                tracing::warn!(intent_id = %event.intent_id, "webhook for unknown intent");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Records receipt of an offline payment (bank transfer, cash on delivery).
    #[instrument(name = "payments.capture_offline", skip_all, fields(%store_id, %intent_id))]
    pub async fn capture_offline(&self, principal: &Principal, store_id: Uuid, intent_id: &str) -> Result<PaymentSnapshot> {
        principal.require_admin()?;
        let payment = {
            let mut tx = self.deps.store.begin().await?;
            let payment = tx
                .payment_by_intent(intent_id, Lock::Shared)
                .await?
                .ok_or_else(|| CommerceError::not_found("payment", intent_id))?;
            visible_order(&mut *tx, principal, store_id, payment.order_id, Lock::Shared).await?;
            payment
        };
        if !payment.method.is_offline() {
            return Err(CommerceError::invalid("intent_id", "only offline payments are captured manually"));
        }
        self.reconcile(intent_id, GatewayOutcome::Succeeded { charge_id: None }, principal.actor_id()).await
    }

    /// Operator refund of an explicit amount, or of everything refundable.
    #[instrument(name = "payments.refund", skip_all, fields(%store_id, %order_id))]
    pub async fn refund(&self, principal: &Principal, store_id: Uuid, order_id: Uuid, input: RefundOrder) -> Result<RefundOutcome> {
        principal.require_admin()?;
        input.validate()?;
        self.refund_order(principal.actor_id(), store_id, order_id, input.amount, input.reason, None).await
    }

    /// Spreads `amount` over the order's captured payments, oldest first,
    /// refunding each share at its gateway and recording it locally.
    pub(crate) async fn refund_order(
        &self,
        actor_id: Option<Uuid>,
        store_id: Uuid,
        order_id: Uuid,
        amount: Option<Decimal>,
        reason: Option<String>,
        return_id: Option<Uuid>,
    ) -> Result<RefundOutcome> {
        let (order, payments, earlier) = {
            let mut tx = self.deps.store.begin().await?;
            let order = tx
                .order(order_id, Lock::Shared)
                .await?
                .filter(|o| o.store_id == store_id)
                .ok_or_else(|| CommerceError::not_found("order", order_id))?;
            let payments = tx.payments_for_order(order_id, Lock::Shared).await?;
            let earlier: Vec<PaymentRefund> = match return_id {
                Some(return_id) => tx
                    .refunds_for_order(order_id)
                    .await?
                    .into_iter()
                    .filter(|r| r.return_id == Some(return_id))
                    .collect(),
                None => Vec::new(),
            };
            (order, payments, earlier)
        };
        let currency = currency_of(&order)?;

        // A retried return refund only moves what the ledger does not hold yet.
        let already: Decimal = earlier.iter().map(|r| r.amount).sum();
        let amount = amount.map(|a| a - already);
        if !earlier.is_empty() && amount.is_some_and(|a| a <= Decimal::ZERO) {
            tracing::debug!(%order_id, %already, "return refund already recorded");
            return Ok(RefundOutcome { order, refunded: already, refunds: earlier });
        }
        let payments: Vec<Payment> = payments
            .into_iter()
            .filter(|p| !earlier.iter().any(|r| r.payment_id == p.id))
            .collect();

        let refundable: Decimal = payments.iter().map(Payment::refundable).sum();
        let ceiling = refundable.min(order.remaining_refundable());
        let amount = currency.round(amount.unwrap_or(ceiling));
        if ceiling <= Decimal::ZERO {
            return Err(CommerceError::invalid("amount", "nothing left to refund"));
        }
        if amount <= Decimal::ZERO || amount > ceiling {
            return Err(CommerceError::invalid("amount", format!("refund must be between 0 and {ceiling}")));
        }

        let mut left = amount;
        let mut plan = Vec::new();
        for payment in payments.into_iter().filter(|p| p.refundable() > Decimal::ZERO) {
            if left.is_zero() {
                break;
            }
            let share = left.min(payment.refundable());
            left -= share;
            plan.push((payment, share));
        }

        let mut latest = order;
        let mut refunds = earlier;
        for (payment, share) in plan {
            let idempotency_key = match return_id {
                Some(return_id) => format!("return-{return_id}-{}", payment.id),
                None => format!("refund-{}-{}", payment.id, payment.refund_amount),
            };
            let refund = self
                .deps
                .gateways
                .refund(
                    payment.method,
                    &RefundRequest {
                        intent_id: payment.intent_id.clone(),
                        charge_id: payment.charge_id.clone(),
                        amount: Money::new(share, &currency),
                        reason: reason.clone(),
                        idempotency_key,
                    },
                )
                .await?;
            let (order, _, row) = self
                .record_refund(actor_id, &payment, share, reason.clone(), return_id, refund.refund_id, RefundScope::Order)
                .await?;
            latest = order;
            refunds.push(row);
        }
        Ok(RefundOutcome { order: latest, refunded: already + amount, refunds })
    }

    /// Gives back the part of a capture that took the order past its total.
    /// The order's own refund balance is left untouched.
    async fn refund_surplus(&self, payment: &Payment, surplus: Decimal) -> Result<Payment> {
        let currency = Currency::new(&payment.currency)
            .map_err(|e| CommerceError::internal(format!("payment {}: {e}", payment.intent_id)))?;
        let refund = self
            .deps
            .gateways
            .refund(
                payment.method,
                &RefundRequest {
                    intent_id: payment.intent_id.clone(),
                    charge_id: payment.charge_id.clone(),
                    amount: Money::new(surplus, &currency),
                    reason: Some(SURPLUS_REASON.to_string()),
                    idempotency_key: format!("surplus-{}", payment.id),
                },
            )
            .await?;
        let (_, payment, _) = self
            .record_refund(None, payment, surplus, Some(SURPLUS_REASON.to_string()), None, refund.refund_id, RefundScope::Surplus)
            .await?;
        Ok(payment)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_refund(
        &self,
        actor_id: Option<Uuid>,
        payment: &Payment,
        share: Decimal,
        reason: Option<String>,
        return_id: Option<Uuid>,
        gateway_refund_id: String,
        scope: RefundScope,
    ) -> Result<(Order, Payment, PaymentRefund)> {
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let mut order = tx
            .order(payment.order_id, Lock::Exclusive)
            .await?
            .ok_or_else(|| CommerceError::not_found("order", payment.order_id))?;
        let mut current = tx
            .payment_by_intent(&payment.intent_id, Lock::Exclusive)
            .await?
            .ok_or_else(|| CommerceError::not_found("payment", &payment.intent_id))?;
        if let Some(existing) = tx
            .refunds_for_order(order.id)
            .await?
            .into_iter()
            .find(|r| r.payment_id == payment.id && r.gateway_refund_id == gateway_refund_id)
        {
            tracing::debug!(refund_id = %gateway_refund_id, "refund already recorded");
            return Ok((order, current, existing));
        }
        current.record_refund(share, reason.clone(), now)?;
        tx.update_payment(&current).await?;

        let row = PaymentRefund {
            id: Uuid::now_v7(),
            payment_id: current.id,
            gateway_refund_id,
            amount: share,
            reason,
            return_id,
            created_at: now,
        };
        tx.insert_refund(&row).await?;

        if scope == RefundScope::Surplus {
            tx.commit().await?;
            tracing::info!(order_id = %order.id, intent_id = %current.intent_id, amount = %share, "surplus capture refunded");
            return Ok((order, current, row));
        }

        order.refunded_amount += share;
        order.updated_at = now;
        let mut events = vec![CommerceEvent::PaymentRefunded {
            order_id: order.id,
            amount: share,
            total_refunded: order.refunded_amount,
        }];
        if order.is_fully_refunded() && order.payment_status == PaymentStatus::Completed {
            order.set_payment_status(PaymentStatus::Refunded, now)?;
        }
        if order.is_fully_refunded() && order.status.can_transition_to(OrderStatus::Refunded) {
            let payments = tx.payments_for_order(order.id, Lock::Exclusive).await?;
            events.push(
                transition_order(&mut *tx, &mut order, OrderStatus::Refunded, transition_facts(&payments, false), "Order fully refunded", actor_id, now)
                    .await?,
            );
        } else {
            tx.update_order(&order).await?;
        }
        tx.commit().await?;

        tracing::info!(order_id = %order.id, amount = %share, total_refunded = %order.refunded_amount, "refund recorded");
        publish_all(&self.deps.events, events);
        Ok((order, current, row))
    }
}
