mod common;

use commerce_core::domain::aggregates::{InventoryReason, OrderStatus, ReturnLine, ReturnReason, ReturnStatus};
use commerce_core::gateway::GatewayOutcome;
use commerce_core::services::{CreateReturn, UpdateReturnStatus};
use common::{admin, guest, harness, Harness};
use rust_decimal_macros::dec;
use uuid::Uuid;

fn request(order_item_id: Uuid, quantity: i32) -> CreateReturn {
    CreateReturn {
        items: vec![ReturnLine { order_item_id, quantity }],
        reason: ReturnReason::Defective,
        reason_details: Some("  strap snapped  ".into()),
    }
}

fn status(status: ReturnStatus) -> UpdateReturnStatus {
    UpdateReturnStatus { status, note: None, rejection_reason: None, return_carrier: None, return_tracking_number: None }
}

async fn advance(h: &Harness, return_id: Uuid, next: ReturnStatus) {
    h.services.returns.update_status(&admin(), h.store_id, return_id, status(next)).await.unwrap();
}

#[tokio::test]
async fn partial_return_is_refunded_and_completed() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let (placed, intent_id) = h.delivered_order(&buyer, 2).await;
    let item_id = placed.items[0].id;

    let ret = h.services.returns.create(&buyer, h.store_id, placed.order.id, request(item_id, 1)).await.unwrap();
    assert_eq!(ret.status, ReturnStatus::Requested);
    assert_eq!(ret.refund_amount, dec!(10.00));
    assert_eq!(ret.reason_details.as_deref(), Some("strap snapped"));
    assert!(ret.return_number.starts_with("RET-20240501-"));

    advance(&h, ret.id, ReturnStatus::Approved).await;
    let received = h
        .services
        .returns
        .update_status(
            &admin(),
            h.store_id,
            ret.id,
            UpdateReturnStatus {
                return_carrier: Some("DHL".into()),
                return_tracking_number: Some("JD0001".into()),
                ..status(ReturnStatus::Received)
            },
        )
        .await
        .unwrap();
    assert_eq!(received.return_carrier.as_deref(), Some("DHL"));
    assert!(received.received_at.is_some());

    let refunded = h.services.returns.refund(&admin(), h.store_id, ret.id).await.unwrap();
    assert_eq!(refunded.status, ReturnStatus::Refunded);
    assert!(refunded.refund_claim.is_none());
    advance(&h, ret.id, ReturnStatus::Completed).await;

    let tables = h.tables().await;
    let order = &tables.orders[&placed.order.id];
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(order.refunded_amount, dec!(10.00));
    let payment = tables.payments.values().find(|p| p.order_id == placed.order.id).unwrap();
    assert_eq!(payment.refund_amount, dec!(10.00));
    assert_eq!(tables.payment_refunds.len(), 1);
    assert_eq!(tables.payment_refunds[0].return_id, Some(ret.id));
    assert_eq!(h.sandbox.refunded(&intent_id), dec!(10.00));

    let details = h.services.returns.get(&buyer, h.store_id, ret.id).await.unwrap();
    assert_eq!(details.ret.status, ReturnStatus::Completed);
    let trail: Vec<_> = details.history.iter().map(|e| e.new_status).collect();
    assert_eq!(
        trail,
        [ReturnStatus::Requested, ReturnStatus::Approved, ReturnStatus::Received, ReturnStatus::Refunded, ReturnStatus::Completed]
    );
    assert_eq!(details.history[3].note, "Refunded 10.00 EUR");
}

#[tokio::test]
async fn refunding_a_return_twice_is_rejected() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let (placed, intent_id) = h.delivered_order(&buyer, 2).await;
    let ret = h.services.returns.create(&buyer, h.store_id, placed.order.id, request(placed.items[0].id, 2)).await.unwrap();
    advance(&h, ret.id, ReturnStatus::Approved).await;
    advance(&h, ret.id, ReturnStatus::Received).await;

    h.services.returns.update_status(&admin(), h.store_id, ret.id, status(ReturnStatus::Refunded)).await.unwrap();
    let err = h.services.returns.refund(&admin(), h.store_id, ret.id).await.unwrap_err();
    assert_eq!(err.kind(), "state_error");
    assert_eq!(h.sandbox.refunded(&intent_id), dec!(20.00));
}

#[tokio::test]
async fn cannot_return_more_than_was_bought() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let (placed, _) = h.delivered_order(&buyer, 2).await;
    let item_id = placed.items[0].id;

    let err = h.services.returns.create(&buyer, h.store_id, placed.order.id, request(item_id, 3)).await.unwrap_err();
    assert_eq!(err.kind(), "validation");

    h.services.returns.create(&buyer, h.store_id, placed.order.id, request(item_id, 1)).await.unwrap();
    h.services.returns.create(&buyer, h.store_id, placed.order.id, request(item_id, 1)).await.unwrap();
    let err = h.services.returns.create(&buyer, h.store_id, placed.order.id, request(item_id, 1)).await.unwrap_err();
    assert_eq!(err.kind(), "validation");

    let unknown = h.services.returns.create(&buyer, h.store_id, placed.order.id, request(Uuid::new_v4(), 1)).await.unwrap_err();
    assert_eq!(unknown.kind(), "validation");
}

#[tokio::test]
async fn rejected_returns_free_their_quantity() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let (placed, _) = h.delivered_order(&buyer, 1).await;
    let item_id = placed.items[0].id;
    let ret = h.services.returns.create(&buyer, h.store_id, placed.order.id, request(item_id, 1)).await.unwrap();

    let err = h.services.returns.update_status(&admin(), h.store_id, ret.id, status(ReturnStatus::Rejected)).await.unwrap_err();
    assert_eq!(err.kind(), "validation");

    let rejected = h
        .services
        .returns
        .update_status(
            &admin(),
            h.store_id,
            ret.id,
            UpdateReturnStatus { rejection_reason: Some("worn".into()), ..status(ReturnStatus::Rejected) },
        )
        .await
        .unwrap();
    assert_eq!(rejected.status, ReturnStatus::Rejected);
    assert_eq!(rejected.rejection_reason.as_deref(), Some("worn"));

    h.services.returns.create(&buyer, h.store_id, placed.order.id, request(item_id, 1)).await.unwrap();
}

#[tokio::test]
async fn returns_need_a_shipped_order() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let (placed, _) = h.paid_order(&buyer, 1).await;

    let err = h.services.returns.create(&buyer, h.store_id, placed.order.id, request(placed.items[0].id, 1)).await.unwrap_err();
    assert_eq!(err.kind(), "state_error");
}

#[tokio::test]
async fn customers_cannot_move_returns() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let (placed, _) = h.delivered_order(&buyer, 1).await;
    let ret = h.services.returns.create(&buyer, h.store_id, placed.order.id, request(placed.items[0].id, 1)).await.unwrap();

    let err = h.services.returns.update_status(&buyer, h.store_id, ret.id, status(ReturnStatus::Approved)).await.unwrap_err();
    assert_eq!(err.kind(), "permission_error");

    let skipped = h.services.returns.update_status(&admin(), h.store_id, ret.id, status(ReturnStatus::Received)).await.unwrap_err();
    assert_eq!(skipped.kind(), "state_error");

    let stranger = h.services.returns.get(&guest("guest-b"), h.store_id, ret.id).await.unwrap_err();
    assert_eq!(stranger.kind(), "not_found");
}

#[tokio::test]
async fn restock_puts_units_back_once() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let (placed, _) = h.delivered_order(&buyer, 2).await;
    assert_eq!(h.stock().await, 3);
    let ret = h.services.returns.create(&buyer, h.store_id, placed.order.id, request(placed.items[0].id, 2)).await.unwrap();

    let early = h.services.returns.restock(&admin(), h.store_id, ret.id).await.unwrap_err();
    assert_eq!(early.kind(), "state_error");

    advance(&h, ret.id, ReturnStatus::Approved).await;
    advance(&h, ret.id, ReturnStatus::Received).await;
    let restocked = h.services.returns.restock(&admin(), h.store_id, ret.id).await.unwrap();
    assert!(restocked.restocked_at.is_some());
    assert_eq!(restocked.status, ReturnStatus::Received);
    assert_eq!(h.stock().await, 5);

    let again = h.services.returns.restock(&admin(), h.store_id, ret.id).await.unwrap_err();
    assert_eq!(again.kind(), "conflict");
    assert_eq!(h.stock().await, 5);

    let tables = h.tables().await;
    let audit: Vec<_> = tables.inventory_transactions.iter().filter(|t| t.reason == InventoryReason::ReturnRestock).collect();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].delta, 2);
    assert_eq!(audit[0].reference_id, Some(ret.id));
}

#[tokio::test]
async fn retried_return_refund_moves_only_the_remainder() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let placed = h.place_order(&buyer, 2).await;
    let first = h.open_payment(&placed.order, dec!(10.50)).await;
    let second = h.open_payment(&placed.order, dec!(20.00)).await;
    h.webhook_succeeded(&first, "ch_a").await.unwrap();
    let paid = h.webhook_succeeded(&second, "ch_b").await.unwrap();
    assert_eq!(paid.order.status, OrderStatus::Paid);
    h.deliver(placed.order.id).await;

    let ret = h.services.returns.create(&buyer, h.store_id, placed.order.id, request(placed.items[0].id, 2)).await.unwrap();
    assert_eq!(ret.refund_amount, dec!(20.00));
    advance(&h, ret.id, ReturnStatus::Approved).await;
    advance(&h, ret.id, ReturnStatus::Received).await;

    // the second share fails at the gateway after the first one went through
    h.sandbox.settle(&second, GatewayOutcome::Pending);
    let err = h.services.returns.refund(&admin(), h.store_id, ret.id).await.unwrap_err();
    assert_eq!(err.kind(), "payment_error");
    assert_eq!(h.sandbox.refunded(&first), dec!(10.50));

    h.sandbox.settle(&second, GatewayOutcome::Succeeded { charge_id: Some("ch_b".into()) });
    let refunded = h.services.returns.refund(&admin(), h.store_id, ret.id).await.unwrap();
    assert_eq!(refunded.status, ReturnStatus::Refunded);
    assert_eq!(h.sandbox.refunded(&first), dec!(10.50));
    assert_eq!(h.sandbox.refunded(&second), dec!(9.50));

    let tables = h.tables().await;
    assert_eq!(tables.orders[&placed.order.id].refunded_amount, dec!(20.00));
    let rows: Vec<_> = tables.payment_refunds.iter().filter(|r| r.return_id == Some(ret.id)).collect();
    assert_eq!(rows.len(), 2);
}
