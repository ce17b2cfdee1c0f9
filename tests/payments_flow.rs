mod common;

use axum::http::HeaderMap;
use commerce_core::domain::aggregates::{OrderStatus, PaymentMethod, PaymentStatus};
use commerce_core::gateway::{GatewayOutcome, SandboxScript};
use commerce_core::services::RefundOrder;
use commerce_core::CommerceError;
use common::{admin, guest, harness, GATEWAY_TIMEOUT};
use rust_decimal_macros::dec;

#[tokio::test]
async fn confirm_marks_order_paid_once() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let placed = h.place_order(&buyer, 2).await;
    let order_id = placed.order.id;

    let intent = h.services.payments.create_intent(&buyer, h.store_id, order_id, None).await.unwrap();
    assert_eq!(intent.amount, dec!(30.50));
    assert_eq!(intent.status, PaymentStatus::Pending);
    assert!(intent.client_secret.is_some());

    let first = h.services.payments.confirm(&buyer, h.store_id, order_id, &intent.intent_id).await.unwrap();
    assert_eq!(first.payment.status, PaymentStatus::Completed);
    assert_eq!(first.order.status, OrderStatus::Paid);
    assert_eq!(first.order.payment_status, PaymentStatus::Completed);
    assert!(first.order.paid_at.is_some());

    let again = h.services.payments.confirm(&buyer, h.store_id, order_id, &intent.intent_id).await.unwrap();
    assert_eq!(again.payment.status, PaymentStatus::Completed);
    assert_eq!(again.order.status, OrderStatus::Paid);

    let history = h.services.orders.history(&buyer, h.store_id, order_id).await.unwrap();
    let paid: Vec<_> = history.iter().filter(|e| e.new_status == OrderStatus::Paid).collect();
    assert_eq!(paid.len(), 1);
    assert_eq!(paid[0].old_status, Some(OrderStatus::Pending));
    assert_eq!(paid[0].note, "Payment confirmed");

    let completed = h.drain_events().into_iter().filter(|e| e.event_type() == "payment.completed").count();
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn webhook_and_confirm_apply_once() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let placed = h.place_order(&buyer, 1).await;
    let intent = h.services.payments.create_intent(&buyer, h.store_id, placed.order.id, None).await.unwrap();

    let body = serde_json::json!({ "intent_id": intent.intent_id, "status": "succeeded", "charge_id": "ch_hook" });
    let applied = h
        .services
        .payments
        .handle_webhook("sandbox", &HeaderMap::new(), body.to_string().as_bytes())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(applied.order.status, OrderStatus::Paid);
    assert_eq!(applied.payment.charge_id.as_deref(), Some("ch_hook"));

    // the duplicate delivery and the client's own confirm change nothing
    h.services
        .payments
        .handle_webhook("sandbox", &HeaderMap::new(), body.to_string().as_bytes())
        .await
        .unwrap();
    let confirmed = h.services.payments.confirm(&buyer, h.store_id, placed.order.id, &intent.intent_id).await.unwrap();
    assert_eq!(confirmed.payment.charge_id.as_deref(), Some("ch_hook"));

    let tables = h.tables().await;
    let paid = tables.order_history.iter().filter(|e| e.new_status == OrderStatus::Paid).count();
    assert_eq!(paid, 1);
}

#[tokio::test]
async fn webhook_for_unknown_gateway_is_rejected() {
    let h = harness(5).await;
    let err = h
        .services
        .payments
        .handle_webhook("acme-pay", &HeaderMap::new(), b"{}")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "validation");
}

#[tokio::test]
async fn declined_payment_leaves_order_pending() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let placed = h.place_order(&buyer, 1).await;
    let intent = h.services.payments.create_intent(&buyer, h.store_id, placed.order.id, None).await.unwrap();
    h.sandbox.script(SandboxScript::Decline("card declined".into()));

    let err = h.services.payments.confirm(&buyer, h.store_id, placed.order.id, &intent.intent_id).await.unwrap_err();
    match &err {
        CommerceError::PaymentFailed(reason) => assert_eq!(reason, "card declined"),
        other => panic!("expected payment failure, got {other:?}"),
    }

    let tables = h.tables().await;
    let order = &tables.orders[&placed.order.id];
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Failed);
    // stock stays reserved until the order is cancelled
    assert_eq!(tables.products[&h.product.id].inventory_quantity, 4);

    // a fresh intent can still pay the order
    let retry = h.services.payments.create_intent(&buyer, h.store_id, placed.order.id, None).await.unwrap();
    assert_ne!(retry.intent_id, intent.intent_id);
    let paid = h.services.payments.confirm(&buyer, h.store_id, placed.order.id, &retry.intent_id).await.unwrap();
    assert_eq!(paid.order.status, OrderStatus::Paid);
}

#[tokio::test(start_paused = true)]
async fn slow_gateway_leaves_payment_processing() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let placed = h.place_order(&buyer, 1).await;
    let intent = h.services.payments.create_intent(&buyer, h.store_id, placed.order.id, None).await.unwrap();
    h.sandbox.script(SandboxScript::Delay(GATEWAY_TIMEOUT * 5));

    let err = h.services.payments.confirm(&buyer, h.store_id, placed.order.id, &intent.intent_id).await.unwrap_err();
    assert_eq!(err.kind(), "payment_pending");

    let tables = h.tables().await;
    let payment = tables.payments.values().find(|p| p.intent_id == intent.intent_id).unwrap();
    assert_eq!(payment.status, PaymentStatus::Processing);
    assert_eq!(tables.orders[&placed.order.id].status, OrderStatus::Pending);

    let settled = h.services.payments.confirm(&buyer, h.store_id, placed.order.id, &intent.intent_id).await.unwrap();
    assert_eq!(settled.payment.status, PaymentStatus::Completed);
    assert_eq!(settled.order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn sweep_settles_stale_processing_payments() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let placed = h.place_order(&buyer, 1).await;
    let intent = h.services.payments.create_intent(&buyer, h.store_id, placed.order.id, None).await.unwrap();
    h.sandbox.script(SandboxScript::Pending);

    let err = h.services.payments.confirm(&buyer, h.store_id, placed.order.id, &intent.intent_id).await.unwrap_err();
    assert_eq!(err.kind(), "payment_pending");

    // too recent to be swept
    assert_eq!(h.services.maintenance.reconcile_stale_payments(chrono::Duration::minutes(5)).await.unwrap(), 0);

    h.sandbox.settle(&intent.intent_id, GatewayOutcome::Succeeded { charge_id: Some("ch_late".into()) });
    h.clock.advance(chrono::Duration::minutes(10));
    let reconciled = h.services.maintenance.reconcile_stale_payments(chrono::Duration::minutes(5)).await.unwrap();
    assert_eq!(reconciled, 1);

    let tables = h.tables().await;
    let order = &tables.orders[&placed.order.id];
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_status, PaymentStatus::Completed);
}

#[tokio::test]
async fn cancelling_a_paid_order_restocks_and_refunds() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let (placed, intent_id) = h.paid_order(&buyer, 2).await;
    assert_eq!(h.stock().await, 3);

    // customers may only cancel pending orders
    let err = h.services.orders.cancel(&buyer, h.store_id, placed.order.id, None).await.unwrap_err();
    assert_eq!(err.kind(), "permission_error");

    let outcome = h.services.orders.cancel(&admin(), h.store_id, placed.order.id, Some("out of season")).await.unwrap();
    assert_eq!(outcome.refunded, dec!(30.50));
    assert!(outcome.refund_error.is_none());
    assert_eq!(outcome.order.status, OrderStatus::Cancelled);
    assert_eq!(outcome.order.payment_status, PaymentStatus::Refunded);
    assert_eq!(outcome.order.refunded_amount, dec!(30.50));

    assert_eq!(h.stock().await, 5);
    assert_eq!(h.sandbox.refunded(&intent_id), dec!(30.50));

    let history = h.services.orders.history(&admin(), h.store_id, placed.order.id).await.unwrap();
    let last = history.last().unwrap();
    assert_eq!(last.new_status, OrderStatus::Cancelled);
    assert_eq!(last.note, "Order cancelled: out of season");
}

#[tokio::test]
async fn partial_refund_keeps_order_status() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let (placed, _) = h.paid_order(&buyer, 2).await;

    let err = h
        .services
        .payments
        .refund(&buyer, h.store_id, placed.order.id, RefundOrder { amount: Some(dec!(5)), reason: None })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "permission_error");

    let partial = h
        .services
        .payments
        .refund(&admin(), h.store_id, placed.order.id, RefundOrder { amount: Some(dec!(10.50)), reason: Some("damaged box".into()) })
        .await
        .unwrap();
    assert_eq!(partial.refunded, dec!(10.50));
    assert_eq!(partial.order.status, OrderStatus::Paid);
    assert_eq!(partial.order.refunded_amount, dec!(10.50));

    let too_much = h
        .services
        .payments
        .refund(&admin(), h.store_id, placed.order.id, RefundOrder { amount: Some(dec!(25)), reason: None })
        .await
        .unwrap_err();
    assert_eq!(too_much.kind(), "validation");

    let rest = h.services.payments.refund(&admin(), h.store_id, placed.order.id, RefundOrder::default()).await.unwrap();
    assert_eq!(rest.refunded, dec!(20.00));
    assert_eq!(rest.order.status, OrderStatus::Refunded);
    assert_eq!(rest.order.payment_status, PaymentStatus::Refunded);
    assert_eq!(h.tables().await.payment_refunds.len(), 2);
}

#[tokio::test]
async fn offline_payments_are_captured_by_an_operator() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let placed = h.place_order(&buyer, 1).await;
    let intent = h
        .services
        .payments
        .create_intent(&buyer, h.store_id, placed.order.id, Some(PaymentMethod::BankTransfer))
        .await
        .unwrap();

    let err = h.services.payments.capture_offline(&buyer, h.store_id, &intent.intent_id).await.unwrap_err();
    assert_eq!(err.kind(), "permission_error");

    let captured = h.services.payments.capture_offline(&admin(), h.store_id, &intent.intent_id).await.unwrap();
    assert_eq!(captured.payment.status, PaymentStatus::Completed);
    assert_eq!(captured.order.status, OrderStatus::Paid);
}

#[tokio::test]
async fn sweep_reports_both_jobs() {
    let h = harness(5).await;
    h.add_to_cart(&guest("guest-a"), 1).await;
    h.clock.advance(chrono::Duration::days(30));

    let report = h.services.maintenance.sweep().await.unwrap();
    assert_eq!(report.expired_carts, 1);
    assert_eq!(report.reconciled_payments, 0);
    let tables = h.tables().await;
    assert!(tables.carts.is_empty());
    assert!(tables.cart_items.is_empty());
}

#[tokio::test]
async fn repeated_intent_requests_share_the_open_intent() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let placed = h.place_order(&buyer, 2).await;
    let order_id = placed.order.id;

    let first = h.services.payments.create_intent(&buyer, h.store_id, order_id, None).await.unwrap();
    let again = h.services.payments.create_intent(&buyer, h.store_id, order_id, None).await.unwrap();
    assert_eq!(again.intent_id, first.intent_id);
    assert_eq!(again.client_secret, first.client_secret);
    assert_eq!(h.tables().await.payments.len(), 1);

    let switched = h
        .services
        .payments
        .create_intent(&buyer, h.store_id, order_id, Some(PaymentMethod::BankTransfer))
        .await
        .unwrap_err();
    assert_eq!(switched.kind(), "conflict");

    h.services.payments.confirm(&buyer, h.store_id, order_id, &first.intent_id).await.unwrap();
    let paid = h.services.payments.create_intent(&buyer, h.store_id, order_id, None).await.unwrap_err();
    assert_eq!(paid.kind(), "state_error");
    assert_eq!(h.tables().await.payments.len(), 1);
}

#[tokio::test]
async fn capture_beyond_the_order_total_is_refunded() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    let (placed, first) = h.paid_order(&buyer, 2).await;
    let second = h.open_payment(&placed.order, dec!(30.50)).await;

    let snapshot = h.webhook_succeeded(&second, "ch_twice").await.unwrap();
    assert_eq!(snapshot.payment.status, PaymentStatus::Refunded);
    assert_eq!(snapshot.payment.refund_amount, dec!(30.50));
    assert_eq!(h.sandbox.refunded(&second), dec!(30.50));
    assert_eq!(h.sandbox.refunded(&first), dec!(0));

    // a redelivered webhook moves no more money
    h.webhook_succeeded(&second, "ch_twice").await;
    assert_eq!(h.sandbox.refunded(&second), dec!(30.50));

    let tables = h.tables().await;
    let order = &tables.orders[&placed.order.id];
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.payment_status, PaymentStatus::Completed);
    assert_eq!(order.refunded_amount, dec!(0));
    assert_eq!(tables.payment_refunds.len(), 1);

    // the order's own balance is still fully refundable
    let full = h.services.payments.refund(&admin(), h.store_id, placed.order.id, RefundOrder::default()).await.unwrap();
    assert_eq!(full.refunded, dec!(30.50));
    assert_eq!(full.order.status, OrderStatus::Refunded);
    assert_eq!(h.sandbox.refunded(&first), dec!(30.50));
}
