mod common;

use commerce_core::coupons::USAGE_LIMIT_REACHED;
use commerce_core::domain::aggregates::{DiscountKind, InventoryReason, OrderStatus, PaymentStatus};
use commerce_core::CommerceError;
use common::{checkout_request, coupon, guest, harness};
use rust_decimal_macros::dec;

#[tokio::test]
async fn guest_checkout_prices_and_reserves_stock() {
    let h = harness(5).await;
    let buyer = guest("guest-a");

    let placed = h.place_order(&buyer, 2).await;
    let order = &placed.order;
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.payment_status, PaymentStatus::Pending);
    assert_eq!(order.subtotal, dec!(20.00));
    assert_eq!(order.shipping_total, dec!(5.00));
    assert_eq!(order.tax_total, dec!(5.50));
    assert_eq!(order.discount_total, dec!(0));
    assert_eq!(order.total, dec!(30.50));
    assert_eq!(order.customer_email, "buyer@example.com");
    assert_eq!(order.guest_session_id.as_deref(), Some("guest-a"));
    assert!(order.order_number.starts_with("ORD-20240501-"));
    assert_eq!(placed.items.len(), 1);
    assert_eq!(placed.items[0].unit_price, dec!(10.00));
    assert_eq!(placed.items[0].line_total, dec!(20.00));

    assert_eq!(h.stock().await, 3);
    let tables = h.tables().await;
    let moves: Vec<_> = tables.inventory_transactions.iter().filter(|t| t.reference_id == Some(order.id)).collect();
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].reason, InventoryReason::Sale);
    assert_eq!(moves[0].delta, -2);
    assert_eq!(moves[0].quantity_after, 3);
    assert!(tables.cart_items.is_empty());

    let history: Vec<_> = tables.order_history.iter().filter(|e| e.order_id == order.id).collect();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].old_status, None);
    assert_eq!(history[0].note, "Order created");

    let events = h.drain_events();
    assert!(events.iter().any(|e| e.event_type() == "order.created" && e.order_id() == order.id));
}

#[tokio::test]
async fn capped_percentage_coupon_is_taxed_after_discount() {
    let h = harness(5).await;
    let store_id = h.store_id;
    let mut promo = coupon(store_id, "save50", DiscountKind::Percentage, dec!(50));
    promo.maximum_discount = Some(dec!(3.00));
    promo.usage_limit = Some(10);
    let coupon_id = promo.id;
    h.store.seed(move |t| { t.coupons.insert(promo.id, promo); }).await;

    let buyer = guest("guest-a");
    h.add_to_cart(&buyer, 2).await;
    let applied = h.services.carts.apply_coupon(store_id, &buyer.cart_owner().unwrap(), " Save50 ").await.unwrap();
    assert_eq!(applied.code, "SAVE50");
    assert_eq!(applied.discount, dec!(3.00));

    let placed = h.services.checkout.checkout(&buyer, store_id, checkout_request()).await.unwrap();
    assert_eq!(placed.order.discount_total, dec!(3.00));
    assert_eq!(placed.order.tax_total, dec!(4.84));
    assert_eq!(placed.order.total, dec!(26.84));
    assert_eq!(placed.order.coupon_code.as_deref(), Some("SAVE50"));

    let tables = h.tables().await;
    assert_eq!(tables.coupons[&coupon_id].current_usage, 1);
    assert_eq!(tables.coupon_usages.len(), 1);
    assert_eq!(tables.coupon_usages[0].order_id, placed.order.id);
    assert_eq!(tables.coupon_usages[0].discount_amount, dec!(3.00));
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell() {
    let h = harness(1).await;
    let (a, b) = (guest("guest-a"), guest("guest-b"));
    h.add_to_cart(&a, 1).await;
    h.add_to_cart(&b, 1).await;

    let (first, second) = tokio::join!(
        h.services.checkout.checkout(&a, h.store_id, checkout_request()),
        h.services.checkout.checkout(&b, h.store_id, checkout_request()),
    );
    let (won, lost) = match (first, second) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        (first, second) => panic!("expected exactly one winner, got {first:?} and {second:?}"),
    };
    assert_eq!(won.order.status, OrderStatus::Pending);
    match lost {
        CommerceError::OutOfStock(shortages) => {
            assert_eq!(shortages.len(), 1);
            assert_eq!(shortages[0].sku, "SKU-1");
            assert_eq!(shortages[0].requested, 1);
            assert_eq!(shortages[0].available, 0);
        }
        other => panic!("expected out of stock, got {other:?}"),
    }

    assert_eq!(h.stock().await, 0);
    let tables = h.tables().await;
    assert_eq!(tables.orders.len(), 1);
    // the losing cart keeps its line
    assert_eq!(tables.cart_items.len(), 1);
}

#[tokio::test]
async fn coupon_usage_limit_holds_across_checkouts() {
    let h = harness(5).await;
    let store_id = h.store_id;
    let mut promo = coupon(store_id, "ONCE", DiscountKind::FixedAmount, dec!(5));
    promo.usage_limit = Some(1);
    let coupon_id = promo.id;
    h.store.seed(move |t| { t.coupons.insert(promo.id, promo); }).await;

    let (a, b) = (guest("guest-a"), guest("guest-b"));
    for buyer in [&a, &b] {
        h.add_to_cart(buyer, 1).await;
        h.services.carts.apply_coupon(store_id, &buyer.cart_owner().unwrap(), "once").await.unwrap();
    }

    let first = h.services.checkout.checkout(&a, store_id, checkout_request()).await.unwrap();
    assert_eq!(first.order.discount_total, dec!(5.00));

    let err = h.services.checkout.checkout(&b, store_id, checkout_request()).await.unwrap_err();
    match &err {
        CommerceError::Coupon(reason) => assert_eq!(reason, USAGE_LIMIT_REACHED),
        other => panic!("expected coupon rejection, got {other:?}"),
    }
    assert_eq!(err.kind(), "coupon_error");

    let tables = h.tables().await;
    assert_eq!(tables.coupons[&coupon_id].current_usage, 1);
    assert_eq!(tables.coupon_usages.len(), 1);
    assert_eq!(tables.orders.len(), 1);
    // the rejected checkout took no stock
    assert_eq!(tables.products[&h.product.id].inventory_quantity, 4);
}

#[tokio::test]
async fn empty_cart_cannot_check_out() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    h.services.carts.get_or_create(h.store_id, &buyer.cart_owner().unwrap()).await.unwrap();

    let err = h.services.checkout.checkout(&buyer, h.store_id, checkout_request()).await.unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert!(h.tables().await.orders.is_empty());
}

#[tokio::test]
async fn another_sessions_cart_is_forbidden() {
    let h = harness(5).await;
    let owner = guest("guest-a");
    h.add_to_cart(&owner, 1).await;
    let cart_id = h.tables().await.carts.values().next().map(|c| c.id).unwrap();

    let intruder = guest("guest-b");
    let mut request = checkout_request();
    request.cart_id = Some(cart_id);
    let err = h.services.checkout.checkout(&intruder, h.store_id, request).await.unwrap_err();
    assert_eq!(err.kind(), "permission_error");
    assert_eq!(h.stock().await, 5);
}

#[tokio::test]
async fn unknown_shipping_method_is_rejected() {
    let h = harness(5).await;
    let buyer = guest("guest-a");
    h.add_to_cart(&buyer, 1).await;

    let mut request = checkout_request();
    request.shipping_method = "teleport".into();
    let err = h.services.checkout.checkout(&buyer, h.store_id, request).await.unwrap_err();
    assert_eq!(err.kind(), "validation");
    assert_eq!(h.stock().await, 5);
    assert_eq!(h.tables().await.cart_items.len(), 1);
}

#[tokio::test]
async fn order_numbers_are_sequential_per_store() {
    let h = harness(5).await;
    let first = h.place_order(&guest("guest-a"), 1).await;
    let second = h.place_order(&guest("guest-b"), 1).await;
    assert_eq!(first.order.order_number, "ORD-20240501-000001");
    assert_eq!(second.order.order_number, "ORD-20240501-000002");
}
