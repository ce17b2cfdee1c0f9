#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::HeaderMap;
use chrono::{TimeZone, Utc};
use commerce_core::auth::Principal;
use commerce_core::clock::{Clock, FixedClock};
use commerce_core::config::StoreDefaults;
use commerce_core::domain::aggregates::{
    Address, Coupon, DiscountKind, Order, OrderStatus, Payment, PaymentMethod, Product,
};
use commerce_core::domain::events::CommerceEvent;
use commerce_core::domain::value_objects::{Currency, Money};
use commerce_core::gateway::{GatewayRegistry, IntentRequest, OfflineGateway, PaymentGateway, SandboxGateway};
use commerce_core::notify::EventPublisher;
use commerce_core::pricing::{ShippingMethod, StoreSettings};
use commerce_core::services::{AddItem, CheckoutRequest, Deps, PaymentSnapshot, PlacedOrder, Services, UpdateOrderStatus};
use commerce_core::store::{MemoryStore, Tables};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::mpsc;
use uuid::Uuid;

pub const GATEWAY_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub sandbox: Arc<SandboxGateway>,
    pub clock: Arc<FixedClock>,
    pub services: Services,
    pub store_id: Uuid,
    pub product: Product,
    events: Mutex<mpsc::Receiver<CommerceEvent>>,
}

/// Store `EUR`, tax 22% for IT on goods and shipping, flat `standard`
/// shipping at 5.00, and `SKU-1` at 10.00 with `stock` units.
pub async fn harness(stock: i32) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let sandbox = Arc::new(SandboxGateway::new());
    let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()));
    let store_id = Uuid::new_v4();
    let now = clock.now();

    let product = Product {
        id: Uuid::new_v4(),
        store_id,
        sku: "SKU-1".into(),
        name: "Widget".into(),
        category_id: None,
        price: dec!(10.00),
        weight: dec!(0.5),
        track_inventory: true,
        allow_backorder: false,
        is_active: true,
        inventory_quantity: stock,
        created_at: now,
        updated_at: now,
    };
    let mut standard = ShippingMethod::flat("standard", dec!(5.00));
    standard.store_id = store_id;

    let seeded = product.clone();
    store
        .seed(move |t: &mut Tables| {
            t.stores.insert(
                store_id,
                StoreSettings { store_id, currency: "EUR".into(), apply_tax_to_shipping: true, default_tax_rate: Decimal::ZERO },
            );
            t.shipping_methods.push(standard);
            t.tax_rates.insert((store_id, "IT".to_string()), dec!(0.22));
            t.products.insert(seeded.id, seeded);
        })
        .await;

    let gateways = GatewayRegistry::new(GATEWAY_TIMEOUT)
        .with(Arc::new(OfflineGateway::new()))
        .with(sandbox.clone());
    let (events, rx) = EventPublisher::new(256);
    let services = Services::new(Deps {
        store: store.clone(),
        gateways: Arc::new(gateways),
        clock: clock.clone(),
        events,
        defaults: StoreDefaults { currency: Currency::eur(), ..StoreDefaults::default() },
    });

    Harness { store, sandbox, clock, services, store_id, product, events: Mutex::new(rx) }
}

pub fn guest(session: &str) -> Principal {
    Principal::guest(session)
}

pub fn admin() -> Principal {
    Principal::Admin { user_id: Uuid::new_v4() }
}

pub fn address() -> Address {
    Address {
        name: "Giulia Rossi".into(),
        street1: "Via Roma 1".into(),
        city: "Milano".into(),
        zip: "20121".into(),
        country: "IT".into(),
        ..Address::default()
    }
}

pub fn checkout_request() -> CheckoutRequest {
    CheckoutRequest {
        cart_id: None,
        customer_email: "Buyer@Example.com".into(),
        customer_name: "Giulia Rossi".into(),
        customer_phone: None,
        shipping_address: address(),
        billing_address: None,
        shipping_method: "standard".into(),
        payment_method: PaymentMethod::Stripe,
        customer_notes: None,
    }
}

pub fn coupon(store_id: Uuid, code: &str, kind: DiscountKind, value: Decimal) -> Coupon {
    let now = Utc::now();
    Coupon {
        id: Uuid::new_v4(),
        store_id,
        code: Coupon::normalize_code(code),
        kind,
        value,
        minimum_purchase: None,
        maximum_discount: None,
        usage_limit: None,
        per_user_limit: None,
        current_usage: 0,
        valid_from: None,
        valid_until: None,
        allowed_product_ids: vec![],
        excluded_product_ids: vec![],
        allowed_category_ids: vec![],
        excluded_category_ids: vec![],
        first_order_only: false,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

impl Harness {
    pub async fn add_to_cart(&self, who: &Principal, quantity: i32) {
        let owner = who.cart_owner().unwrap();
        self.services
            .carts
            .add_item(
                self.store_id,
                &owner,
                AddItem { product_id: self.product.id, variant_id: None, quantity, options: Default::default() },
            )
            .await
            .unwrap();
    }

    pub async fn place_order(&self, who: &Principal, quantity: i32) -> PlacedOrder {
        self.add_to_cart(who, quantity).await;
        self.services.checkout.checkout(who, self.store_id, checkout_request()).await.unwrap()
    }

    /// Places an order and settles it through the sandbox.
    pub async fn paid_order(&self, who: &Principal, quantity: i32) -> (PlacedOrder, String) {
        let placed = self.place_order(who, quantity).await;
        let intent = self
            .services
            .payments
            .create_intent(who, self.store_id, placed.order.id, None)
            .await
            .unwrap();
        self.services
            .payments
            .confirm(who, self.store_id, placed.order.id, &intent.intent_id)
            .await
            .unwrap();
        (placed, intent.intent_id)
    }

    /// Places and pays an order, then walks it through shipment to delivery.
    pub async fn delivered_order(&self, who: &Principal, quantity: i32) -> (PlacedOrder, String) {
        let (placed, intent_id) = self.paid_order(who, quantity).await;
        self.deliver(placed.order.id).await;
        (placed, intent_id)
    }

    pub async fn deliver(&self, order_id: Uuid) {
        for status in [OrderStatus::Shipped, OrderStatus::Delivered] {
            self.services
                .orders
                .update_status(
                    &admin(),
                    self.store_id,
                    order_id,
                    UpdateOrderStatus {
                        status,
                        note: None,
                        tracking_number: Some("TRK-1".into()),
                        allow_partial_refund: false,
                    },
                )
                .await
                .unwrap();
        }
    }

    /// Records a pending payment of `amount` on a sandbox intent of its own,
    /// next to whatever intent the order already has.
    pub async fn open_payment(&self, order: &Order, amount: Decimal) -> String {
        let intent = self
            .sandbox
            .create_intent(&IntentRequest {
                order_id: order.id,
                order_number: order.order_number.clone(),
                amount: Money::new(amount, &Currency::eur()),
                method: PaymentMethod::Stripe,
                customer_email: order.customer_email.clone(),
                idempotency_key: Uuid::new_v4().to_string(),
            })
            .await
            .unwrap();
        let payment = Payment::pending(order.id, PaymentMethod::Stripe, amount, "EUR", intent.intent_id.clone(), self.clock.now());
        self.store.seed(move |t: &mut Tables| { t.payments.insert(payment.id, payment); }).await;
        intent.intent_id
    }

    /// Delivers a sandbox `succeeded` webhook for the intent.
    pub async fn webhook_succeeded(&self, intent_id: &str, charge_id: &str) -> Option<PaymentSnapshot> {
        let body = serde_json::json!({ "intent_id": intent_id, "status": "succeeded", "charge_id": charge_id });
        self.services
            .payments
            .handle_webhook("sandbox", &HeaderMap::new(), body.to_string().as_bytes())
            .await
            .unwrap()
    }

    pub async fn stock(&self) -> i32 {
        self.store.snapshot().await.products[&self.product.id].inventory_quantity
    }

    pub async fn tables(&self) -> Tables {
        self.store.snapshot().await
    }

    /// Events published since the last call.
    pub fn drain_events(&self) -> Vec<CommerceEvent> {
        let mut rx = self.events.lock().unwrap();
        let mut drained = Vec::new();
        while let Ok(event) = rx.try_recv() {
            drained.push(event);
        }
        drained
    }
}
