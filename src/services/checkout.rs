//! Cart to order conversion.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::{group_deltas, store_settings, Deps, LockedCatalog, StockMove};
use crate::auth::Principal;
use crate::coupons::{self, CouponContext, USAGE_LIMIT_REACHED};
use crate::domain::aggregates::{
    Address, Cart, CartOwner, CatalogItem, CouponUsage, InventoryReason, Order, OrderItem, OrderStatus,
    OrderStatusHistory, PaymentMethod, PaymentStatus,
};
use crate::domain::events::CommerceEvent;
use crate::error::{CommerceError, Result};
use crate::pricing::{self, PricingLine, QuoteRequest};
use crate::store::{Lock, SequenceKind, Tx};

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    /// Defaults to the caller's current cart.
    pub cart_id: Option<Uuid>,
    #[validate(email)]
    pub customer_email: String,
    #[validate(length(min = 1, max = 200))]
    pub customer_name: String,
    #[validate(length(max = 40))]
    pub customer_phone: Option<String>,
    #[validate]
    pub shipping_address: Address,
    /// Defaults to the shipping address.
    #[validate]
    pub billing_address: Option<Address>,
    #[validate(length(min = 1, max = 64))]
    pub shipping_method: String,
    pub payment_method: PaymentMethod,
    #[validate(length(max = 2000))]
    pub customer_notes: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PlacedOrder {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Clone)]
pub struct CheckoutService {
    deps: Deps,
}

impl CheckoutService {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    /// Converts the caller's cart into a pending order in one transaction:
    /// stock is checked and taken under row locks, prices and the coupon are
    /// re-evaluated against the catalog, and the cart is emptied.
    #[instrument(name = "checkout.place_order", skip_all, fields(%store_id))]
    pub async fn checkout(&self, principal: &Principal, store_id: Uuid, request: CheckoutRequest) -> Result<PlacedOrder> {
        request.validate()?;
        let now = self.deps.clock.now();
        let actor_id = principal.actor_id();

        let mut tx = self.deps.store.begin().await?;
        let settings = store_settings(&mut *tx, store_id, &self.deps.defaults).await?;
        let currency = settings.currency()?;

        let mut cart = self.load_cart(&mut *tx, store_id, request.cart_id, principal).await?;
        if cart.is_expired(now) {
            return Err(CommerceError::not_found("cart", cart.id));
        }
        let items = tx.cart_items(cart.id).await?;
        if items.is_empty() {
            return Err(CommerceError::invalid("cart", "cart is empty"));
        }

        let catalog = LockedCatalog::lock(&mut *tx, store_id, items.iter().map(|i| (i.product_id, i.variant_id))).await?;
        let mut resolved: Vec<(CatalogItem, i32)> = Vec::with_capacity(items.len());
        for item in &items {
            let entry = catalog.item(item.product_id, item.variant_id)?;
            if !entry.is_purchasable() {
                return Err(CommerceError::invalid("items", format!("{} is no longer available", entry.sku())));
            }
            resolved.push((entry, item.quantity));
        }

        let demand = group_deltas(resolved.iter().cloned());
        let shortages: Vec<_> = demand.values().filter_map(|(entry, qty)| entry.shortage(*qty)).collect();
        if !shortages.is_empty() {
            tracing::info!(lines = shortages.len(), "checkout rejected: insufficient stock");
            return Err(CommerceError::OutOfStock(shortages));
        }

        let lines: Vec<PricingLine> = resolved.iter().map(|(entry, qty)| PricingLine::from_catalog(entry, *qty)).collect();
        let method = tx
            .shipping_method(store_id, &request.shipping_method)
            .await?
            .ok_or_else(|| CommerceError::invalid("shipping_method", format!("unknown shipping method {}", request.shipping_method)))?;
        let country = request.shipping_address.country.to_ascii_uppercase();
        let tax_rate = tx.tax_rate(store_id, &country).await?.unwrap_or(settings.default_tax_rate);

        let coupon = match &cart.coupon_code {
            Some(code) => {
                let coupon = tx
                    .coupon_by_code(store_id, code, Lock::Exclusive)
                    .await?
                    .ok_or_else(|| CommerceError::Coupon(format!("coupon {code} no longer exists")))?;
                let user_id = principal.user_id();
                let (user_usage, prior_orders) = match user_id {
                    Some(id) => (tx.coupon_usage_count(coupon.id, id).await?, tx.prior_order_count(store_id, id).await?),
                    None => (0, 0),
                };
                let subtotal = pricing::subtotal(&lines, &currency);
                coupons::evaluate(
                    &coupon,
                    &CouponContext { user_id, subtotal, lines: &lines, user_usage, prior_orders, now },
                )
                .into_result()?;
                Some(coupon)
            }
            None => None,
        };

        let quote = pricing::quote(QuoteRequest {
            lines: &lines,
            shipping_method: &method,
            destination_country: &country,
            coupon: coupon.as_ref(),
            tax_rate,
            apply_tax_to_shipping: settings.apply_tax_to_shipping,
            currency: &currency,
        })?;

        let seq = tx.next_sequence(store_id, SequenceKind::Order).await?;
        let (user_id, guest_session_id) = match cart.owner()? {
            CartOwner::User(id) => (Some(id), None),
            CartOwner::Guest(session) => (None, Some(session)),
        };
        let order = Order {
            id: Uuid::now_v7(),
            order_number: format!("ORD-{}-{seq:06}", now.format("%Y%m%d")),
            store_id,
            user_id,
            guest_session_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_method: request.payment_method,
            customer_email: request.customer_email.trim().to_lowercase(),
            customer_name: request.customer_name,
            customer_phone: request.customer_phone,
            billing_address: request.billing_address.unwrap_or_else(|| request.shipping_address.clone()),
            shipping_address: request.shipping_address,
            currency: currency.code().to_string(),
            subtotal: quote.subtotal,
            shipping_total: quote.shipping,
            tax_total: quote.tax,
            discount_total: quote.discount,
            total: quote.total,
            refunded_amount: Decimal::ZERO,
            coupon_code: coupon.as_ref().map(|c| c.code.clone()),
            shipping_method: Some(method.code.clone()),
            tracking_number: None,
            customer_notes: request.customer_notes,
            created_at: now,
            updated_at: now,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
            cancelled_at: None,
            refunded_at: None,
        };
        let order_items: Vec<OrderItem> = quote
            .lines
            .iter()
            .map(|line| OrderItem {
                id: Uuid::now_v7(),
                order_id: order.id,
                product_id: line.product_id,
                variant_id: line.variant_id,
                name: line.name.clone(),
                sku: line.sku.clone(),
                quantity: line.quantity,
                unit_price: line.unit_price,
                line_total: line.line_total,
                created_at: now,
            })
            .collect();

        tx.insert_order(&order, &order_items).await?;
        tx.append_order_history(OrderStatusHistory::entry(order.id, None, OrderStatus::Pending, "Order created", actor_id, now))
            .await?;

        if let Some(coupon) = &coupon {
            if !tx.claim_coupon_usage(coupon.id).await? {
                return Err(CommerceError::Coupon(USAGE_LIMIT_REACHED.to_string()));
            }
            tx.insert_coupon_usage(&CouponUsage {
                id: Uuid::now_v7(),
                coupon_id: coupon.id,
                order_id: order.id,
                user_id,
                discount_amount: quote.discount,
                created_at: now,
            })
            .await?;
        }

        let taken = group_deltas(resolved.into_iter().map(|(entry, qty)| (entry, -qty)));
        StockMove {
            store_id,
            reason: InventoryReason::Sale,
            reference_id: Some(order.id),
            actor_id,
            note: Some(&order.order_number),
            now,
        }
        .apply(&mut *tx, taken)
        .await?;

        tx.clear_cart_items(cart.id).await?;
        cart.coupon_code = None;
        cart.updated_at = now;
        tx.update_cart(&cart).await?;
        tx.commit().await?;

        tracing::info!(order_id = %order.id, order_number = %order.order_number, total = %order.total, "order placed");
        self.deps.events.publish(CommerceEvent::OrderCreated {
            order_id: order.id,
            order_number: order.order_number.clone(),
            total: order.total,
            currency: order.currency.clone(),
            email: order.customer_email.clone(),
        });
        Ok(PlacedOrder { order, items: order_items })
    }

    async fn load_cart(&self, tx: &mut dyn Tx, store_id: Uuid, cart_id: Option<Uuid>, principal: &Principal) -> Result<Cart> {
        let owner = principal.cart_owner()?;
        let cart = match cart_id {
            Some(id) => {
                let cart = tx
                    .cart(id, Lock::Exclusive)
                    .await?
                    .filter(|c| c.store_id == store_id)
                    .ok_or_else(|| CommerceError::not_found("cart", id))?;
                cart.verify_access(&owner)?;
                cart
            }
            None => tx
                .find_cart(store_id, &owner)
                .await?
                .ok_or_else(|| CommerceError::not_found("cart", "of this caller"))?,
        };
        Ok(cart)
    }
}
