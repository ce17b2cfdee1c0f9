//! Application services: the named transactional operations of the core.
//!
//! Each operation opens one [`Tx`], validates and mutates inside it, commits,
//! and only then publishes events. Gateway calls never run while a
//! transaction is open, and a task never holds two transactions at once.

mod cart;
mod checkout;
mod inventory;
mod maintenance;
mod orders;
mod payments;
mod returns;

pub use cart::{AddItem, AppliedCoupon, CartService};
pub use checkout::{CheckoutRequest, CheckoutService, PlacedOrder};
pub use inventory::{AdjustInventory, InventoryService, ProductView};
pub use maintenance::{Maintenance, SweepReport};
pub use orders::{CancelOutcome, OrderDetails, OrderService, UpdateOrderStatus};
pub use payments::{PaymentBridge, PaymentIntentView, PaymentSnapshot, RefundOrder, RefundOutcome};
pub use returns::{CreateReturn, ReturnDetails, ReturnService, UpdateReturnStatus};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::StoreDefaults;
use crate::domain::aggregates::{
    CatalogItem, InventoryReason, InventoryTransaction, Order, OrderStatus, OrderStatusHistory,
    Payment, PaymentStatus, Product, StockTarget, TransitionFacts, Variant,
};
use crate::domain::events::CommerceEvent;
use crate::error::{CommerceError, Result};
use crate::gateway::GatewayRegistry;
use crate::notify::EventPublisher;
use crate::pricing::StoreSettings;
use crate::store::{Lock, Store, Tx};

/// Shared handles every service is built from.
#[derive(Clone)]
pub struct Deps {
    pub store: Arc<dyn Store>,
    pub gateways: Arc<GatewayRegistry>,
    pub clock: Arc<dyn Clock>,
    pub events: EventPublisher,
    pub defaults: StoreDefaults,
}

#[derive(Clone)]
pub struct Services {
    pub carts: CartService,
    pub checkout: CheckoutService,
    pub orders: OrderService,
    pub payments: PaymentBridge,
    pub returns: ReturnService,
    pub inventory: InventoryService,
    pub maintenance: Maintenance,
}

impl Services {
    pub fn new(deps: Deps) -> Self {
        let payments = PaymentBridge::new(deps.clone());
        Self {
            carts: CartService::new(deps.clone()),
            checkout: CheckoutService::new(deps.clone()),
            orders: OrderService::new(deps.clone(), payments.clone()),
            returns: ReturnService::new(deps.clone(), payments.clone()),
            inventory: InventoryService::new(deps.clone()),
            maintenance: Maintenance::new(deps, payments.clone()),
            payments,
        }
    }
}

pub(crate) async fn store_settings(tx: &mut dyn Tx, store_id: Uuid, defaults: &StoreDefaults) -> Result<StoreSettings> {
    Ok(tx
        .store_settings(store_id)
        .await?
        .unwrap_or_else(|| StoreSettings::from_defaults(store_id, defaults)))
}

/// Loads a product (and optional variant) of `store_id`; foreign-store rows
/// are reported as absent.
pub(crate) async fn catalog_item(
    tx: &mut dyn Tx,
    store_id: Uuid,
    product_id: Uuid,
    variant_id: Option<Uuid>,
    lock: Lock,
) -> Result<CatalogItem> {
    let product = tx
        .product(product_id, lock)
        .await?
        .filter(|p| p.store_id == store_id)
        .ok_or_else(|| CommerceError::not_found("product", product_id))?;
    let variant = match variant_id {
        Some(id) => Some(tx.variant(id, lock).await?.ok_or_else(|| CommerceError::not_found("variant", id))?),
        None => None,
    };
    CatalogItem::new(product, variant)
}

/// Catalog rows locked for update, products then variants, each in
/// ascending id order.
pub(crate) struct LockedCatalog {
    products: HashMap<Uuid, Product>,
    variants: HashMap<Uuid, Variant>,
}

impl LockedCatalog {
    pub(crate) async fn lock<I>(tx: &mut dyn Tx, store_id: Uuid, keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Uuid, Option<Uuid>)>,
    {
        let mut product_ids = BTreeSet::new();
        let mut variant_ids = BTreeSet::new();
        for (product_id, variant_id) in keys {
            product_ids.insert(product_id);
            variant_ids.extend(variant_id);
        }
        let mut products = HashMap::new();
        for id in product_ids {
            let product = tx
                .product(id, Lock::Exclusive)
                .await?
                .filter(|p| p.store_id == store_id)
                .ok_or_else(|| CommerceError::not_found("product", id))?;
            products.insert(id, product);
        }
        let mut variants = HashMap::new();
        for id in variant_ids {
            let variant = tx
                .variant(id, Lock::Exclusive)
                .await?
                .ok_or_else(|| CommerceError::not_found("variant", id))?;
            variants.insert(id, variant);
        }
        Ok(Self { products, variants })
    }

    pub(crate) fn item(&self, product_id: Uuid, variant_id: Option<Uuid>) -> Result<CatalogItem> {
        let product = self
            .products
            .get(&product_id)
            .cloned()
            .ok_or_else(|| CommerceError::not_found("product", product_id))?;
        let variant = match variant_id {
            Some(id) => Some(self.variants.get(&id).cloned().ok_or_else(|| CommerceError::not_found("variant", id))?),
            None => None,
        };
        CatalogItem::new(product, variant)
    }
}

/// Audit context shared by one batch of stock movements.
pub(crate) struct StockMove<'a> {
    pub store_id: Uuid,
    pub reason: InventoryReason,
    pub reference_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub note: Option<&'a str>,
    pub now: DateTime<Utc>,
}

impl StockMove<'_> {
    /// Applies the summed delta per stock row and appends one audit row each.
    /// Untracked products are left alone.
    pub(crate) async fn apply(&self, tx: &mut dyn Tx, deltas: BTreeMap<StockTarget, (CatalogItem, i32)>) -> Result<Vec<InventoryTransaction>> {
        let mut audit = Vec::new();
        for (target, (item, delta)) in deltas {
            if !item.product.track_inventory || delta == 0 {
                continue;
            }
            let quantity_after = item.apply_delta(delta)?;
            tx.set_stock(target, quantity_after, self.now).await?;
            let row = InventoryTransaction {
                id: Uuid::now_v7(),
                store_id: self.store_id,
                product_id: item.product.id,
                variant_id: item.variant.as_ref().map(|v| v.id),
                delta,
                quantity_after,
                reason: self.reason,
                reference_id: self.reference_id,
                actor_id: self.actor_id,
                note: self.note.map(str::to_string),
                created_at: self.now,
            };
            tx.insert_inventory_transaction(&row).await?;
            audit.push(row);
        }
        Ok(audit)
    }
}

/// Sums deltas per stock row so each row is written once.
pub(crate) fn group_deltas(items: impl IntoIterator<Item = (CatalogItem, i32)>) -> BTreeMap<StockTarget, (CatalogItem, i32)> {
    let mut grouped: BTreeMap<StockTarget, (CatalogItem, i32)> = BTreeMap::new();
    for (item, delta) in items {
        grouped
            .entry(item.stock_target())
            .and_modify(|(_, d)| *d += delta)
            .or_insert((item, delta));
    }
    grouped
}

pub(crate) fn transition_facts(payments: &[Payment], allow_partial_refund: bool) -> TransitionFacts {
    let completed: Vec<&Payment> = payments
        .iter()
        .filter(|p| matches!(p.status, PaymentStatus::Completed | PaymentStatus::Refunded))
        .collect();
    TransitionFacts {
        has_completed_payment: !completed.is_empty(),
        captured: completed.iter().map(|p| p.amount).sum::<Decimal>(),
        allow_partial_refund,
    }
}

/// Validates and applies an order transition, persists the row and appends
/// the history entry. Returns the event to publish after commit.
pub(crate) async fn transition_order(
    tx: &mut dyn Tx,
    order: &mut Order,
    next: OrderStatus,
    facts: TransitionFacts,
    note: &str,
    actor_id: Option<Uuid>,
    now: DateTime<Utc>,
) -> Result<CommerceEvent> {
    let from = order.transition(next, facts, now)?;
    tx.update_order(order).await?;
    tx.append_order_history(OrderStatusHistory::entry(order.id, Some(from), next, note, actor_id, now))
        .await?;
    tracing::info!(order_id = %order.id, %from, to = %next, "order status changed");
    Ok(CommerceEvent::OrderStatusChanged { order_id: order.id, from, to: next, note: note.to_string() })
}

pub(crate) fn publish_all(events: &EventPublisher, batch: Vec<CommerceEvent>) {
    for event in batch {
        events.publish(event);
    }
}
