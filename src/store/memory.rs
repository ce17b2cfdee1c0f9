//! In-memory adapter.
//!
//! A single writer at a time: `begin` takes the store-wide lock and works on a
//! copy of the tables; `commit` swaps the copy in, dropping the transaction
//! discards it. This gives every transaction serializable isolation, which is
//! stricter than the row locks the Postgres adapter takes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{Lock, SequenceKind, Store, Tx};
use crate::domain::aggregates::{
    Cart, CartItem, CartOwner, Coupon, CouponUsage, InventoryTransaction, Order, OrderItem,
    OrderStatus, OrderStatusHistory, Payment, PaymentRefund, PaymentStatus, Product, Return,
    ReturnStatusHistory, StockTarget, Variant,
};
use crate::error::{CommerceError, Result};
use crate::pricing::{ShippingMethod, StoreSettings};

/// Every table of the schema, held in plain collections.
#[derive(Clone, Debug, Default)]
pub struct Tables {
    pub stores: HashMap<Uuid, StoreSettings>,
    pub shipping_methods: Vec<ShippingMethod>,
    pub tax_rates: HashMap<(Uuid, String), Decimal>,
    pub products: HashMap<Uuid, Product>,
    pub variants: HashMap<Uuid, Variant>,
    pub inventory_transactions: Vec<InventoryTransaction>,
    pub carts: HashMap<Uuid, Cart>,
    pub cart_items: BTreeMap<Uuid, CartItem>,
    pub coupons: HashMap<Uuid, Coupon>,
    pub coupon_usages: Vec<CouponUsage>,
    pub sequences: HashMap<(Uuid, SequenceKind), i64>,
    pub orders: HashMap<Uuid, Order>,
    pub order_items: Vec<OrderItem>,
    pub order_history: Vec<OrderStatusHistory>,
    pub payments: HashMap<Uuid, Payment>,
    pub payment_refunds: Vec<PaymentRefund>,
    pub returns: HashMap<Uuid, Return>,
    pub return_history: Vec<ReturnStatusHistory>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes fixtures directly, outside any transaction.
    pub async fn seed(&self, f: impl FnOnce(&mut Tables)) {
        let mut tables = self.tables.lock().await;
        f(&mut tables);
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> Tables {
        self.tables.lock().await.clone()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn Tx>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

fn missing(entity: &'static str, id: impl ToString) -> CommerceError {
    CommerceError::internal(format!("{entity} {} vanished inside a transaction", id.to_string()))
}

fn unique(what: &str) -> CommerceError {
    CommerceError::Conflict(format!("duplicate {what}"))
}

#[async_trait]
impl Tx for MemoryTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn store_settings(&mut self, store_id: Uuid) -> Result<Option<StoreSettings>> {
        Ok(self.working.stores.get(&store_id).cloned())
    }

    async fn shipping_method(&mut self, store_id: Uuid, code: &str) -> Result<Option<ShippingMethod>> {
        Ok(self
            .working
            .shipping_methods
            .iter()
            .find(|m| m.store_id == store_id && m.code == code)
            .cloned())
    }

    async fn tax_rate(&mut self, store_id: Uuid, country: &str) -> Result<Option<Decimal>> {
        Ok(self.working.tax_rates.get(&(store_id, country.to_ascii_uppercase())).copied())
    }

    async fn product(&mut self, id: Uuid, _lock: Lock) -> Result<Option<Product>> {
        Ok(self.working.products.get(&id).cloned())
    }

    async fn variant(&mut self, id: Uuid, _lock: Lock) -> Result<Option<Variant>> {
        Ok(self.working.variants.get(&id).cloned())
    }

    async fn product_variants(&mut self, product_id: Uuid) -> Result<Vec<Variant>> {
        let mut variants: Vec<Variant> = self
            .working
            .variants
            .values()
            .filter(|v| v.product_id == product_id)
            .cloned()
            .collect();
        variants.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(variants)
    }

    async fn set_stock(&mut self, target: StockTarget, quantity: i32, now: DateTime<Utc>) -> Result<()> {
        match target {
            StockTarget::Product(id) => {
                let product = self.working.products.get_mut(&id).ok_or_else(|| missing("product", id))?;
                product.inventory_quantity = quantity;
                product.updated_at = now;
            }
            StockTarget::Variant(id) => {
                let variant = self.working.variants.get_mut(&id).ok_or_else(|| missing("variant", id))?;
                variant.inventory_quantity = quantity;
                variant.updated_at = now;
            }
        }
        Ok(())
    }

    async fn insert_inventory_transaction(&mut self, row: &InventoryTransaction) -> Result<()> {
        self.working.inventory_transactions.push(row.clone());
        Ok(())
    }

    async fn find_cart(&mut self, store_id: Uuid, owner: &CartOwner) -> Result<Option<Cart>> {
        Ok(self
            .working
            .carts
            .values()
            .filter(|c| c.store_id == store_id)
            .filter(|c| match owner {
                CartOwner::User(id) => c.user_id == Some(*id),
                CartOwner::Guest(session) => c.session_id.as_deref() == Some(session.as_str()),
            })
            .max_by_key(|c| c.expires_at)
            .cloned())
    }

    async fn cart(&mut self, id: Uuid, _lock: Lock) -> Result<Option<Cart>> {
        Ok(self.working.carts.get(&id).cloned())
    }

    async fn insert_cart(&mut self, cart: &Cart) -> Result<()> {
        let taken = self.working.carts.values().any(|c| {
            c.store_id == cart.store_id
                && ((cart.user_id.is_some() && c.user_id == cart.user_id)
                    || (cart.session_id.is_some() && c.session_id == cart.session_id))
        });
        if taken {
            return Err(unique("cart owner"));
        }
        self.working.carts.insert(cart.id, cart.clone());
        Ok(())
    }

    async fn update_cart(&mut self, cart: &Cart) -> Result<()> {
        let row = self.working.carts.get_mut(&cart.id).ok_or_else(|| missing("cart", cart.id))?;
        *row = cart.clone();
        Ok(())
    }

    async fn delete_cart(&mut self, id: Uuid) -> Result<()> {
        self.working.carts.remove(&id);
        self.working.cart_items.retain(|_, item| item.cart_id != id);
        Ok(())
    }

    async fn delete_expired_carts(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let expired: Vec<Uuid> = self
            .working
            .carts
            .values()
            .filter(|c| c.is_expired(now))
            .map(|c| c.id)
            .collect();
        for id in &expired {
            self.delete_cart(*id).await?;
        }
        Ok(expired.len() as u64)
    }

    async fn cart_items(&mut self, cart_id: Uuid) -> Result<Vec<CartItem>> {
        let mut items: Vec<CartItem> = self
            .working
            .cart_items
            .values()
            .filter(|i| i.cart_id == cart_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| (i.created_at, i.id));
        Ok(items)
    }

    async fn insert_cart_item(&mut self, item: &CartItem) -> Result<()> {
        if !self.working.carts.contains_key(&item.cart_id) {
            return Err(missing("cart", item.cart_id));
        }
        self.working.cart_items.insert(item.id, item.clone());
        Ok(())
    }

    async fn update_cart_item(&mut self, item: &CartItem) -> Result<()> {
        let row = self.working.cart_items.get_mut(&item.id).ok_or_else(|| missing("cart item", item.id))?;
        *row = item.clone();
        Ok(())
    }

    async fn delete_cart_item(&mut self, id: Uuid) -> Result<()> {
        self.working.cart_items.remove(&id);
        Ok(())
    }

    async fn clear_cart_items(&mut self, cart_id: Uuid) -> Result<()> {
        self.working.cart_items.retain(|_, item| item.cart_id != cart_id);
        Ok(())
    }

    async fn coupon_by_code(&mut self, store_id: Uuid, code: &str, _lock: Lock) -> Result<Option<Coupon>> {
        let code = Coupon::normalize_code(code);
        Ok(self
            .working
            .coupons
            .values()
            .find(|c| c.store_id == store_id && c.code == code)
            .cloned())
    }

    async fn coupon_usage_count(&mut self, coupon_id: Uuid, user_id: Uuid) -> Result<i64> {
        Ok(self
            .working
            .coupon_usages
            .iter()
            .filter(|u| u.coupon_id == coupon_id && u.user_id == Some(user_id))
            .count() as i64)
    }

    async fn claim_coupon_usage(&mut self, coupon_id: Uuid) -> Result<bool> {
        let coupon = self.working.coupons.get_mut(&coupon_id).ok_or_else(|| missing("coupon", coupon_id))?;
        if coupon.is_exhausted() {
            return Ok(false);
        }
        coupon.current_usage += 1;
        Ok(true)
    }

    async fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> Result<()> {
        if self.working.coupon_usages.iter().any(|u| u.coupon_id == usage.coupon_id && u.order_id == usage.order_id) {
            return Err(unique("coupon usage"));
        }
        self.working.coupon_usages.push(usage.clone());
        Ok(())
    }

    async fn prior_order_count(&mut self, store_id: Uuid, user_id: Uuid) -> Result<i64> {
        Ok(self
            .working
            .orders
            .values()
            .filter(|o| o.store_id == store_id && o.user_id == Some(user_id) && o.status != OrderStatus::Cancelled)
            .count() as i64)
    }

    async fn next_sequence(&mut self, store_id: Uuid, kind: SequenceKind) -> Result<i64> {
        let value = self.working.sequences.entry((store_id, kind)).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> Result<()> {
        if self
            .working
            .orders
            .values()
            .any(|o| o.store_id == order.store_id && o.order_number == order.order_number)
        {
            return Err(unique("order number"));
        }
        self.working.orders.insert(order.id, order.clone());
        self.working.order_items.extend(items.iter().cloned());
        Ok(())
    }

    async fn order(&mut self, id: Uuid, _lock: Lock) -> Result<Option<Order>> {
        Ok(self.working.orders.get(&id).cloned())
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        let row = self.working.orders.get_mut(&order.id).ok_or_else(|| missing("order", order.id))?;
        *row = order.clone();
        Ok(())
    }

    async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        Ok(self.working.order_items.iter().filter(|i| i.order_id == order_id).cloned().collect())
    }

    async fn append_order_history(&mut self, mut entry: OrderStatusHistory) -> Result<OrderStatusHistory> {
        let last = self
            .working
            .order_history
            .iter()
            .filter(|h| h.order_id == entry.order_id)
            .map(|h| h.seq)
            .max()
            .unwrap_or(0);
        entry.seq = last + 1;
        self.working.order_history.push(entry.clone());
        Ok(entry)
    }

    async fn order_history(&mut self, order_id: Uuid) -> Result<Vec<OrderStatusHistory>> {
        Ok(self.working.order_history.iter().filter(|h| h.order_id == order_id).cloned().collect())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
        if self.working.payments.values().any(|p| p.intent_id == payment.intent_id) {
            return Err(unique("payment intent"));
        }
        self.working.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        let row = self.working.payments.get_mut(&payment.id).ok_or_else(|| missing("payment", payment.id))?;
        *row = payment.clone();
        Ok(())
    }

    async fn payment_by_intent(&mut self, intent_id: &str, _lock: Lock) -> Result<Option<Payment>> {
        Ok(self.working.payments.values().find(|p| p.intent_id == intent_id).cloned())
    }

    async fn payments_for_order(&mut self, order_id: Uuid, _lock: Lock) -> Result<Vec<Payment>> {
        let mut payments: Vec<Payment> =
            self.working.payments.values().filter(|p| p.order_id == order_id).cloned().collect();
        payments.sort_by_key(|p| (p.created_at, p.id));
        Ok(payments)
    }

    async fn stale_processing_payments(&mut self, updated_before: DateTime<Utc>) -> Result<Vec<Payment>> {
        Ok(self
            .working
            .payments
            .values()
            .filter(|p| p.status == PaymentStatus::Processing && p.updated_at < updated_before)
            .cloned()
            .collect())
    }

    async fn insert_refund(&mut self, refund: &PaymentRefund) -> Result<()> {
        self.working.payment_refunds.push(refund.clone());
        Ok(())
    }

    async fn refunds_for_order(&mut self, order_id: Uuid) -> Result<Vec<PaymentRefund>> {
        let payments = &self.working.payments;
        Ok(self
            .working
            .payment_refunds
            .iter()
            .filter(|r| payments.get(&r.payment_id).map_or(false, |p| p.order_id == order_id))
            .cloned()
            .collect())
    }

    async fn insert_return(&mut self, ret: &Return) -> Result<()> {
        self.working.returns.insert(ret.id, ret.clone());
        Ok(())
    }

    async fn update_return(&mut self, ret: &Return) -> Result<()> {
        let row = self.working.returns.get_mut(&ret.id).ok_or_else(|| missing("return", ret.id))?;
        *row = ret.clone();
        Ok(())
    }

    async fn find_return(&mut self, id: Uuid, _lock: Lock) -> Result<Option<Return>> {
        Ok(self.working.returns.get(&id).cloned())
    }

    async fn returns_for_order(&mut self, order_id: Uuid) -> Result<Vec<Return>> {
        let mut returns: Vec<Return> =
            self.working.returns.values().filter(|r| r.order_id == order_id).cloned().collect();
        returns.sort_by_key(|r| (r.created_at, r.id));
        Ok(returns)
    }

    async fn append_return_history(&mut self, mut entry: ReturnStatusHistory) -> Result<ReturnStatusHistory> {
        let last = self
            .working
            .return_history
            .iter()
            .filter(|h| h.return_id == entry.return_id)
            .map(|h| h.seq)
            .max()
            .unwrap_or(0);
        entry.seq = last + 1;
        self.working.return_history.push(entry.clone());
        Ok(entry)
    }

    async fn return_history(&mut self, return_id: Uuid) -> Result<Vec<ReturnStatusHistory>> {
        Ok(self.working.return_history.iter().filter(|h| h.return_id == return_id).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::product::fixtures::product;

    #[tokio::test]
    async fn dropped_transaction_rolls_back() {
        let store = MemoryStore::new();
        let p = product(5);
        let id = p.id;
        store.seed(|t| { t.products.insert(id, p); }).await;

        let mut tx = store.begin().await.unwrap();
        tx.set_stock(StockTarget::Product(id), 1, Utc::now()).await.unwrap();
        drop(tx);
        assert_eq!(store.snapshot().await.products[&id].inventory_quantity, 5);

        let mut tx = store.begin().await.unwrap();
        tx.set_stock(StockTarget::Product(id), 2, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.snapshot().await.products[&id].inventory_quantity, 2);
    }

    #[tokio::test]
    async fn sequences_are_per_store_and_kind() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let a = Uuid::new_v4();
        assert_eq!(tx.next_sequence(a, SequenceKind::Order).await.unwrap(), 1);
        assert_eq!(tx.next_sequence(a, SequenceKind::Order).await.unwrap(), 2);
        assert_eq!(tx.next_sequence(a, SequenceKind::Return).await.unwrap(), 1);
        assert_eq!(tx.next_sequence(Uuid::new_v4(), SequenceKind::Order).await.unwrap(), 1);
    }
}
