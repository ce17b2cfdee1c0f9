//! Storage port.
//!
//! Services talk to the database only through a [`Tx`]: one unit of work
//! that either commits as a whole or is rolled back when dropped. Row locks
//! requested with [`Lock::Exclusive`] are held until the transaction ends.
//!
//! Two adapters exist: [`PgStore`] for production and [`MemoryStore`] for
//! tests and local runs.

mod memory;
mod postgres;

pub use memory::{MemoryStore, Tables};
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::aggregates::{
    Cart, CartItem, CartOwner, Coupon, CouponUsage, InventoryTransaction, Order, OrderItem,
    OrderStatusHistory, Payment, PaymentRefund, Product, Return, ReturnStatusHistory, StockTarget,
    Variant,
};
use crate::error::Result;
use crate::pricing::{ShippingMethod, StoreSettings};

/// Row-lock mode for reads inside a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lock {
    /// Plain read.
    Shared,
    /// `SELECT ... FOR UPDATE`; concurrent writers wait for this transaction.
    Exclusive,
}

/// Per-store counters backing display numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    Order,
    Return,
}

impl SequenceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Return => "return",
        }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Tx>>;
}

#[async_trait]
pub trait Tx: Send {
    async fn commit(self: Box<Self>) -> Result<()>;

    // Store configuration
    async fn store_settings(&mut self, store_id: Uuid) -> Result<Option<StoreSettings>>;
    async fn shipping_method(&mut self, store_id: Uuid, code: &str) -> Result<Option<ShippingMethod>>;
    async fn tax_rate(&mut self, store_id: Uuid, country: &str) -> Result<Option<Decimal>>;

    // Catalog and inventory
    async fn product(&mut self, id: Uuid, lock: Lock) -> Result<Option<Product>>;
    async fn variant(&mut self, id: Uuid, lock: Lock) -> Result<Option<Variant>>;
    async fn product_variants(&mut self, product_id: Uuid) -> Result<Vec<Variant>>;
    async fn set_stock(&mut self, target: StockTarget, quantity: i32, now: DateTime<Utc>) -> Result<()>;
    async fn insert_inventory_transaction(&mut self, row: &InventoryTransaction) -> Result<()>;

    // Carts
    /// The most recent cart of `owner` in `store_id`, locked.
    async fn find_cart(&mut self, store_id: Uuid, owner: &CartOwner) -> Result<Option<Cart>>;
    async fn cart(&mut self, id: Uuid, lock: Lock) -> Result<Option<Cart>>;
    async fn insert_cart(&mut self, cart: &Cart) -> Result<()>;
    async fn update_cart(&mut self, cart: &Cart) -> Result<()>;
    /// Deletes the cart and its items.
    async fn delete_cart(&mut self, id: Uuid) -> Result<()>;
    async fn delete_expired_carts(&mut self, now: DateTime<Utc>) -> Result<u64>;
    async fn cart_items(&mut self, cart_id: Uuid) -> Result<Vec<CartItem>>;
    async fn insert_cart_item(&mut self, item: &CartItem) -> Result<()>;
    async fn update_cart_item(&mut self, item: &CartItem) -> Result<()>;
    async fn delete_cart_item(&mut self, id: Uuid) -> Result<()>;
    async fn clear_cart_items(&mut self, cart_id: Uuid) -> Result<()>;

    // Coupons
    async fn coupon_by_code(&mut self, store_id: Uuid, code: &str, lock: Lock) -> Result<Option<Coupon>>;
    async fn coupon_usage_count(&mut self, coupon_id: Uuid, user_id: Uuid) -> Result<i64>;
    /// Increments `current_usage` only while it is below `usage_limit`;
    /// returns whether a slot was taken.
    async fn claim_coupon_usage(&mut self, coupon_id: Uuid) -> Result<bool>;
    async fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> Result<()>;
    /// Orders of `user_id` that were not cancelled.
    async fn prior_order_count(&mut self, store_id: Uuid, user_id: Uuid) -> Result<i64>;

    // Orders
    async fn next_sequence(&mut self, store_id: Uuid, kind: SequenceKind) -> Result<i64>;
    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> Result<()>;
    async fn order(&mut self, id: Uuid, lock: Lock) -> Result<Option<Order>>;
    async fn update_order(&mut self, order: &Order) -> Result<()>;
    async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>>;
    /// Appends and returns the entry with its per-order `seq` assigned.
    async fn append_order_history(&mut self, entry: OrderStatusHistory) -> Result<OrderStatusHistory>;
    async fn order_history(&mut self, order_id: Uuid) -> Result<Vec<OrderStatusHistory>>;

    // Payments
    async fn insert_payment(&mut self, payment: &Payment) -> Result<()>;
    async fn update_payment(&mut self, payment: &Payment) -> Result<()>;
    async fn payment_by_intent(&mut self, intent_id: &str, lock: Lock) -> Result<Option<Payment>>;
    async fn payments_for_order(&mut self, order_id: Uuid, lock: Lock) -> Result<Vec<Payment>>;
    /// Payments left in `processing` since before `updated_before`.
    async fn stale_processing_payments(&mut self, updated_before: DateTime<Utc>) -> Result<Vec<Payment>>;
    async fn insert_refund(&mut self, refund: &PaymentRefund) -> Result<()>;
    async fn refunds_for_order(&mut self, order_id: Uuid) -> Result<Vec<PaymentRefund>>;

    // Returns
    async fn insert_return(&mut self, ret: &Return) -> Result<()>;
    async fn update_return(&mut self, ret: &Return) -> Result<()>;
    async fn find_return(&mut self, id: Uuid, lock: Lock) -> Result<Option<Return>>;
    async fn returns_for_order(&mut self, order_id: Uuid) -> Result<Vec<Return>>;
    async fn append_return_history(&mut self, entry: ReturnStatusHistory) -> Result<ReturnStatusHistory>;
    async fn return_history(&mut self, return_id: Uuid) -> Result<Vec<ReturnStatusHistory>>;
}
