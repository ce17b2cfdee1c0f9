//! PostgreSQL adapter.
//!
//! Runs at READ COMMITTED; every read that feeds a decision in the same
//! transaction takes `FOR UPDATE`, and callers lock product and variant rows
//! in ascending id order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{types::Json, PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{Lock, SequenceKind, Store, Tx};
use crate::domain::aggregates::{
    Cart, CartItem, CartOwner, Coupon, CouponUsage, InventoryTransaction, Order, OrderItem,
    OrderStatusHistory, Payment, PaymentRefund, Product, Return, ReturnStatusHistory, StockTarget,
    Variant,
};
use crate::error::Result;
use crate::pricing::{ShippingMethod, StoreSettings};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn Tx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

fn locking(lock: Lock) -> &'static str {
    match lock {
        Lock::Shared => "",
        Lock::Exclusive => " FOR UPDATE",
    }
}

#[async_trait]
impl Tx for PgTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn store_settings(&mut self, store_id: Uuid) -> Result<Option<StoreSettings>> {
        let row = sqlx::query_as::<_, StoreSettings>(
            "SELECT id AS store_id, currency, apply_tax_to_shipping, default_tax_rate FROM stores WHERE id = $1",
        )
        .bind(store_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn shipping_method(&mut self, store_id: Uuid, code: &str) -> Result<Option<ShippingMethod>> {
        let row = sqlx::query_as::<_, ShippingMethod>("SELECT * FROM shipping_methods WHERE store_id = $1 AND code = $2")
            .bind(store_id)
            .bind(code)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn tax_rate(&mut self, store_id: Uuid, country: &str) -> Result<Option<Decimal>> {
        let rate = sqlx::query_scalar::<_, Decimal>("SELECT rate FROM tax_rates WHERE store_id = $1 AND country = upper($2)")
            .bind(store_id)
            .bind(country)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(rate)
    }

    async fn product(&mut self, id: Uuid, lock: Lock) -> Result<Option<Product>> {
        let sql = format!("SELECT * FROM products WHERE id = $1{}", locking(lock));
        Ok(sqlx::query_as::<_, Product>(&sql).bind(id).fetch_optional(&mut *self.tx).await?)
    }

    async fn variant(&mut self, id: Uuid, lock: Lock) -> Result<Option<Variant>> {
        let sql = format!("SELECT * FROM product_variants WHERE id = $1{}", locking(lock));
        Ok(sqlx::query_as::<_, Variant>(&sql).bind(id).fetch_optional(&mut *self.tx).await?)
    }

    async fn product_variants(&mut self, product_id: Uuid) -> Result<Vec<Variant>> {
        Ok(sqlx::query_as::<_, Variant>("SELECT * FROM product_variants WHERE product_id = $1 ORDER BY sku")
            .bind(product_id)
            .fetch_all(&mut *self.tx)
            .await?)
    }

    async fn set_stock(&mut self, target: StockTarget, quantity: i32, now: DateTime<Utc>) -> Result<()> {
        let (sql, id) = match target {
            StockTarget::Product(id) => ("UPDATE products SET inventory_quantity = $2, updated_at = $3 WHERE id = $1", id),
            StockTarget::Variant(id) => ("UPDATE product_variants SET inventory_quantity = $2, updated_at = $3 WHERE id = $1", id),
        };
        sqlx::query(sql).bind(id).bind(quantity).bind(now).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn insert_inventory_transaction(&mut self, row: &InventoryTransaction) -> Result<()> {
        sqlx::query(
            "INSERT INTO inventory_transactions (id, store_id, product_id, variant_id, delta, quantity_after, reason, reference_id, actor_id, note, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(row.id)
        .bind(row.store_id)
        .bind(row.product_id)
        .bind(row.variant_id)
        .bind(row.delta)
        .bind(row.quantity_after)
        .bind(row.reason)
        .bind(row.reference_id)
        .bind(row.actor_id)
        .bind(&row.note)
        .bind(row.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_cart(&mut self, store_id: Uuid, owner: &CartOwner) -> Result<Option<Cart>> {
        let query = match owner {
            CartOwner::User(id) => sqlx::query_as::<_, Cart>(
                "SELECT * FROM carts WHERE store_id = $1 AND user_id = $2 ORDER BY expires_at DESC LIMIT 1 FOR UPDATE",
            )
            .bind(store_id)
            .bind(*id),
            CartOwner::Guest(session) => sqlx::query_as::<_, Cart>(
                "SELECT * FROM carts WHERE store_id = $1 AND session_id = $2 ORDER BY expires_at DESC LIMIT 1 FOR UPDATE",
            )
            .bind(store_id)
            .bind(session.clone()),
        };
        Ok(query.fetch_optional(&mut *self.tx).await?)
    }

    async fn cart(&mut self, id: Uuid, lock: Lock) -> Result<Option<Cart>> {
        let sql = format!("SELECT * FROM carts WHERE id = $1{}", locking(lock));
        Ok(sqlx::query_as::<_, Cart>(&sql).bind(id).fetch_optional(&mut *self.tx).await?)
    }

    async fn insert_cart(&mut self, cart: &Cart) -> Result<()> {
        sqlx::query(
            "INSERT INTO carts (id, store_id, user_id, session_id, coupon_code, currency, created_at, updated_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(cart.id)
        .bind(cart.store_id)
        .bind(cart.user_id)
        .bind(&cart.session_id)
        .bind(&cart.coupon_code)
        .bind(&cart.currency)
        .bind(cart.created_at)
        .bind(cart.updated_at)
        .bind(cart.expires_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_cart(&mut self, cart: &Cart) -> Result<()> {
        sqlx::query("UPDATE carts SET coupon_code = $2, updated_at = $3, expires_at = $4 WHERE id = $1")
            .bind(cart.id)
            .bind(&cart.coupon_code)
            .bind(cart.updated_at)
            .bind(cart.expires_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_cart(&mut self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM carts WHERE id = $1").bind(id).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn delete_expired_carts(&mut self, now: DateTime<Utc>) -> Result<u64> {
        let done = sqlx::query("DELETE FROM carts WHERE expires_at <= $1").bind(now).execute(&mut *self.tx).await?;
        Ok(done.rows_affected())
    }

    async fn cart_items(&mut self, cart_id: Uuid) -> Result<Vec<CartItem>> {
        Ok(sqlx::query_as::<_, CartItem>("SELECT * FROM cart_items WHERE cart_id = $1 ORDER BY created_at, id")
            .bind(cart_id)
            .fetch_all(&mut *self.tx)
            .await?)
    }

    async fn insert_cart_item(&mut self, item: &CartItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO cart_items (id, cart_id, product_id, variant_id, quantity, unit_price, options, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(item.id)
        .bind(item.cart_id)
        .bind(item.product_id)
        .bind(item.variant_id)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(Json(&item.options))
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_cart_item(&mut self, item: &CartItem) -> Result<()> {
        sqlx::query("UPDATE cart_items SET quantity = $2, unit_price = $3, updated_at = $4 WHERE id = $1")
            .bind(item.id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.updated_at)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn delete_cart_item(&mut self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM cart_items WHERE id = $1").bind(id).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn clear_cart_items(&mut self, cart_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM cart_items WHERE cart_id = $1").bind(cart_id).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn coupon_by_code(&mut self, store_id: Uuid, code: &str, lock: Lock) -> Result<Option<Coupon>> {
        let sql = format!("SELECT * FROM coupons WHERE store_id = $1 AND code = $2{}", locking(lock));
        Ok(sqlx::query_as::<_, Coupon>(&sql)
            .bind(store_id)
            .bind(Coupon::normalize_code(code))
            .fetch_optional(&mut *self.tx)
            .await?)
    }

    async fn coupon_usage_count(&mut self, coupon_id: Uuid, user_id: Uuid) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM coupon_usages WHERE coupon_id = $1 AND user_id = $2")
            .bind(coupon_id)
            .bind(user_id)
            .fetch_one(&mut *self.tx)
            .await?)
    }

    async fn claim_coupon_usage(&mut self, coupon_id: Uuid) -> Result<bool> {
        let done = sqlx::query(
            "UPDATE coupons SET current_usage = current_usage + 1 \
             WHERE id = $1 AND (usage_limit IS NULL OR current_usage < usage_limit)",
        )
        .bind(coupon_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> Result<()> {
        sqlx::query(
            "INSERT INTO coupon_usages (id, coupon_id, order_id, user_id, discount_amount, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(usage.id)
        .bind(usage.coupon_id)
        .bind(usage.order_id)
        .bind(usage.user_id)
        .bind(usage.discount_amount)
        .bind(usage.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn prior_order_count(&mut self, store_id: Uuid, user_id: Uuid) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM orders WHERE store_id = $1 AND user_id = $2 AND status <> 'cancelled'",
        )
        .bind(store_id)
        .bind(user_id)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn next_sequence(&mut self, store_id: Uuid, kind: SequenceKind) -> Result<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            "INSERT INTO store_sequences (store_id, kind, value) VALUES ($1, $2, 1) \
             ON CONFLICT (store_id, kind) DO UPDATE SET value = store_sequences.value + 1 RETURNING value",
        )
        .bind(store_id)
        .bind(kind.as_str())
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn insert_order(&mut self, order: &Order, items: &[OrderItem]) -> Result<()> {
        sqlx::query(
            "INSERT INTO orders (id, order_number, store_id, user_id, guest_session_id, status, payment_status, \
             payment_method, customer_email, customer_name, customer_phone, shipping_address, billing_address, currency, subtotal, \
             shipping_total, tax_total, discount_total, total, refunded_amount, coupon_code, shipping_method, \
             tracking_number, customer_notes, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)",
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.store_id)
        .bind(order.user_id)
        .bind(&order.guest_session_id)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(order.payment_method)
        .bind(&order.customer_email)
        .bind(&order.customer_name)
        .bind(&order.customer_phone)
        .bind(Json(&order.shipping_address))
        .bind(Json(&order.billing_address))
        .bind(&order.currency)
        .bind(order.subtotal)
        .bind(order.shipping_total)
        .bind(order.tax_total)
        .bind(order.discount_total)
        .bind(order.total)
        .bind(order.refunded_amount)
        .bind(&order.coupon_code)
        .bind(&order.shipping_method)
        .bind(&order.tracking_number)
        .bind(&order.customer_notes)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *self.tx)
        .await?;

        for item in items {
            sqlx::query(
                "INSERT INTO order_items (id, order_id, product_id, variant_id, name, sku, quantity, unit_price, line_total, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.product_id)
            .bind(item.variant_id)
            .bind(&item.name)
            .bind(&item.sku)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.line_total)
            .bind(item.created_at)
            .execute(&mut *self.tx)
            .await?;
        }
        Ok(())
    }

    async fn order(&mut self, id: Uuid, lock: Lock) -> Result<Option<Order>> {
        let sql = format!("SELECT * FROM orders WHERE id = $1{}", locking(lock));
        Ok(sqlx::query_as::<_, Order>(&sql).bind(id).fetch_optional(&mut *self.tx).await?)
    }

    async fn update_order(&mut self, order: &Order) -> Result<()> {
        sqlx::query(
            "UPDATE orders SET status = $2, payment_status = $3, refunded_amount = $4, tracking_number = $5, \
             updated_at = $6, paid_at = $7, shipped_at = $8, delivered_at = $9, cancelled_at = $10, refunded_at = $11 \
             WHERE id = $1",
        )
        .bind(order.id)
        .bind(order.status)
        .bind(order.payment_status)
        .bind(order.refunded_amount)
        .bind(&order.tracking_number)
        .bind(order.updated_at)
        .bind(order.paid_at)
        .bind(order.shipped_at)
        .bind(order.delivered_at)
        .bind(order.cancelled_at)
        .bind(order.refunded_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn order_items(&mut self, order_id: Uuid) -> Result<Vec<OrderItem>> {
        Ok(sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE order_id = $1 ORDER BY created_at, id")
            .bind(order_id)
            .fetch_all(&mut *self.tx)
            .await?)
    }

    async fn append_order_history(&mut self, entry: OrderStatusHistory) -> Result<OrderStatusHistory> {
        Ok(sqlx::query_as::<_, OrderStatusHistory>(
            "INSERT INTO order_status_history (id, order_id, seq, old_status, new_status, note, actor_id, created_at) \
             SELECT $1, $2, COALESCE(MAX(seq), 0) + 1, $3, $4, $5, $6, $7 FROM order_status_history WHERE order_id = $2 \
             RETURNING *",
        )
        .bind(entry.id)
        .bind(entry.order_id)
        .bind(entry.old_status)
        .bind(entry.new_status)
        .bind(&entry.note)
        .bind(entry.actor_id)
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn order_history(&mut self, order_id: Uuid) -> Result<Vec<OrderStatusHistory>> {
        Ok(sqlx::query_as::<_, OrderStatusHistory>(
            "SELECT * FROM order_status_history WHERE order_id = $1 ORDER BY created_at, seq",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
        sqlx::query(
            "INSERT INTO payments (id, order_id, method, status, amount, currency, intent_id, client_secret, charge_id, \
             refund_amount, refund_reason, failure_reason, created_at, updated_at, completed_at, refunded_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(payment.id)
        .bind(payment.order_id)
        .bind(payment.method)
        .bind(payment.status)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.intent_id)
        .bind(&payment.client_secret)
        .bind(&payment.charge_id)
        .bind(payment.refund_amount)
        .bind(&payment.refund_reason)
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .bind(payment.completed_at)
        .bind(payment.refunded_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        sqlx::query(
            "UPDATE payments SET status = $2, charge_id = $3, refund_amount = $4, refund_reason = $5, failure_reason = $6, \
             updated_at = $7, completed_at = $8, refunded_at = $9 WHERE id = $1",
        )
        .bind(payment.id)
        .bind(payment.status)
        .bind(&payment.charge_id)
        .bind(payment.refund_amount)
        .bind(&payment.refund_reason)
        .bind(&payment.failure_reason)
        .bind(payment.updated_at)
        .bind(payment.completed_at)
        .bind(payment.refunded_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn payment_by_intent(&mut self, intent_id: &str, lock: Lock) -> Result<Option<Payment>> {
        let sql = format!("SELECT * FROM payments WHERE intent_id = $1{}", locking(lock));
        Ok(sqlx::query_as::<_, Payment>(&sql).bind(intent_id).fetch_optional(&mut *self.tx).await?)
    }

    async fn payments_for_order(&mut self, order_id: Uuid, lock: Lock) -> Result<Vec<Payment>> {
        let sql = format!("SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at, id{}", locking(lock));
        Ok(sqlx::query_as::<_, Payment>(&sql).bind(order_id).fetch_all(&mut *self.tx).await?)
    }

    async fn stale_processing_payments(&mut self, updated_before: DateTime<Utc>) -> Result<Vec<Payment>> {
        Ok(sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE status = 'processing' AND updated_at < $1 ORDER BY updated_at LIMIT 100",
        )
        .bind(updated_before)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn insert_refund(&mut self, refund: &PaymentRefund) -> Result<()> {
        sqlx::query(
            "INSERT INTO payment_refunds (id, payment_id, gateway_refund_id, amount, reason, return_id, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(refund.id)
        .bind(refund.payment_id)
        .bind(&refund.gateway_refund_id)
        .bind(refund.amount)
        .bind(&refund.reason)
        .bind(refund.return_id)
        .bind(refund.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn refunds_for_order(&mut self, order_id: Uuid) -> Result<Vec<PaymentRefund>> {
        Ok(sqlx::query_as::<_, PaymentRefund>(
            "SELECT r.* FROM payment_refunds r JOIN payments p ON p.id = r.payment_id \
             WHERE p.order_id = $1 ORDER BY r.created_at, r.id",
        )
        .bind(order_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }

    async fn insert_return(&mut self, ret: &Return) -> Result<()> {
        sqlx::query(
            "INSERT INTO returns (id, return_number, store_id, order_id, user_id, status, reason, reason_details, \
             rejection_reason, items, refund_amount, refund_claim, return_carrier, return_tracking_number, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(ret.id)
        .bind(&ret.return_number)
        .bind(ret.store_id)
        .bind(ret.order_id)
        .bind(ret.user_id)
        .bind(ret.status)
        .bind(ret.reason)
        .bind(&ret.reason_details)
        .bind(&ret.rejection_reason)
        .bind(Json(&ret.items))
        .bind(ret.refund_amount)
        .bind(ret.refund_claim)
        .bind(&ret.return_carrier)
        .bind(&ret.return_tracking_number)
        .bind(ret.created_at)
        .bind(ret.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_return(&mut self, ret: &Return) -> Result<()> {
        sqlx::query(
            "UPDATE returns SET status = $2, rejection_reason = $3, refund_amount = $4, refund_claim = $5, \
             return_carrier = $6, return_tracking_number = $7, updated_at = $8, approved_at = $9, rejected_at = $10, \
             received_at = $11, refunded_at = $12, completed_at = $13, restocked_at = $14 WHERE id = $1",
        )
        .bind(ret.id)
        .bind(ret.status)
        .bind(&ret.rejection_reason)
        .bind(ret.refund_amount)
        .bind(ret.refund_claim)
        .bind(&ret.return_carrier)
        .bind(&ret.return_tracking_number)
        .bind(ret.updated_at)
        .bind(ret.approved_at)
        .bind(ret.rejected_at)
        .bind(ret.received_at)
        .bind(ret.refunded_at)
        .bind(ret.completed_at)
        .bind(ret.restocked_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_return(&mut self, id: Uuid, lock: Lock) -> Result<Option<Return>> {
        let sql = format!("SELECT * FROM returns WHERE id = $1{}", locking(lock));
        Ok(sqlx::query_as::<_, Return>(&sql).bind(id).fetch_optional(&mut *self.tx).await?)
    }

    async fn returns_for_order(&mut self, order_id: Uuid) -> Result<Vec<Return>> {
        Ok(sqlx::query_as::<_, Return>("SELECT * FROM returns WHERE order_id = $1 ORDER BY created_at, id")
            .bind(order_id)
            .fetch_all(&mut *self.tx)
            .await?)
    }

    async fn append_return_history(&mut self, entry: ReturnStatusHistory) -> Result<ReturnStatusHistory> {
        Ok(sqlx::query_as::<_, ReturnStatusHistory>(
            "INSERT INTO return_status_history (id, return_id, seq, old_status, new_status, note, actor_id, created_at) \
             SELECT $1, $2, COALESCE(MAX(seq), 0) + 1, $3, $4, $5, $6, $7 FROM return_status_history WHERE return_id = $2 \
             RETURNING *",
        )
        .bind(entry.id)
        .bind(entry.return_id)
        .bind(entry.old_status)
        .bind(entry.new_status)
        .bind(&entry.note)
        .bind(entry.actor_id)
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await?)
    }

    async fn return_history(&mut self, return_id: Uuid) -> Result<Vec<ReturnStatusHistory>> {
        Ok(sqlx::query_as::<_, ReturnStatusHistory>(
            "SELECT * FROM return_status_history WHERE return_id = $1 ORDER BY created_at, seq",
        )
        .bind(return_id)
        .fetch_all(&mut *self.tx)
        .await?)
    }
}
