use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::{catalog_item, store_settings, Deps};
use crate::coupons::{self, CouponContext};
use crate::domain::aggregates::{Cart, CartItem, CartOwner, CartView, Coupon, DiscountKind, LineOptions};
use crate::error::{CommerceError, Result};
use crate::pricing::PricingLine;
use crate::store::{Lock, Tx};

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AddItem {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, max = 999))]
    pub quantity: i32,
    #[serde(default)]
    pub options: LineOptions,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AppliedCoupon {
    pub code: String,
    pub kind: DiscountKind,
    pub discount: Decimal,
}

#[derive(Clone)]
pub struct CartService {
    deps: Deps,
}

impl CartService {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    /// The owner's live cart; an expired one is discarded and replaced.
    #[instrument(name = "cart.get_or_create", skip_all, fields(%store_id))]
    pub async fn get_or_create(&self, store_id: Uuid, owner: &CartOwner) -> Result<CartView> {
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let cart = self.open_or_create(&mut *tx, store_id, owner, now).await?;
        let view = self.view(&mut *tx, cart, owner, now).await?;
        tx.commit().await?;
        Ok(view)
    }

    #[instrument(name = "cart.add_item", skip_all, fields(%store_id, product_id = %input.product_id))]
    pub async fn add_item(&self, store_id: Uuid, owner: &CartOwner, input: AddItem) -> Result<CartItem> {
        input.validate()?;
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let mut cart = self.open_or_create(&mut *tx, store_id, owner, now).await?;

        let item = catalog_item(&mut *tx, store_id, input.product_id, input.variant_id, Lock::Shared).await?;
        if !item.is_purchasable() {
            return Err(CommerceError::invalid("product_id", format!("{} is not available", item.sku())));
        }

        let lines = tx.cart_items(cart.id).await?;
        let line = match lines.into_iter().find(|l| l.same_line(input.product_id, input.variant_id, &input.options)) {
            Some(mut existing) => {
                existing.quantity = existing
                    .quantity
                    .checked_add(input.quantity)
                    .ok_or_else(|| CommerceError::invalid("quantity", "quantity out of range"))?;
                if let Some(shortage) = item.shortage(existing.quantity) {
                    return Err(CommerceError::OutOfStock(vec![shortage]));
                }
                existing.updated_at = now;
                tx.update_cart_item(&existing).await?;
                existing
            }
            None => {
                if let Some(shortage) = item.shortage(input.quantity) {
                    return Err(CommerceError::OutOfStock(vec![shortage]));
                }
                let line = CartItem {
                    id: Uuid::now_v7(),
                    cart_id: cart.id,
                    product_id: input.product_id,
                    variant_id: input.variant_id,
                    quantity: input.quantity,
                    unit_price: item.unit_price(),
                    options: input.options,
                    created_at: now,
                    updated_at: now,
                };
                tx.insert_cart_item(&line).await?;
                line
            }
        };

        cart.touch(now, self.deps.defaults.cart_ttl);
        tx.update_cart(&cart).await?;
        tx.commit().await?;
        tracing::debug!(cart_id = %cart.id, quantity = line.quantity, "cart line saved");
        Ok(line)
    }

    /// Sets a line's quantity; zero removes the line and yields `None`.
    #[instrument(name = "cart.update_item", skip_all, fields(%store_id, %item_id, quantity = quantity))]
    pub async fn update_item(&self, store_id: Uuid, owner: &CartOwner, item_id: Uuid, quantity: i32) -> Result<Option<CartItem>> {
        if !(0..=999).contains(&quantity) {
            return Err(CommerceError::invalid("quantity", "quantity must be between 0 and 999"));
        }
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let mut cart = self.existing(&mut *tx, store_id, owner, now).await?;
        let mut line = tx
            .cart_items(cart.id)
            .await?
            .into_iter()
            .find(|l| l.id == item_id)
            .ok_or_else(|| CommerceError::not_found("cart item", item_id))?;

        let updated = if quantity == 0 {
            tx.delete_cart_item(line.id).await?;
            None
        } else {
            let item = catalog_item(&mut *tx, store_id, line.product_id, line.variant_id, Lock::Shared).await?;
            if let Some(shortage) = item.shortage(quantity) {
                return Err(CommerceError::OutOfStock(vec![shortage]));
            }
            line.quantity = quantity;
            line.updated_at = now;
            tx.update_cart_item(&line).await?;
            Some(line)
        };
        cart.touch(now, self.deps.defaults.cart_ttl);
        tx.update_cart(&cart).await?;
        tx.commit().await?;
        Ok(updated)
    }

    #[instrument(name = "cart.remove_item", skip_all, fields(%store_id, %item_id))]
    pub async fn remove_item(&self, store_id: Uuid, owner: &CartOwner, item_id: Uuid) -> Result<()> {
        self.update_item(store_id, owner, item_id, 0).await.map(|_| ())
    }

    #[instrument(name = "cart.clear", skip_all, fields(%store_id))]
    pub async fn clear(&self, store_id: Uuid, owner: &CartOwner) -> Result<()> {
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let Some(mut cart) = self.open(&mut *tx, store_id, owner, now).await? else {
            tx.commit().await?;
            return Ok(());
        };
        tx.clear_cart_items(cart.id).await?;
        cart.coupon_code = None;
        cart.touch(now, self.deps.defaults.cart_ttl);
        tx.update_cart(&cart).await?;
        tx.commit().await
    }

    /// Validates the coupon against the current cart and attaches it.
    /// Checkout validates it again against current prices.
    #[instrument(name = "cart.apply_coupon", skip_all, fields(%store_id, code = %code))]
    pub async fn apply_coupon(&self, store_id: Uuid, owner: &CartOwner, code: &str) -> Result<AppliedCoupon> {
        let code = Coupon::normalize_code(code);
        if code.is_empty() {
            return Err(CommerceError::invalid("code", "coupon code is required"));
        }
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let mut cart = self.existing(&mut *tx, store_id, owner, now).await?;
        let items = tx.cart_items(cart.id).await?;
        if items.is_empty() {
            return Err(CommerceError::invalid("cart", "cart is empty"));
        }
        let coupon = tx
            .coupon_by_code(store_id, &code, Lock::Shared)
            .await?
            .ok_or_else(|| CommerceError::not_found("coupon", &code))?;
        let discount = self.evaluate(&mut *tx, &cart, &items, &coupon, owner, now).await?.into_result()?;

        cart.coupon_code = Some(coupon.code.clone());
        cart.touch(now, self.deps.defaults.cart_ttl);
        tx.update_cart(&cart).await?;
        tx.commit().await?;
        tracing::info!(cart_id = %cart.id, %discount, "coupon applied");
        Ok(AppliedCoupon { code: coupon.code, kind: coupon.kind, discount })
    }

    #[instrument(name = "cart.remove_coupon", skip_all, fields(%store_id))]
    pub async fn remove_coupon(&self, store_id: Uuid, owner: &CartOwner) -> Result<()> {
        let now = self.deps.clock.now();
        let mut tx = self.deps.store.begin().await?;
        let mut cart = self.existing(&mut *tx, store_id, owner, now).await?;
        cart.coupon_code = None;
        cart.touch(now, self.deps.defaults.cart_ttl);
        tx.update_cart(&cart).await?;
        tx.commit().await
    }

    async fn open(&self, tx: &mut dyn Tx, store_id: Uuid, owner: &CartOwner, now: DateTime<Utc>) -> Result<Option<Cart>> {
        match tx.find_cart(store_id, owner).await? {
            Some(cart) if cart.is_expired(now) => {
                tx.delete_cart(cart.id).await?;
                Ok(None)
            }
            found => Ok(found),
        }
    }

    async fn existing(&self, tx: &mut dyn Tx, store_id: Uuid, owner: &CartOwner, now: DateTime<Utc>) -> Result<Cart> {
        self.open(tx, store_id, owner, now)
            .await?
            .ok_or_else(|| CommerceError::not_found("cart", "of this caller"))
    }

    async fn open_or_create(&self, tx: &mut dyn Tx, store_id: Uuid, owner: &CartOwner, now: DateTime<Utc>) -> Result<Cart> {
        if let Some(cart) = self.open(tx, store_id, owner, now).await? {
            return Ok(cart);
        }
        let settings = store_settings(tx, store_id, &self.deps.defaults).await?;
        let cart = Cart::new(store_id, owner, &settings.currency, now, self.deps.defaults.cart_ttl);
        tx.insert_cart(&cart).await?;
        tracing::debug!(cart_id = %cart.id, "cart created");
        Ok(cart)
    }

    async fn evaluate(
        &self,
        tx: &mut dyn Tx,
        cart: &Cart,
        items: &[CartItem],
        coupon: &Coupon,
        owner: &CartOwner,
        now: DateTime<Utc>,
    ) -> Result<coupons::CouponVerdict> {
        let mut lines = Vec::with_capacity(items.len());
        for item in items {
            let catalog = catalog_item(tx, cart.store_id, item.product_id, item.variant_id, Lock::Shared).await?;
            let mut line = PricingLine::from_catalog(&catalog, item.quantity);
            line.unit_price = item.unit_price;
            lines.push(line);
        }
        let user_id = match owner {
            CartOwner::User(id) => Some(*id),
            CartOwner::Guest(_) => None,
        };
        let (user_usage, prior_orders) = match user_id {
            Some(id) => (tx.coupon_usage_count(coupon.id, id).await?, tx.prior_order_count(cart.store_id, id).await?),
            None => (0, 0),
        };
        let currency = store_settings(tx, cart.store_id, &self.deps.defaults).await?.currency()?;
        let subtotal = crate::pricing::subtotal(&lines, &currency);
        let mut verdict = coupons::evaluate(
            coupon,
            &CouponContext { user_id, subtotal, lines: &lines, user_usage, prior_orders, now },
        );
        verdict.discount = currency.round(verdict.discount).min(subtotal);
        Ok(verdict)
    }

    async fn view(&self, tx: &mut dyn Tx, cart: Cart, owner: &CartOwner, now: DateTime<Utc>) -> Result<CartView> {
        let items = tx.cart_items(cart.id).await?;
        let coupon = match &cart.coupon_code {
            Some(code) if !items.is_empty() => tx.coupon_by_code(cart.store_id, code, Lock::Shared).await?,
            _ => None,
        };
        let estimated_discount = match coupon {
            Some(coupon) => {
                let verdict = self.evaluate(tx, &cart, &items, &coupon, owner, now).await?;
                verdict.valid.then_some(verdict.discount)
            }
            None => None,
        };
        let mut view = CartView::new(cart, items);
        view.estimated_discount = estimated_discount;
        Ok(view)
    }
}
