//! Cart Aggregate

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CommerceError;

/// Who a cart belongs to. Exactly one of user or guest session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CartOwner {
    User(Uuid),
    Guest(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Cart {
    pub id: Uuid,
    pub store_id: Uuid,
    pub user_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub coupon_code: Option<String>,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Free-form option bag (size, engraving, ...) attached to a line.
pub type LineOptions = BTreeMap<String, String>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub quantity: i32,
    /// Price captured when the line was added; a display estimate only.
    pub unit_price: Decimal,
    #[sqlx(json)]
    pub options: LineOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CartItem {
    pub fn line_total(&self) -> Decimal { self.unit_price * Decimal::from(self.quantity) }

    pub fn same_line(&self, product_id: Uuid, variant_id: Option<Uuid>, options: &LineOptions) -> bool {
        self.product_id == product_id && self.variant_id == variant_id && &self.options == options
    }
}

impl Cart {
    pub fn new(store_id: Uuid, owner: &CartOwner, currency: &str, now: DateTime<Utc>, ttl: Duration) -> Self {
        let (user_id, session_id) = match owner {
            CartOwner::User(id) => (Some(*id), None),
            CartOwner::Guest(session) => (None, Some(session.clone())),
        };
        Self {
            id: Uuid::now_v7(), store_id, user_id, session_id, coupon_code: None,
            currency: currency.to_string(), created_at: now, updated_at: now, expires_at: now + ttl,
        }
    }

    pub fn owner(&self) -> Result<CartOwner, CommerceError> {
        match (&self.user_id, &self.session_id) {
            (Some(user), None) => Ok(CartOwner::User(*user)),
            (None, Some(session)) => Ok(CartOwner::Guest(session.clone())),
            _ => Err(CommerceError::internal(format!("cart {} has ambiguous ownership", self.id))),
        }
    }

    /// Denies access to anyone but the owning user or guest session.
    pub fn verify_access(&self, requester: &CartOwner) -> Result<(), CommerceError> {
        if &self.owner()? != requester {
            return Err(CommerceError::forbidden("cart belongs to another session"));
        }
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now >= self.expires_at }

    /// Records activity and pushes the expiry window forward.
    pub fn touch(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.updated_at = now;
        self.expires_at = now + ttl;
    }
}

pub fn subtotal(items: &[CartItem]) -> Decimal { items.iter().map(CartItem::line_total).sum() }

/// Cart as returned to callers: the row, its lines, and derived totals.
#[derive(Clone, Debug, Serialize)]
pub struct CartView {
    #[serde(flatten)]
    pub cart: Cart,
    pub items: Vec<CartItem>,
    pub item_count: i32,
    pub subtotal: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_discount: Option<Decimal>,
}

impl CartView {
    pub fn new(cart: Cart, mut items: Vec<CartItem>) -> Self {
        items.sort_by_key(|i| (i.created_at, i.id));
        let subtotal = subtotal(&items);
        let item_count = items.iter().map(|i| i.quantity).sum();
        Self { cart, items, item_count, subtotal, estimated_discount: None }
    }
}
