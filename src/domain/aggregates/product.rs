//! Catalog view: products, variants and the inventory audit trail.
//!
//! The core never edits catalog attributes; it only reads them for pricing and
//! moves stock through [`InventoryTransaction`]s.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CommerceError, StockShortage};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Product {
    pub id: Uuid,
    pub store_id: Uuid,
    pub sku: String,
    pub name: String,
    pub category_id: Option<Uuid>,
    pub price: Decimal,
    /// Kilograms.
    pub weight: Decimal,
    pub track_inventory: bool,
    pub allow_backorder: bool,
    pub is_active: bool,
    pub inventory_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Variant {
    pub id: Uuid,
    pub product_id: Uuid,
    pub sku: String,
    pub name: String,
    /// Overrides the product price when set.
    pub price: Option<Decimal>,
    pub weight: Option<Decimal>,
    pub is_active: bool,
    pub inventory_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Whether checkout must hold stock for this product.
    pub fn enforces_stock(&self) -> bool {
        self.track_inventory && !self.allow_backorder
    }
}

/// The row whose `inventory_quantity` moves: a variant when one is selected,
/// otherwise the product itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StockTarget {
    Product(Uuid),
    Variant(Uuid),
}

/// A purchasable unit: a product, optionally narrowed to one variant.
#[derive(Clone, Debug, PartialEq)]
pub struct CatalogItem {
    pub product: Product,
    pub variant: Option<Variant>,
}

impl CatalogItem {
    pub fn new(product: Product, variant: Option<Variant>) -> Result<Self, CommerceError> {
        if let Some(v) = &variant {
            if v.product_id != product.id {
                return Err(CommerceError::not_found("variant", v.id));
            }
        }
        Ok(Self { product, variant })
    }

    pub fn is_purchasable(&self) -> bool {
        self.product.is_active && self.variant.as_ref().map_or(true, |v| v.is_active)
    }

    pub fn unit_price(&self) -> Decimal {
        self.variant
            .as_ref()
            .and_then(|v| v.price)
            .unwrap_or(self.product.price)
    }

    pub fn unit_weight(&self) -> Decimal {
        self.variant
            .as_ref()
            .and_then(|v| v.weight)
            .unwrap_or(self.product.weight)
    }

    pub fn sku(&self) -> &str {
        self.variant.as_ref().map_or(&self.product.sku, |v| &v.sku)
    }

    pub fn display_name(&self) -> String {
        match &self.variant {
            Some(v) => format!("{} - {}", self.product.name, v.name),
            None => self.product.name.clone(),
        }
    }

    pub fn stock_target(&self) -> StockTarget {
        match &self.variant {
            Some(v) => StockTarget::Variant(v.id),
            None => StockTarget::Product(self.product.id),
        }
    }

    pub fn stock(&self) -> i32 {
        self.variant
            .as_ref()
            .map_or(self.product.inventory_quantity, |v| v.inventory_quantity)
    }

    /// Checks `requested` units against stock, returning the shortage if any.
    pub fn shortage(&self, requested: i32) -> Option<StockShortage> {
        if !self.product.enforces_stock() || self.stock() >= requested {
            return None;
        }
        Some(StockShortage {
            product_id: self.product.id,
            variant_id: self.variant.as_ref().map(|v| v.id),
            sku: self.sku().to_string(),
            requested,
            available: self.stock().max(0),
        })
    }

    /// Stock level after applying `delta`, refusing to go negative unless
    /// the product allows backorders.
    pub fn apply_delta(&self, delta: i32) -> Result<i32, CommerceError> {
        let next = self.stock().checked_add(delta).ok_or_else(|| {
            CommerceError::invalid("delta", "inventory adjustment overflows")
        })?;
        if next < 0 && !self.product.allow_backorder {
            return Err(CommerceError::OutOfStock(vec![StockShortage {
                product_id: self.product.id,
                variant_id: self.variant.as_ref().map(|v| v.id),
                sku: self.sku().to_string(),
                requested: -delta,
                available: self.stock().max(0),
            }]));
        }
        Ok(next)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum InventoryReason {
    Sale,
    Cancellation,
    ReturnRestock,
    Adjustment,
}

/// Append-only audit row for every stock movement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct InventoryTransaction {
    pub id: Uuid,
    pub store_id: Uuid,
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub delta: i32,
    pub quantity_after: i32,
    pub reason: InventoryReason,
    pub reference_id: Option<Uuid>,
    pub actor_id: Option<Uuid>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn variant_overrides_price_sku_and_stock() {
        let p = product(5);
        let v = variant(&p, 2);
        let item = CatalogItem::new(p.clone(), Some(v.clone())).unwrap();
        assert_eq!(item.unit_price(), dec!(12.00));
        assert_eq!(item.unit_weight(), dec!(0.5));
        assert_eq!(item.sku(), "SKU-1-RED");
        assert_eq!(item.stock(), 2);
        assert_eq!(item.stock_target(), StockTarget::Variant(v.id));
        assert_eq!(item.display_name(), "Widget - Red");
    }

    #[test]
    fn foreign_variant_is_rejected() {
        let p = product(5);
        let other = product(1);
        let v = variant(&other, 2);
        assert!(CatalogItem::new(p, Some(v)).is_err());
    }

    #[test]
    fn shortage_only_for_enforced_stock() {
        let mut p = product(1);
        let item = CatalogItem::new(p.clone(), None).unwrap();
        assert!(item.shortage(1).is_none());
        assert_eq!(item.shortage(3).unwrap().available, 1);

        p.allow_backorder = true;
        let item = CatalogItem::new(p, None).unwrap();
        assert!(item.shortage(3).is_none());
    }

    #[test]
    fn negative_stock_rejected_without_backorder() {
        let item = CatalogItem::new(product(2), None).unwrap();
        assert_eq!(item.apply_delta(-2).unwrap(), 0);
        assert!(matches!(item.apply_delta(-3), Err(CommerceError::OutOfStock(_))));
        assert_eq!(item.apply_delta(4).unwrap(), 6);
    }
}
