use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

use super::{group_deltas, Deps, LockedCatalog, StockMove};
use crate::auth::Principal;
use crate::domain::aggregates::{InventoryReason, InventoryTransaction, Product, Variant};
use crate::error::{CommerceError, Result};
use crate::store::Lock;

#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AdjustInventory {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    /// Signed change; negative values remove stock.
    #[validate(range(min = -1_000_000, max = 1_000_000))]
    pub delta: i32,
    #[validate(length(max = 500))]
    pub note: Option<String>,
}

/// Catalog view of one product.
#[derive(Clone, Debug, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    pub variants: Vec<Variant>,
}

#[derive(Clone)]
pub struct InventoryService {
    deps: Deps,
}

impl InventoryService {
    pub fn new(deps: Deps) -> Self {
        Self { deps }
    }

    /// Applies a manual stock correction and records it in the audit trail.
    /// Stock of a product without backorders never goes below zero.
    #[instrument(name = "inventory.adjust", skip_all, fields(%store_id, product_id = %input.product_id, delta = input.delta))]
    pub async fn adjust(&self, principal: &Principal, store_id: Uuid, input: AdjustInventory) -> Result<InventoryTransaction> {
        principal.require_admin()?;
        input.validate()?;
        if input.delta == 0 {
            return Err(CommerceError::invalid("delta", "delta must not be zero"));
        }
        let now = self.deps.clock.now();

        let mut tx = self.deps.store.begin().await?;
        let catalog = LockedCatalog::lock(&mut *tx, store_id, [(input.product_id, input.variant_id)]).await?;
        let item = catalog.item(input.product_id, input.variant_id)?;
        if !item.product.track_inventory {
            return Err(CommerceError::invalid("product_id", format!("{} does not track inventory", item.sku())));
        }
        let note = input.note.as_deref().map(str::trim).filter(|n| !n.is_empty());
        let row = StockMove {
            store_id,
            reason: InventoryReason::Adjustment,
            reference_id: None,
            actor_id: principal.actor_id(),
            note,
            now,
        }
        .apply(&mut *tx, group_deltas([(item, input.delta)]))
        .await?
        .pop()
        .ok_or_else(|| CommerceError::internal("stock adjustment produced no audit row"))?;
        tx.commit().await?;

        tracing::info!(quantity_after = row.quantity_after, "inventory adjusted");
        Ok(row)
    }

    #[instrument(name = "inventory.product", skip_all, fields(%store_id, %product_id))]
    pub async fn product(&self, store_id: Uuid, product_id: Uuid) -> Result<ProductView> {
        let mut tx = self.deps.store.begin().await?;
        let product = tx
            .product(product_id, Lock::Shared)
            .await?
            .filter(|p| p.store_id == store_id)
            .ok_or_else(|| CommerceError::not_found("product", product_id))?;
        let variants = tx.product_variants(product.id).await?;
        Ok(ProductView { product, variants })
    }
}
