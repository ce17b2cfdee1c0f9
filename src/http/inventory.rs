use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use super::{AppState, RequestContext};
use crate::domain::aggregates::InventoryTransaction;
use crate::error::CommerceError;
use crate::services::{AdjustInventory, ProductView};

pub(super) async fn adjust(
    State(s): State<AppState>,
    ctx: RequestContext,
    Json(r): Json<AdjustInventory>,
) -> Result<(StatusCode, Json<InventoryTransaction>), CommerceError> {
    let row = s.services.inventory.adjust(&ctx.principal, ctx.store_id, r).await?;
    Ok((StatusCode::CREATED, Json(row)))
}

pub(super) async fn get_product(State(s): State<AppState>, ctx: RequestContext, Path(id): Path<Uuid>) -> Result<Json<ProductView>, CommerceError> {
    Ok(Json(s.services.inventory.product(ctx.store_id, id).await?))
}
