use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::{AppState, RequestContext};
use crate::error::CommerceError;
use crate::services::AddItem;

#[derive(Debug, Deserialize)]
pub struct UpdateQuantity {
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct ApplyCoupon {
    pub code: String,
}

pub(super) async fn get_cart(State(s): State<AppState>, ctx: RequestContext) -> Result<Response, CommerceError> {
    let owner = ctx.principal.cart_owner()?;
    let view = s.services.carts.get_or_create(ctx.store_id, &owner).await?;
    Ok(ctx.respond(Json(view)))
}

pub(super) async fn add_item(State(s): State<AppState>, ctx: RequestContext, Json(r): Json<AddItem>) -> Result<Response, CommerceError> {
    let owner = ctx.principal.cart_owner()?;
    let item = s.services.carts.add_item(ctx.store_id, &owner, r).await?;
    Ok(ctx.respond((StatusCode::CREATED, Json(item))))
}

pub(super) async fn update_item(
    State(s): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateQuantity>,
) -> Result<Response, CommerceError> {
    let owner = ctx.principal.cart_owner()?;
    match s.services.carts.update_item(ctx.store_id, &owner, id, r.quantity).await? {
        Some(item) => Ok(ctx.respond(Json(item))),
        None => Ok(ctx.respond(StatusCode::NO_CONTENT)),
    }
}

pub(super) async fn remove_item(State(s): State<AppState>, ctx: RequestContext, Path(id): Path<Uuid>) -> Result<StatusCode, CommerceError> {
    let owner = ctx.principal.cart_owner()?;
    s.services.carts.remove_item(ctx.store_id, &owner, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn clear(State(s): State<AppState>, ctx: RequestContext) -> Result<StatusCode, CommerceError> {
    let owner = ctx.principal.cart_owner()?;
    s.services.carts.clear(ctx.store_id, &owner).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub(super) async fn apply_coupon(State(s): State<AppState>, ctx: RequestContext, Json(r): Json<ApplyCoupon>) -> Result<Response, CommerceError> {
    let owner = ctx.principal.cart_owner()?;
    let applied = s.services.carts.apply_coupon(ctx.store_id, &owner, &r.code).await?;
    Ok(ctx.respond(Json(applied)))
}

pub(super) async fn remove_coupon(State(s): State<AppState>, ctx: RequestContext) -> Result<StatusCode, CommerceError> {
    let owner = ctx.principal.cart_owner()?;
    s.services.carts.remove_coupon(ctx.store_id, &owner).await?;
    Ok(StatusCode::NO_CONTENT)
}
