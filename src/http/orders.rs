use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::{AppState, RequestContext};
use crate::domain::aggregates::{Order, OrderStatusHistory};
use crate::error::CommerceError;
use crate::services::{CancelOutcome, CheckoutRequest, OrderDetails, PlacedOrder, UpdateOrderStatus};

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

pub(super) async fn checkout(
    State(s): State<AppState>,
    ctx: RequestContext,
    Json(r): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<PlacedOrder>), CommerceError> {
    let placed = s.services.checkout.checkout(&ctx.principal, ctx.store_id, r).await?;
    Ok((StatusCode::CREATED, Json(placed)))
}

pub(super) async fn get_order(State(s): State<AppState>, ctx: RequestContext, Path(id): Path<Uuid>) -> Result<Json<OrderDetails>, CommerceError> {
    Ok(Json(s.services.orders.get(&ctx.principal, ctx.store_id, id).await?))
}

pub(super) async fn history(
    State(s): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<OrderStatusHistory>>, CommerceError> {
    Ok(Json(s.services.orders.history(&ctx.principal, ctx.store_id, id).await?))
}

pub(super) async fn update_status(
    State(s): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateOrderStatus>,
) -> Result<Json<Order>, CommerceError> {
    Ok(Json(s.services.orders.update_status(&ctx.principal, ctx.store_id, id, r).await?))
}

pub(super) async fn cancel(
    State(s): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<CancelOutcome>, CommerceError> {
    let r = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(s.services.orders.cancel(&ctx.principal, ctx.store_id, id, r.reason.as_deref()).await?))
}
