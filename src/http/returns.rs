use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use super::{AppState, RequestContext};
use crate::domain::aggregates::Return;
use crate::error::CommerceError;
use crate::services::{CreateReturn, ReturnDetails, UpdateReturnStatus};

pub(super) async fn create(
    State(s): State<AppState>,
    ctx: RequestContext,
    Path(order_id): Path<Uuid>,
    Json(r): Json<CreateReturn>,
) -> Result<(StatusCode, Json<Return>), CommerceError> {
    let ret = s.services.returns.create(&ctx.principal, ctx.store_id, order_id, r).await?;
    Ok((StatusCode::CREATED, Json(ret)))
}

pub(super) async fn get_return(State(s): State<AppState>, ctx: RequestContext, Path(id): Path<Uuid>) -> Result<Json<ReturnDetails>, CommerceError> {
    Ok(Json(s.services.returns.get(&ctx.principal, ctx.store_id, id).await?))
}

pub(super) async fn update_status(
    State(s): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(r): Json<UpdateReturnStatus>,
) -> Result<Json<Return>, CommerceError> {
    Ok(Json(s.services.returns.update_status(&ctx.principal, ctx.store_id, id, r).await?))
}

pub(super) async fn refund(State(s): State<AppState>, ctx: RequestContext, Path(id): Path<Uuid>) -> Result<Json<Return>, CommerceError> {
    Ok(Json(s.services.returns.refund(&ctx.principal, ctx.store_id, id).await?))
}

pub(super) async fn restock(State(s): State<AppState>, ctx: RequestContext, Path(id): Path<Uuid>) -> Result<Json<Return>, CommerceError> {
    Ok(Json(s.services.returns.restock(&ctx.principal, ctx.store_id, id).await?))
}
