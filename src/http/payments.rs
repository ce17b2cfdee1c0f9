use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::{AppState, RequestContext};
use crate::domain::aggregates::PaymentMethod;
use crate::error::CommerceError;
use crate::services::{PaymentIntentView, PaymentSnapshot, RefundOrder, RefundOutcome};

#[derive(Debug, Default, Deserialize)]
pub struct CreateIntent {
    /// Overrides the method chosen at checkout.
    pub method: Option<PaymentMethod>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPayment {
    pub intent_id: String,
}

pub(super) async fn create_intent(
    State(s): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    body: Option<Json<CreateIntent>>,
) -> Result<(StatusCode, Json<PaymentIntentView>), CommerceError> {
    let r = body.map(|Json(r)| r).unwrap_or_default();
    let intent = s.services.payments.create_intent(&ctx.principal, ctx.store_id, id, r.method).await?;
    Ok((StatusCode::CREATED, Json(intent)))
}

pub(super) async fn confirm(
    State(s): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(r): Json<ConfirmPayment>,
) -> Result<Json<PaymentSnapshot>, CommerceError> {
    Ok(Json(s.services.payments.confirm(&ctx.principal, ctx.store_id, id, &r.intent_id).await?))
}

pub(super) async fn refund(
    State(s): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    body: Option<Json<RefundOrder>>,
) -> Result<Json<RefundOutcome>, CommerceError> {
    let r = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(s.services.payments.refund(&ctx.principal, ctx.store_id, id, r).await?))
}

pub(super) async fn capture(
    State(s): State<AppState>,
    ctx: RequestContext,
    Path(intent_id): Path<String>,
) -> Result<Json<PaymentSnapshot>, CommerceError> {
    Ok(Json(s.services.payments.capture_offline(&ctx.principal, ctx.store_id, &intent_id).await?))
}

/// Gateway push notifications carry no store or user headers; the
/// signature is the authentication.
pub(super) async fn webhook(
    State(s): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, CommerceError> {
    let applied = s.services.payments.handle_webhook(&gateway, &headers, &body).await?;
    Ok(Json(serde_json::json!({ "received": true, "applied": applied.is_some() })))
}
