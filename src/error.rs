//! Error taxonomy for the commerce core.
//!
//! Every fallible operation in the pipeline returns [`CommerceError`]. The
//! variants map one-to-one onto the kinds callers can act on (validation,
//! not-found, conflict, state, inventory, coupon, payment, permission) plus
//! an internal bucket for invariant violations and infrastructure failures.

use std::borrow::Cow;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::{ValidationError, ValidationErrors};

use crate::gateway::GatewayError;

/// One cart line that cannot be fulfilled from current stock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StockShortage {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub sku: String,
    pub requested: i32,
    pub available: i32,
}

#[derive(Error, Debug)]
pub enum CommerceError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("cannot move {entity} from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("insufficient stock for {} line(s)", .0.len())]
    OutOfStock(Vec<StockShortage>),

    #[error("coupon rejected: {0}")]
    Coupon(String),

    #[error("payment failed: {0}")]
    PaymentFailed(String),

    #[error("payment pending for intent {intent_id}")]
    PaymentPending { intent_id: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CommerceError>;

impl CommerceError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Single-field validation failure.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        let mut error = ValidationError::new("invalid");
        error.message = Some(Cow::Owned(message.into()));
        let mut errors = ValidationErrors::new();
        errors.add(field, error);
        Self::Validation(errors)
    }

    pub fn transition(
        entity: &'static str,
        from: impl std::fmt::Display,
        to: impl std::fmt::Display,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable machine-readable kind, used as the `error` field of responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::InvalidTransition { .. } => "state_error",
            Self::OutOfStock(_) => "inventory_error",
            Self::Coupon(_) => "coupon_error",
            Self::PaymentFailed(_) => "payment_error",
            Self::PaymentPending { .. } => "payment_pending",
            Self::Forbidden(_) => "permission_error",
            Self::Database(_) | Self::Internal(_) => "internal",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::InvalidTransition { .. } | Self::OutOfStock(_) => {
                StatusCode::CONFLICT
            }
            Self::Coupon(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::PaymentPending { .. } => StatusCode::ACCEPTED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::Validation(errors) => serde_json::to_value(errors).ok(),
            Self::OutOfStock(lines) => serde_json::to_value(lines).ok(),
            Self::PaymentPending { intent_id } => {
                Some(serde_json::json!({ "intent_id": intent_id, "retry": "check back later" }))
            }
            Self::InvalidTransition { from, to, .. } => {
                Some(serde_json::json!({ "current": from, "attempted": to }))
            }
            _ => None,
        }
    }
}

impl From<sqlx::Error> for CommerceError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db) = err.as_database_error() {
            match db.code().as_deref() {
                Some("23505") => return Self::Conflict(db.message().to_string()),
                Some("40001") | Some("40P01") => {
                    return Self::Conflict("concurrent modification, retry".to_string())
                }
                _ => {}
            }
        }
        Self::Database(err)
    }
}

impl From<GatewayError> for CommerceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Declined(reason) => Self::PaymentFailed(reason),
            GatewayError::Timeout => Self::PaymentFailed("payment gateway timed out".to_string()),
            GatewayError::Transport(msg) => Self::PaymentFailed(format!("gateway unreachable: {msg}")),
            GatewayError::Unsupported(what) => Self::invalid("payment_method", what),
            GatewayError::InvalidSignature => Self::forbidden("webhook signature mismatch"),
            GatewayError::InvalidResponse(msg) => Self::Internal(format!("unexpected gateway response: {msg}")),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            Self::Database(_) | Self::Internal(_) => {
                tracing::error!(error = ?self, kind = self.kind(), "request failed");
                "internal server error".to_string()
            }
            _ => self.to_string(),
        };
        let body = ErrorBody {
            error: self.kind(),
            message,
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_builds_field_level_breakdown() {
        let err = CommerceError::invalid("quantity", "must be at least 1");
        let CommerceError::Validation(errors) = &err else {
            panic!("expected validation error");
        };
        assert!(errors.field_errors().contains_key("quantity"));
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn kinds_map_to_statuses() {
        let err = CommerceError::transition("order", "cancelled", "paid");
        assert_eq!(err.kind(), "state_error");
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.to_string(), "cannot move order from cancelled to paid");

        let err = CommerceError::PaymentPending { intent_id: "pi_1".into() };
        assert_eq!(err.status_code(), StatusCode::ACCEPTED);
    }

    #[test]
    fn gateway_errors_translate() {
        let err: CommerceError = GatewayError::Declined("card declined".into()).into();
        assert_eq!(err.kind(), "payment_error");
        let err: CommerceError = GatewayError::InvalidResponse("garbage".into()).into();
        assert_eq!(err.kind(), "internal");
    }
}
