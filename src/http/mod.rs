//! HTTP surface: thin axum handlers over [`Services`].

mod cart;
pub mod context;
mod inventory;
mod orders;
mod payments;
mod returns;

use std::sync::Arc;

use axum::{routing::{get, post, put}, Json, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::services::Services;

pub use context::RequestContext;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
}

pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/cart", get(cart::get_cart))
        .route("/cart/items", post(cart::add_item).delete(cart::clear))
        .route("/cart/items/:id", put(cart::update_item).delete(cart::remove_item))
        .route("/cart/coupon", post(cart::apply_coupon).delete(cart::remove_coupon))
        .route("/checkout", post(orders::checkout))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/history", get(orders::history))
        .route("/orders/:id/status", put(orders::update_status))
        .route("/orders/:id/cancel", post(orders::cancel))
        .route("/orders/:id/refund", post(payments::refund))
        .route("/orders/:id/payment-intent", post(payments::create_intent))
        .route("/orders/:id/confirm-payment", post(payments::confirm))
        .route("/orders/:id/returns", post(returns::create))
        .route("/returns/:id", get(returns::get_return))
        .route("/returns/:id/status", put(returns::update_status))
        .route("/returns/:id/refund", post(returns::refund))
        .route("/returns/:id/restock", post(returns::restock))
        .route("/payments/:intent_id/capture", post(payments::capture))
        .route("/payments/webhooks/:gateway", post(payments::webhook))
        .route("/inventory/adjustments", post(inventory::adjust))
        .route("/products/:id", get(inventory::get_product));

    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "commerce-core"})) }))
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
