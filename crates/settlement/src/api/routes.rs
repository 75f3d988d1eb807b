//! API routes for the settlement service

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::api::handlers::*;
use crate::api::SettlementApiState;

/// Create the settlement router
///
/// Health endpoints are mounted by the server crate alongside this router.
pub fn create_router(state: Arc<SettlementApiState>) -> Router {
    Router::new()
        .route(
            "/api/v1/settlements",
            post(create_settlement).get(list_settlements),
        )
        .route("/api/v1/settlements/:id", get(get_settlement))
        .route("/api/v1/settlements/:id/status", get(get_settlement_status))
        .route("/api/v1/settlements/:id/details", get(get_settlement_details))
        .route("/api/v1/settlements/:id/reversal", post(reverse_settlement))
        .route("/api/v1/obligations/:currency", get(get_obligations))
        .with_state(state)
}
