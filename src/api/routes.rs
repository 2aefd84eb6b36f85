//! HTTP API route definitions.

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers::{health, list_wagers, metrics, ready, rounds, status, submit_wager, AppState};

/// Create the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Ledger views and direct intake
        .route("/api/v1/status", get(status))
        .route("/api/v1/wagers", get(list_wagers).post(submit_wager))
        .route("/api/v1/rounds", get(rounds))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
