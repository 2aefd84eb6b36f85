//! HTTP API for health, readiness, ledger views, direct intake and metrics.

pub mod handlers;
pub mod routes;

pub use handlers::AppState;
pub use routes::create_router;
