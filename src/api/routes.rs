//! API Routes
//!
//! Configures the Axum router for the read path.

use axum::{routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use super::handlers::{get_order_handler, health_handler, stats_handler, AppState};

/// Creates the router with all endpoints configured.
///
/// # Middleware
/// - CORS: read-only endpoints, any origin
/// - Tracing: one span per request
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/order/:id", get(get_order_handler))
        .route("/stats", get(stats_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
