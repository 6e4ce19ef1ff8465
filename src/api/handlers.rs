//! API Handlers
//!
//! HTTP request handlers for the read path.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};

use crate::cache::OrderCache;
use crate::error::Result;
use crate::models::{HealthResponse, Order, StatsResponse};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Bounded order cache backed by the store
    pub cache: Arc<OrderCache>,
}

impl AppState {
    pub fn new(cache: Arc<OrderCache>) -> Self {
        Self { cache }
    }
}

/// Handler for GET /order/:id
///
/// Serves the order from memory, loading it from the store on a miss.
pub async fn get_order_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Order>> {
    let order = state.cache.get(&id).await?;
    Ok(Json(order))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(state.cache.stats().await.into())
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
