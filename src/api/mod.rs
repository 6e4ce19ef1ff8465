//! API Module
//!
//! HTTP read path over the order cache.
//!
//! # Endpoints
//! - `GET /order/:id` - Order by id, from memory or the store
//! - `GET /stats` - Cache statistics
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
