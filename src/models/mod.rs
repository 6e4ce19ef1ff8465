//! Domain and response models
//!
//! `order` holds the ingested entity; `responses` holds the DTOs returned by
//! the read path.

pub mod order;
pub mod responses;

// Re-export commonly used types
pub use order::{Delivery, Item, Order, Payment};
pub use responses::{ErrorResponse, HealthResponse, StatsResponse};
