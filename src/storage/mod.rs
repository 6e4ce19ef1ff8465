//! Persistence Engine
//!
//! The durable store owns every Delivery, Payment, Item and Order row plus the
//! cache index (`Hash` table). [`OrderRepository`] is the contract the cache
//! and the write loop program against; [`PgOrderStore`] is the PostgreSQL
//! implementation and [`MemoryOrderStore`] an in-process one with the same
//! upsert semantics.

mod memory;
mod postgres;
mod schema;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Order;

pub use memory::MemoryOrderStore;
pub use postgres::PgOrderStore;
pub use schema::SCHEMA;

// == Order Repository ==
/// Durable storage for orders and cache membership.
///
/// Every upsert is insert-or-update on the natural key, so delivering the same
/// order twice leaves the store unchanged.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Writes the whole order graph in one transaction. Nothing is visible on failure.
    async fn upsert_order(&self, order: &Order) -> Result<()>;

    /// Reads an order with its delivery, payment and items.
    ///
    /// Fails with `NotFound` when there is no Orders row for `id`.
    async fn get_order(&self, id: &str) -> Result<Order>;

    /// Records that `id` is cache-resident. Idempotent.
    async fn mark_cache_resident(&self, id: &str) -> Result<()>;

    /// Removes the residency marker; `NotFound` when there was none.
    async fn clear_cache_resident(&self, id: &str) -> Result<()>;

    /// Every id currently marked resident.
    async fn list_cache_resident_ids(&self) -> Result<Vec<String>>;

    /// Releases pooled connections. Later calls fail with `Persistence`.
    fn close(&self) {}
}
