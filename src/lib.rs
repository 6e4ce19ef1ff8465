//! Order Cache - order ingestion service
//!
//! Consumes orders from a message stream, validates them, stores them
//! transactionally in PostgreSQL and serves them through a bounded,
//! restorable in-memory cache.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod ingest;
pub mod models;
pub mod storage;

pub use api::AppState;
pub use config::Config;
pub use error::{OrderError, Result};
pub use ingest::{spawn_ingestion, IngestionHandle, PipelineSettings};
