//! Error types for the order service
//!
//! Provides unified error handling using thiserror.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::ingest::RejectionReason;
use crate::models::ErrorResponse;

// == Order Error Enum ==
/// Unified error type for the order service.
#[derive(Error, Debug)]
pub enum OrderError {
    /// Order (or cache index row) does not exist in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Message payload failed validation
    #[error("Rejected: {0}")]
    Rejected(#[from] RejectionReason),

    /// Transaction or query failure in the durable store
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Fetch or commit against the stream broker failed
    #[error("Stream unavailable: {0}")]
    StreamUnavailable(String),

    /// Configuration values that cannot be used
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrderError {
    /// Wraps an underlying failure with the step that produced it.
    pub fn persistence(step: &str, cause: impl std::fmt::Display) -> Self {
        OrderError::Persistence(format!("{}: {}", step, cause))
    }

    /// True for failures a caller may retry later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OrderError::Persistence(_) | OrderError::StreamUnavailable(_)
        )
    }
}

impl From<tokio_postgres::Error> for OrderError {
    fn from(err: tokio_postgres::Error) -> Self {
        OrderError::Persistence(err.to_string())
    }
}

impl From<deadpool_postgres::PoolError> for OrderError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        OrderError::Persistence(format!("connection pool: {}", err))
    }
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for OrderError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        OrderError::StreamUnavailable(err.to_string())
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let status = match &self {
            OrderError::NotFound(_) => StatusCode::NOT_FOUND,
            OrderError::Rejected(_) | OrderError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            OrderError::Persistence(_) | OrderError::StreamUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            OrderError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the order service.
pub type Result<T> = std::result::Result<T, OrderError>;
