//! API error types with IntoResponse
//!
//! The only place where errors become status codes. Causes of server-side
//! failures are logged, not echoed to the client.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::db::error::{PoolError, QueryError, ServiceError};
use crate::models::ValidationError;

/// API error type with automatic HTTP status mapping
#[derive(Debug)]
pub enum ApiError {
    /// Validation failed (400)
    Validation(ValidationError),

    /// Connection pool cannot serve requests (503, logged)
    Unavailable(PoolError),

    /// The database rejected or lost the query (502, logged)
    Upstream(QueryError),

    /// Query exceeded its deadline (504)
    Timeout { after: Duration },

    /// Internal error (500, logged)
    Internal { message: String },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::Validation(e) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error": "validation_error",
                    "message": e.to_string()
                }),
            ),
            Self::Unavailable(e) => {
                tracing::error!(error = %e, "connection pool unavailable");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({
                        "error": "service_unavailable",
                        "message": "the book catalog is temporarily unavailable"
                    }),
                )
            }
            Self::Upstream(e) => {
                tracing::error!(error = %e, "database query failed");
                (
                    StatusCode::BAD_GATEWAY,
                    json!({
                        "error": "upstream_error",
                        "message": "the book catalog could not answer the query"
                    }),
                )
            }
            Self::Timeout { after } => (
                StatusCode::GATEWAY_TIMEOUT,
                json!({
                    "error": "timeout",
                    "message": format!("query timed out after {} ms", after.as_millis())
                }),
            ),
            Self::Internal { message } => {
                tracing::error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error": "internal_error",
                        "message": "an internal error occurred"
                    }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e)
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::InvalidArgument(e) => Self::Validation(e),
            ServiceError::PoolUnavailable(e) => Self::Unavailable(e),
            ServiceError::Query(QueryError::Timeout { after }) => Self::Timeout { after },
            ServiceError::Query(e) => Self::Upstream(e),
            e @ ServiceError::Decode { .. } => Self::Internal {
                message: e.to_string(),
            },
        }
    }
}
