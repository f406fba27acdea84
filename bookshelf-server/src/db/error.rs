//! Error taxonomy for the database layer
//!
//! Each layer wraps the one below it so the original cause stays reachable
//! through `source()`:
//!
//! `sqlx::Error` -> [`ConnectionError`] / [`QueryError`] -> [`PoolError`] -> [`ServiceError`]

use std::sync::Arc;
use std::time::Duration;

use crate::models::{DecodeError, ValidationError};

/// Opening or using a single database session failed
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("failed to open database session: {0}")]
    Open(#[source] sqlx::Error),

    #[error("connection is closed")]
    Closed,
}

/// Executing a statement failed
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("column '{column}' has unsupported type {type_name}")]
    UnsupportedColumn { column: String, type_name: String },

    #[error("query timed out after {after:?}")]
    Timeout { after: Duration },
}

/// Why a pool ended up in its terminal failed state
#[derive(Debug, thiserror::Error)]
pub enum PoolFailure {
    #[error("connection {slot} of {size} failed to open")]
    Connect {
        slot: usize,
        size: usize,
        #[source]
        source: ConnectionError,
    },

    #[error("pool was drained")]
    Drained,

    #[error("initialization was aborted before completing")]
    Aborted,
}

/// Obtaining a connection from the pool failed
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("connection pool exhausted: {reason}")]
    Exhausted { reason: &'static str },

    #[error("connection pool unavailable: {cause}")]
    InitFailed {
        #[source]
        cause: Arc<PoolFailure>,
    },

    #[error("connection pool did not finish initializing within {waited:?}")]
    InitTimeout { waited: Duration },
}

/// Errors surfaced by the book lookup service
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    #[error(transparent)]
    PoolUnavailable(#[from] PoolError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("row {row} could not be decoded: {source}")]
    Decode {
        row: usize,
        #[source]
        source: DecodeError,
    },
}
