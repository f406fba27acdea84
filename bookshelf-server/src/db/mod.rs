//! Database layer - connections, pool and repositories
//!
//! # Design Principles
//!
//! - One fixed-size pool, populated once; callers never see a partial pool
//! - Check-and-claim of a connection is atomic; no two holders share one
//! - Every checkout is returned, on success, error and cancellation alike
//! - Parameters are always bound, never formatted into SQL

pub mod connection;
pub mod error;
pub mod pool;
pub mod repos;

pub use connection::{Connection, Connector, PgConnection, PgConnector, Row, Value};
pub use error::{ConnectionError, PoolError, PoolFailure, QueryError, ServiceError};
pub use pool::{ConnectionPool, PoolOptions, PoolState, PoolStatus, PooledConnection};
pub use repos::*;
