//! bookshelf-server: books-by-author lookup over HTTP
//!
//! The interesting part is [`db::pool`]: a fixed-size connection pool that
//! opens its connections once, on first use, and is safe to share across
//! concurrent requests. [`db::repos::BookRepo`] runs the lookup on top of it
//! and [`http`] is the thin axum layer in front.

pub mod config;
pub mod db;
pub mod http;
pub mod models;

pub use config::{ConfigError, DatabaseConfig};
pub use db::{BookQueryOptions, BookRepo, ConnectionPool, DecodePolicy, PgConnector, PoolOptions};
pub use http::{build_router, run_server, AppState, ServerConfig, ServerError};
pub use models::Book;
