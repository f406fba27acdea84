//! Command implementations for the bookshelf CLI

pub mod db;
pub mod query;
pub mod serve;

pub use query::run_query;
pub use serve::run_serve;
