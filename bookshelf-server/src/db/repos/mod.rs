//! Repository implementations for database access
//!
//! Repositories borrow connections from [`ConnectionPool`](super::ConnectionPool)
//! and always give them back before returning.

pub mod books;

pub use books::{BookQueryOptions, BookRepo, DecodePolicy, BOOKS_BY_AUTHOR_SQL};
