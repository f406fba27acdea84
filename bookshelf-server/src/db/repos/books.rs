//! Book repository
//!
//! Looks up books by author:
//! - validates the author before touching the pool
//! - binds the author as a parameter, never as SQL text
//! - releases the connection before decoding, on every path

use std::time::Duration;

use crate::db::connection::{Row, Value};
use crate::db::error::{QueryError, ServiceError};
use crate::db::pool::ConnectionPool;
use crate::models::{AuthorName, Book, DecodeError};

/// Lookup statement. `$1` is the author, `$2` the row limit.
pub const BOOKS_BY_AUTHOR_SQL: &str =
    "SELECT id, title, author, cost FROM books WHERE author = $1 ORDER BY id LIMIT $2";

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RESULTS: u32 = 100;

/// What to do with a row that does not decode into a [`Book`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodePolicy {
    /// Fail the whole lookup with `ServiceError::Decode`
    #[default]
    FailFast,
    /// Log the row position and cause at warn level, keep the rest
    SkipAndLog,
}

/// Lookup settings
#[derive(Debug, Clone)]
pub struct BookQueryOptions {
    pub query_timeout: Duration,
    pub max_results: u32,
    pub decode_policy: DecodePolicy,
}

impl Default for BookQueryOptions {
    fn default() -> Self {
        Self {
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            max_results: DEFAULT_MAX_RESULTS,
            decode_policy: DecodePolicy::default(),
        }
    }
}

/// Book repository
#[derive(Clone)]
pub struct BookRepo {
    pool: ConnectionPool,
    options: BookQueryOptions,
}

impl BookRepo {
    pub fn new(pool: ConnectionPool, options: BookQueryOptions) -> Self {
        Self { pool, options }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Books whose author equals `author`, in row order.
    ///
    /// An empty result is not an error.
    pub async fn find_books_by_author(&self, author: &str) -> Result<Vec<Book>, ServiceError> {
        self.find_books_by_author_within(author, self.options.query_timeout)
            .await
    }

    /// Like [`find_books_by_author`](Self::find_books_by_author), with the query
    /// bounded by the tighter of `deadline` and the configured query timeout.
    pub async fn find_books_by_author_within(
        &self,
        author: &str,
        deadline: Duration,
    ) -> Result<Vec<Book>, ServiceError> {
        let author = AuthorName::new(author)?;
        let limit = deadline.min(self.options.query_timeout);

        let rows = self.fetch_rows(&author, limit).await?;
        let books = self.decode_rows(&author, rows)?;

        tracing::debug!(author = %author.as_str(), count = books.len(), "books fetched");
        Ok(books)
    }

    async fn fetch_rows(&self, author: &AuthorName, limit: Duration) -> Result<Vec<Row>, ServiceError> {
        let mut conn = self.pool.acquire().await?;
        let params = [
            Value::Text(author.as_str().to_owned()),
            Value::Int(i64::from(self.options.max_results)),
        ];

        // This only stops waiting. The server-side statement_timeout set by
        // `DatabaseConfig::connector` is what cancels the statement itself.
        let result = tokio::time::timeout(limit, conn.query(BOOKS_BY_AUTHOR_SQL, &params)).await;
        let slot = conn.id();
        conn.release();

        match result {
            Ok(rows) => Ok(rows?),
            Err(_) => {
                tracing::warn!(author = %author.as_str(), slot, ?limit, "book query timed out");
                Err(QueryError::Timeout { after: limit }.into())
            }
        }
    }

    fn decode_rows(&self, author: &AuthorName, rows: Vec<Row>) -> Result<Vec<Book>, ServiceError> {
        let mut books = Vec::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            let decoded = Book::try_from(row).and_then(|book| {
                if book.author == author.as_str() {
                    Ok(book)
                } else {
                    Err(DecodeError::AuthorMismatch { found: book.author })
                }
            });

            match (decoded, self.options.decode_policy) {
                (Ok(book), _) => books.push(book),
                (Err(source), DecodePolicy::FailFast) => {
                    return Err(ServiceError::Decode { row: position, source });
                }
                (Err(source), DecodePolicy::SkipAndLog) => {
                    tracing::warn!(row = position, error = %source, "skipping undecodable book row");
                }
            }
        }
        Ok(books)
    }
}
