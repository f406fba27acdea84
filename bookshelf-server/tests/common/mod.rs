//! In-memory stand-in for the books database.
//!
//! Counts every open, close and in-flight query so tests can check the pool
//! for leaks and over-subscription without a live Postgres.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bookshelf_server::db::{
    BookQueryOptions, BookRepo, Connection, ConnectionError, ConnectionPool, Connector,
    PoolOptions, QueryError, Row, Value,
};

pub fn book(id: i64, title: &str, author: &str, cost: i64) -> Row {
    Row::new()
        .with("id", Value::Int(id))
        .with("title", Value::Text(title.into()))
        .with("author", Value::Text(author.into()))
        .with("cost", Value::Int(cost))
}

pub fn catalog() -> Vec<Row> {
    vec![
        book(1, "The Hobbit", "Tolkien", 12),
        book(2, "A Wizard of Earthsea", "Le Guin", 9),
        book(3, "The Fellowship of the Ring", "Tolkien", 15),
        book(4, "The Dispossessed", "Le Guin", 11),
        book(5, "The Two Towers", "Tolkien", 15),
        book(6, "At Swim-Two-Birds", "O'Brien", 0),
    ]
}

#[derive(Default)]
pub struct MockDb {
    pub open_attempts: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
    pub active_queries: AtomicUsize,
    pub max_active_queries: AtomicUsize,
    pub queries: Mutex<Vec<(String, Vec<Value>)>>,
    /// The next query fails and leaves its connection closed
    pub drop_next_query: AtomicBool,
    rows: Vec<Row>,
    /// Returned as-is, ignoring the author filter
    fixed_rows: Option<Vec<Row>>,
    fail_open_at: Option<usize>,
    fail_every_open: bool,
    open_delay: Duration,
    query_delay: Duration,
}

impl MockDb {
    pub fn seeded() -> Self {
        Self {
            rows: catalog(),
            ..Self::default()
        }
    }

    /// Replace the seeded table; the author filter still applies
    pub fn table(mut self, rows: Vec<Row>) -> Self {
        self.rows = rows;
        self
    }

    /// Every open fails, as when the database is down
    pub fn fail_every_open(mut self) -> Self {
        self.fail_every_open = true;
        self
    }

    /// Opening connection number `n` (zero-based) fails
    pub fn fail_open_at(mut self, n: usize) -> Self {
        self.fail_open_at = Some(n);
        self
    }

    pub fn open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    pub fn query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    pub fn returning(mut self, rows: Vec<Row>) -> Self {
        self.fixed_rows = Some(rows);
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn open_attempts(&self) -> usize {
        self.open_attempts.load(Ordering::SeqCst)
    }

    /// Sessions opened and never closed
    pub fn still_open(&self) -> usize {
        self.opened() - self.closed()
    }

    pub fn max_active_queries(&self) -> usize {
        self.max_active_queries.load(Ordering::SeqCst)
    }

    pub fn recorded_queries(&self) -> Vec<(String, Vec<Value>)> {
        self.queries.lock().unwrap().clone()
    }

    fn select(&self, params: &[Value]) -> Vec<Row> {
        if let Some(rows) = &self.fixed_rows {
            return rows.clone();
        }
        let limit = match params.get(1) {
            Some(Value::Int(n)) => *n as usize,
            _ => usize::MAX,
        };
        self.rows
            .iter()
            .filter(|row| row.get("author") == params.first())
            .take(limit)
            .cloned()
            .collect()
    }
}

pub struct MockConnector(pub Arc<MockDb>);

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        if !self.0.open_delay.is_zero() {
            tokio::time::sleep(self.0.open_delay).await;
        }
        self.0.open_attempts.fetch_add(1, Ordering::SeqCst);
        let n = self.0.opened.load(Ordering::SeqCst);
        if self.0.fail_every_open || self.0.fail_open_at == Some(n) {
            return Err(ConnectionError::Closed);
        }
        self.0.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConnection {
            db: Arc::clone(&self.0),
            open: true,
        }))
    }
}

pub struct MockConnection {
    db: Arc<MockDb>,
    open: bool,
}

#[async_trait]
impl Connection for MockConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, QueryError> {
        if !self.open {
            return Err(ConnectionError::Closed.into());
        }
        self.db
            .queries
            .lock()
            .unwrap()
            .push((sql.to_owned(), params.to_vec()));

        if self.db.drop_next_query.swap(false, Ordering::SeqCst) {
            self.close().await;
            return Err(ConnectionError::Closed.into());
        }

        let active = self.db.active_queries.fetch_add(1, Ordering::SeqCst) + 1;
        self.db.max_active_queries.fetch_max(active, Ordering::SeqCst);
        // Decrement even if the query future is dropped mid-sleep.
        let _active = ActiveQuery(&self.db.active_queries);

        if !self.db.query_delay.is_zero() {
            tokio::time::sleep(self.db.query_delay).await;
        }
        Ok(self.db.select(params))
    }

    async fn close(&mut self) {
        if std::mem::replace(&mut self.open, false) {
            self.db.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

struct ActiveQuery<'a>(&'a AtomicUsize);

impl Drop for ActiveQuery<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn pool(db: &Arc<MockDb>, size: usize) -> ConnectionPool {
    ConnectionPool::new(
        MockConnector(Arc::clone(db)),
        PoolOptions {
            size,
            acquire_timeout: Duration::from_secs(2),
            init_timeout: Duration::from_secs(2),
        },
    )
}

pub fn repo(db: &Arc<MockDb>, size: usize, options: BookQueryOptions) -> BookRepo {
    BookRepo::new(pool(db, size), options)
}

/// Wait for detached closes spawned by the pool to run
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
