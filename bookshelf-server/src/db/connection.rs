//! Single database sessions
//!
//! [`Connection`] is one session; [`Connector`] opens them. The pool only
//! sees these traits, so it can be exercised without a live database.
//! [`PgConnector`] / [`PgConnection`] are the Postgres implementations.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::Connection as _;
use sqlx::{Column as _, Row as _, TypeInfo as _};

use super::error::{ConnectionError, QueryError};

/// A bound parameter or a decoded column value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
}

/// One result row: column names paired with values, in select order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: Vec<(String, Value)>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column, replacing any existing column with the same name.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.columns.push((name, value)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// A single logical database session.
///
/// States are open and closed; closed is terminal. `is_open` is advisory:
/// a session can die between the check and the next `query`.
#[async_trait]
pub trait Connection: Send {
    /// Execute a parameterized statement. Values in `params` are bound,
    /// never spliced into `sql`.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, QueryError>;

    /// Release the session. Idempotent.
    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens new sessions against one fixed connection string.
///
/// No retries here; the pool decides what to do with a failure.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self) -> Result<Box<dyn Connection>, ConnectionError>;
}

/// SQLSTATE Postgres reports when `statement_timeout` cancels a statement
const QUERY_CANCELED: &str = "57014";

/// Postgres session backed by `sqlx::PgConnection`
pub struct PgConnection {
    inner: Option<sqlx::PgConnection>,
    statement_timeout: Option<Duration>,
}

impl PgConnection {
    pub async fn open(url: &str) -> Result<Self, ConnectionError> {
        let options = url.parse::<PgConnectOptions>().map_err(ConnectionError::Open)?;
        Self::open_with(&options, None).await
    }

    /// Open a session. `statement_timeout` must match what `options` sets on
    /// the server; it only labels the error when Postgres cancels a statement.
    pub async fn open_with(
        options: &PgConnectOptions,
        statement_timeout: Option<Duration>,
    ) -> Result<Self, ConnectionError> {
        let conn = sqlx::PgConnection::connect_with(options)
            .await
            .map_err(ConnectionError::Open)?;
        Ok(Self {
            inner: Some(conn),
            statement_timeout,
        })
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, QueryError> {
        let conn = self.inner.as_mut().ok_or(ConnectionError::Closed)?;

        let mut query = sqlx::query(sql);
        for param in params {
            query = match param {
                Value::Null => query.bind(None::<String>),
                Value::Int(v) => query.bind(*v),
                Value::Text(s) => query.bind(s.as_str()),
            };
        }

        let rows = match query.fetch_all(&mut *conn).await {
            Ok(rows) => rows,
            Err(e) => {
                if let Some(after) = self.statement_timeout.filter(|_| is_query_canceled(&e)) {
                    // Postgres stopped the statement; the session is still usable.
                    return Err(QueryError::Timeout { after });
                }
                if is_transport_failure(&e) {
                    // The session is unusable; report closed so the pool retires it.
                    tracing::warn!(error = %e, "database session lost during query");
                    self.inner = None;
                }
                return Err(e.into());
            }
        };

        rows.iter().map(decode_pg_row).collect()
    }

    async fn close(&mut self) {
        if let Some(conn) = self.inner.take() {
            if let Err(e) = conn.close().await {
                tracing::debug!(error = %e, "error while closing database session");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.inner.is_some()
    }
}

fn is_transport_failure(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::Protocol(_)
    )
}

fn is_query_canceled(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == QUERY_CANCELED)
}

fn decode_pg_row(row: &PgRow) -> Result<Row, QueryError> {
    let mut out = Row::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let value = match column.type_info().name() {
            "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(|v| Value::Int(v.into())),
            "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(|v| Value::Int(v.into())),
            "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::Int),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                row.try_get::<Option<String>, _>(idx)?.map(Value::Text)
            }
            other => {
                return Err(QueryError::UnsupportedColumn {
                    column: column.name().to_owned(),
                    type_name: other.to_owned(),
                })
            }
        };
        out = out.with(column.name(), value.unwrap_or(Value::Null));
    }
    Ok(out)
}

/// Opens [`PgConnection`]s against one connection URL
pub struct PgConnector {
    url: String,
    statement_timeout: Option<Duration>,
}

impl PgConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            statement_timeout: None,
        }
    }

    /// Have the server cancel any statement running longer than `timeout`.
    ///
    /// A client-side timeout only stops waiting; this stops the work.
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Parsed URL plus the session settings every connection starts with
    pub fn connect_options(&self) -> Result<PgConnectOptions, sqlx::Error> {
        let options = self.url.parse::<PgConnectOptions>()?;
        Ok(match self.statement_timeout {
            Some(timeout) => {
                options.options([("statement_timeout", timeout.as_millis().max(1).to_string())])
            }
            None => options,
        })
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn open(&self) -> Result<Box<dyn Connection>, ConnectionError> {
        let options = self.connect_options().map_err(ConnectionError::Open)?;
        let conn = PgConnection::open_with(&options, self.statement_timeout).await?;
        Ok(Box::new(conn))
    }
}
