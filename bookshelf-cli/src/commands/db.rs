//! Database flags shared by `serve` and `query`
//!
//! Each flag falls back to its `DB_*` variable (and `.env`). The password is
//! environment-only (`DB_PASSWORD`) so it never shows up in argv.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use bookshelf_server::{BookRepo, ConnectionPool, DatabaseConfig, DecodePolicy};

#[derive(Args, Debug, Default)]
pub struct DbArgs {
    /// Full connection URL, overrides host/port/user/password/name
    #[arg(long, env = "DB_URL", hide_env_values = true)]
    pub db_url: Option<String>,

    /// Database host
    #[arg(long, env = "DB_HOST")]
    pub db_host: Option<String>,

    /// Database port
    #[arg(long, env = "DB_PORT")]
    pub db_port: Option<u16>,

    /// Database user
    #[arg(long, env = "DB_USERNAME")]
    pub db_user: Option<String>,

    /// Database name
    #[arg(long, env = "DB_NAME")]
    pub db_name: Option<String>,

    /// Number of pooled connections
    #[arg(long, env = "DB_POOL_SIZE")]
    pub pool_size: Option<usize>,

    /// How long a caller waits for a free connection, in milliseconds
    #[arg(long, env = "DB_ACQUIRE_TIMEOUT_MS")]
    pub acquire_timeout_ms: Option<u64>,

    /// How long a caller waits for the pool to finish connecting, in milliseconds
    #[arg(long, env = "DB_INIT_TIMEOUT_MS")]
    pub init_timeout_ms: Option<u64>,

    /// Per-query timeout in milliseconds, also enforced by the server
    #[arg(long, env = "DB_QUERY_TIMEOUT_MS")]
    pub query_timeout_ms: Option<u64>,

    /// Maximum rows returned per lookup
    #[arg(long, env = "DB_MAX_RESULTS")]
    pub max_results: Option<u32>,

    /// What to do with rows that do not decode into a book
    #[arg(long, value_enum, default_value_t = DecodePolicyArg::FailFast)]
    pub decode_policy: DecodePolicyArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodePolicyArg {
    /// Fail the whole lookup
    #[default]
    FailFast,
    /// Log and drop the bad row
    SkipAndLog,
}

impl From<DecodePolicyArg> for DecodePolicy {
    fn from(arg: DecodePolicyArg) -> Self {
        match arg {
            DecodePolicyArg::FailFast => DecodePolicy::FailFast,
            DecodePolicyArg::SkipAndLog => DecodePolicy::SkipAndLog,
        }
    }
}

impl DbArgs {
    /// Environment first, then flags on top
    pub fn config(&self) -> Result<DatabaseConfig> {
        let config = DatabaseConfig::from_env().context("Invalid database environment")?;
        self.apply(config)
    }

    /// Overlay the flags that were given onto `config` and re-validate.
    pub fn apply(&self, mut config: DatabaseConfig) -> Result<DatabaseConfig> {
        if let Some(url) = &self.db_url {
            config.url = Some(url.clone());
        }
        if let Some(host) = &self.db_host {
            config.host = host.clone();
        }
        if let Some(port) = self.db_port {
            config.port = port;
        }
        if let Some(user) = &self.db_user {
            config.user = user.clone();
        }
        if let Some(name) = &self.db_name {
            config.database = name.clone();
        }
        if let Some(size) = self.pool_size {
            config.pool_size = size;
        }
        if let Some(ms) = self.acquire_timeout_ms {
            config.acquire_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.init_timeout_ms {
            config.init_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.query_timeout_ms {
            config.query_timeout = Duration::from_millis(ms);
        }
        if let Some(max) = self.max_results {
            config.max_results = max;
        }

        config.validate().context("Invalid database options")?;
        Ok(config)
    }

    /// Pool and repository. Opens nothing; the pool connects on first use.
    pub fn repo(&self) -> Result<BookRepo> {
        let config = self.config()?;
        tracing::info!(
            url = %config.redacted_url(),
            pool_size = config.pool_size,
            query_timeout = ?config.query_timeout,
            "database configured"
        );

        let pool = ConnectionPool::new(config.connector(), config.pool_options());
        Ok(BookRepo::new(
            pool,
            config.query_options(self.decode_policy.into()),
        ))
    }
}
