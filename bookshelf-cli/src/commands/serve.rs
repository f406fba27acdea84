//! HTTP server command
//!
//! Serves `/books/{author}`, `/GetBookByAuthor/{author}` and `/health`.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;

use bookshelf_server::{run_server, AppState, ServerConfig};

use super::db::DbArgs;

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Address to bind to
    #[arg(long, short = 'b', default_value = "127.0.0.1:8080", env = "BOOKSHELF_BIND")]
    pub bind: SocketAddr,

    /// Allow permissive CORS (all origins) - use with caution
    #[arg(long)]
    pub cors_permissive: bool,

    /// Open the connection pool at startup instead of on the first lookup
    #[arg(long)]
    pub eager: bool,

    #[command(flatten)]
    pub db: DbArgs,
}

/// Run the HTTP server until Ctrl+C or SIGTERM
pub async fn run_serve(args: ServeArgs) -> Result<()> {
    let books = args.db.repo()?;

    tracing::info!("Starting bookshelf server on {}", args.bind);

    let config = ServerConfig {
        bind_addr: args.bind,
        cors_permissive: args.cors_permissive,
        eager_init: args.eager,
    };

    run_server(AppState::new(books), config)
        .await
        .context("Server error")?;

    Ok(())
}
