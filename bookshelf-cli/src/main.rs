//! bookshelf CLI - books-by-author lookup service
//!
//! - `serve`: run the HTTP API
//! - `query`: look up one author and print the books as JSON
//!
//! Database settings come from `DB_*` environment variables, a `.env` file in
//! the working directory, or the flags on each subcommand.

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod tracing_setup;

#[derive(Parser, Debug)]
#[command(
    name = "bookshelf",
    author,
    version,
    about = "Look up books by author over a lazily initialized connection pool"
)]
struct Cli {
    /// Debug logging (unless RUST_LOG is set)
    #[arg(long, global = true)]
    debug: bool,

    /// Export traces over OTLP (requires the telemetry feature)
    #[arg(long, global = true)]
    otel: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server
    Serve(commands::serve::ServeArgs),
    /// Look up books by one author and print them as JSON
    Query(commands::query::QueryArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine; the process environment still applies.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let tracing_config = tracing_setup::TracingConfig {
        debug: cli.debug,
        otel: cli.otel,
    };
    tracing_setup::init(&tracing_config).ok();

    let result = match cli.command {
        Commands::Serve(args) => commands::run_serve(args).await,
        Commands::Query(args) => commands::run_query(args).await,
    };

    tracing_setup::shutdown_otel();
    result
}
