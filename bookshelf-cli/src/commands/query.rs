//! One-shot lookup from the command line, printed as JSON

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use super::db::DbArgs;

#[derive(Parser, Debug)]
pub struct QueryArgs {
    /// Author to look up (exact match)
    pub author: String,

    /// Give up on the query after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pub pretty: bool,

    #[command(flatten)]
    pub db: DbArgs,
}

pub async fn run_query(args: QueryArgs) -> Result<()> {
    let repo = args.db.repo()?;

    let result = match args.timeout_ms {
        Some(ms) => {
            repo.find_books_by_author_within(&args.author, Duration::from_millis(ms))
                .await
        }
        None => repo.find_books_by_author(&args.author).await,
    };
    repo.pool().drain().await;

    let books = result.with_context(|| format!("Lookup for author '{}' failed", args.author))?;
    let json = if args.pretty {
        serde_json::to_string_pretty(&books)?
    } else {
        serde_json::to_string(&books)?
    };
    println!("{}", json);

    Ok(())
}
