//! Thin CLI entry point; all behaviour lives in `lib.rs` (spec.md §4.14).

use anyhow::Result;
use clap::Parser;

use ingest_cli::cli::IngestCli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = IngestCli::parse();
    let outcome = cli.execute().await;
    std::process::exit(ingest_cli::cli::report(outcome));
}
