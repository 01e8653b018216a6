//! Thin CLI entry point; all behaviour lives in `lib.rs` (spec.md §4.5).

use anyhow::Result;
use clap::Parser;

use memory_api::cli::MemoryCli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = MemoryCli::parse();
    cli.execute().await
}
