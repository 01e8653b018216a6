//! Thin CLI entry point; all behaviour lives in `lib.rs` (spec.md §4.6-§4.13).

use anyhow::Result;
use clap::Parser;

use gateway::cli::GatewayCli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = GatewayCli::parse();
    cli.execute().await
}
