//! Fixture ingest normaliser library: everything from file collection
//! through upsert-then-prune lives here; `main.rs` only parses the CLI
//! and reports the exit code (spec.md §4.14).

pub mod cli;
pub mod collect;
pub mod error;
pub mod etag;
pub mod links;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod schema;
