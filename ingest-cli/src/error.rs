//! Batch-level failure modes and their exit codes (spec.md §6 "Exit codes
//! (ingest CLI)"), the ingest analogue of `bv_common::error::BvError`.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("no fixtures found under {0}")]
    NoFixtures(String),

    #[error("{} validation error(s):\n{}", .0.len(), .0.join("\n"))]
    Validation(Vec<String>),

    #[error("{} referential-integrity error(s):\n{}", .0.len(), .0.join("\n"))]
    ReferentialIntegrity(Vec<String>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IngestError {
    /// Exit code per spec.md §6: `0 ok`, `1 no fixtures found`,
    /// `2 validation errors`, `3 referential-integrity errors`. `Other`
    /// covers storage/IO failures outside the enumerated set and exits `1`
    /// the same way a missing fixtures directory does (nothing was ingested).
    pub fn exit_code(&self) -> i32 {
        match self {
            IngestError::NoFixtures(_) => 1,
            IngestError::Validation(_) => 2,
            IngestError::ReferentialIntegrity(_) => 3,
            IngestError::Other(_) => 1,
        }
    }
}
