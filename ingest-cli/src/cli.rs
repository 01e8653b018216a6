//! Command-line surface, mirroring the teacher's `BpciCli`
//! (`bpci-enterprise/src/cli/mod.rs`) and this workspace's
//! `memory_api::cli::MemoryCli`: global flags via `clap::Parser`, an
//! `execute()` that wires up logging and storage before delegating to the
//! pipeline, and a process exit code per spec.md §6.

use clap::Parser;
use tracing::{error, info};

use bv_policy::PolicyRegistry;
use storage::{GraphStore, MemoryGraphStore, SledGraphStore};

use crate::error::IngestError;
use crate::pipeline::{self, IngestSummary};

#[derive(Parser, Debug)]
#[command(name = "ingest-cli", about = "BatVault fixture ingest normaliser")]
pub struct IngestCli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand, Debug)]
pub enum Command {
    /// Normalise and upsert one fixtures tree, then prune stale nodes.
    Run {
        /// Root directory of batch fixtures to ingest.
        #[arg(long, env = "INGEST_FIXTURES")]
        fixtures: String,

        /// Role-profile directory; every `role-*.json` found is parsed and
        /// its `edge_allowlist` cross-checked against the relation catalog.
        #[arg(long, env = "POLICY_DIR", default_value = "./policies")]
        policy_dir: String,

        /// Root directory for sled storage. Omit (or pass `--in-memory`)
        /// to ingest into a throwaway in-process store, e.g. for a dry run.
        #[arg(long, env = "INGEST_DATA_DIR")]
        data_dir: Option<String>,

        #[arg(long, default_value_t = false)]
        in_memory: bool,

        #[arg(long, default_value_t = false)]
        verbose: bool,
    },
}

impl IngestCli {
    pub async fn execute(&self) -> Result<IngestSummary, IngestError> {
        let Command::Run {
            fixtures,
            policy_dir,
            data_dir,
            in_memory,
            verbose,
        } = &self.command;

        let filter = if *verbose { "debug" } else { "info" };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
            )
            .json()
            .try_init();

        check_policy_dir(policy_dir);

        let fixtures_path = std::path::PathBuf::from(fixtures);

        if *in_memory || data_dir.is_none() {
            let store = MemoryGraphStore::new_in_memory();
            pipeline::run(&store as &dyn GraphStore, &fixtures_path).await
        } else {
            let dir = data_dir.clone().unwrap();
            let store = SledGraphStore::open_path(&dir)
                .map_err(|e| IngestError::Other(anyhow::anyhow!(e)))?;
            pipeline::run(&store as &dyn GraphStore, &fixtures_path).await
        }
    }
}

/// Best-effort advisory pass: parses every `role-*.json` under
/// `policy_dir` and warns (never fails the run) when a role's
/// `edge_allowlist` names a relation outside the fixed catalog.
fn check_policy_dir(policy_dir: &str) {
    let dir = std::path::Path::new(policy_dir);
    let Ok(entries) = std::fs::read_dir(dir) else {
        info!(policy_dir, "policy directory not readable, skipping advisory check");
        return;
    };
    let registry = PolicyRegistry::new(dir.to_path_buf());
    let catalog = crate::links::relation_catalog();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(role) = name
            .strip_prefix("role-")
            .and_then(|s| s.strip_suffix(".json"))
        else {
            continue;
        };
        match registry.load(role) {
            Ok(profile) => {
                for edge in &profile.edge_allowlist {
                    if !catalog.contains(&edge.as_str()) {
                        tracing::warn!(role, edge, "edge_allowlist names a relation outside the known catalog");
                    }
                }
            }
            Err(e) => tracing::warn!(role, error = %e, "could not parse role profile"),
        }
    }
}

/// Prints the one-line JSON summary on success and returns the process
/// exit code (spec.md §6: `0 ok`, `1 no fixtures found`, `2 validation
/// errors`, `3 referential-integrity errors`).
pub fn report(outcome: Result<IngestSummary, IngestError>) -> i32 {
    match outcome {
        Ok(summary) => {
            info!(
                field_catalog = ?summary.field_catalog,
                relation_catalog = ?summary.relation_catalog,
                "catalogs built"
            );
            match serde_json::to_string(&summary) {
                Ok(json) => println!("{json}"),
                Err(e) => error!(error = %e, "failed to serialise summary"),
            }
            0
        }
        Err(e) => {
            error!(error = %e, "ingest failed");
            e.exit_code()
        }
    }
}
