//! Command-line surface, mirroring the teacher's `BpciCli`
//! (`bpci-enterprise/src/cli/mod.rs`): global flags, `clap::Parser`, an
//! `execute()` that wires up logging before delegating to `lib::serve`.

use anyhow::Result;
use clap::Parser;

use bv_common::config::Settings;

#[derive(Parser, Debug)]
#[command(name = "memory-api", about = "BatVault Memory service")]
pub struct MemoryCli {
    /// Bind address, e.g. 0.0.0.0:8081
    #[arg(long, env = "MEMORY_API_BIND", default_value = "0.0.0.0:8081")]
    pub bind: String,

    /// Optional TOML config overlay (env vars still take precedence).
    #[arg(long, env = "MEMORY_API_CONFIG")]
    pub config: Option<String>,

    /// Root directory for storage (sled) when not running in-memory.
    #[arg(long, env = "MEMORY_API_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Run against an in-process memory graph store instead of sled.
    #[arg(long, default_value_t = false)]
    pub in_memory: bool,

    #[arg(long, default_value_t = false)]
    pub verbose: bool,
}

impl MemoryCli {
    pub async fn execute(&self) -> Result<()> {
        let filter = if self.verbose { "debug" } else { "info" };
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
            )
            .json()
            .init();

        let settings = Settings::load(self.config.as_deref())
            .map_err(|e| anyhow::anyhow!("config error: {e}"))?;

        crate::serve(self, settings).await
    }
}
