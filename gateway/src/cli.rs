//! Command-line surface, mirroring the teacher's `BpciCli`
//! (`bpci-enterprise/src/cli/mod.rs`): global flags, `clap::Parser`, an
//! `execute()` that wires up logging before delegating to `lib::serve`.

use anyhow::Result;
use clap::Parser;

use bv_common::config::Settings;

#[derive(Parser, Debug)]
#[command(name = "gateway", about = "BatVault Gateway service")]
pub struct GatewayCli {
    /// Bind address, e.g. 0.0.0.0:8082
    #[arg(long, env = "GATEWAY_BIND", default_value = "0.0.0.0:8082")]
    pub bind: String,

    /// Optional TOML config overlay (env vars still take precedence).
    #[arg(long, env = "GATEWAY_CONFIG")]
    pub config: Option<String>,

    /// Base URL of the Memory service this Gateway reads through.
    #[arg(long, env = "MEMORY_API_URL", default_value = "http://127.0.0.1:8081")]
    pub memory_url: String,

    /// Run against an in-process cache fake instead of Redis.
    #[arg(long, default_value_t = false)]
    pub in_memory: bool,

    #[arg(long, default_value_t = false)]
    pub verbose: bool,
}

impl GatewayCli {
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
