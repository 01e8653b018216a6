//! Memory service library: router assembly and the `serve` entry point
//! (spec.md §4.5). `main.rs` only parses the CLI and calls [`serve`],
//! mirroring the teacher's thin-binary/fat-lib split.

pub mod cli;
pub mod error;
pub mod graph_view;
pub mod handlers;
pub mod headers;
pub mod precondition;
pub mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use bv_cache::{MemoryCache, RawCache, RedisCache};
use bv_policy::PolicyRegistry;
use storage::{GraphStore, MemoryGraphStore, SledGraphStore};

use crate::cli::MemoryCli;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/api/enrich", get(handlers::enrich))
        .route("/api/enrich/batch", post(handlers::enrich_batch))
        .route("/api/resolve/text", post(handlers::resolve_text))
        .route("/api/graph/expand_candidates", post(handlers::expand_candidates))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(cli: &MemoryCli, settings: bv_common::config::Settings) -> anyhow::Result<()> {
    let registry = PolicyRegistry::new(&settings.policy_dir);

    let graph: Arc<dyn GraphStore> = if cli.in_memory {
        Arc::new(MemoryGraphStore::new_in_memory())
    } else {
        let dir = cli.data_dir.clone().unwrap_or_else(|| "./data/memory".to_string());
        Arc::new(SledGraphStore::open_path(&dir).map_err(|e| anyhow::anyhow!("opening sled store at {dir}: {e}"))?)
    };

    let cache: Arc<dyn RawCache> = if cli.in_memory {
        Arc::new(MemoryCache::new())
    } else {
        Arc::new(RedisCache::new(&settings.redis_url).map_err(|e| anyhow::anyhow!("connecting to redis: {e}"))?)
    };

    let state = Arc::new(AppState {
        graph,
        registry,
        cache,
        settings,
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    info!(bind = %cli.bind, "memory-api listening");
    axum::serve(listener, app).await.context("axum serve")?;
    Ok(())
}
