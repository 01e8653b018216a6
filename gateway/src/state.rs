//! Process-wide shared state (spec.md §5 "Shared state"): one shared HTTP
//! client to Memory, one cache client, the role-profile registry and
//! settings, constructed once at startup and handed to every handler
//! through axum's `State` extractor — the same shape as memory-api's
//! `AppState` / the teacher's `EconomicApiState`.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use bv_cache::RawCache;
use bv_common::config::Settings;
use bv_policy::PolicyRegistry;

use crate::llm::LastCall;
use crate::memory_client::MemoryClient;

/// Fingerprint of the fixed wire-schema shapes this build returns
/// (spec §4.13 is covered by `X-BV-Schema-FP` mirrored on Memory reads;
/// the Gateway reuses the constant so audits can compare builds).
pub const SCHEMA_VERSION: &str = "gateway.v1";

pub struct AppState {
    pub memory: MemoryClient,
    pub cache: Arc<dyn RawCache>,
    pub registry: PolicyRegistry,
    pub settings: Settings,
    /// Per-process LRU+TTL of request-scoped artifact bundles (spec §4.4
    /// "Process-local"), keyed by `request_id`.
    pub bundle_cache: bv_cache::LocalTtlCache<serde_json::Value>,
    /// `last_call` LLM telemetry (spec §5 "Shared state" (4)): per-process
    /// global, last-writer-wins, useful only for the immediately preceding
    /// call.
    pub last_call: Mutex<Option<LastCall>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn record_last_call(&self, call: LastCall) {
        if let Ok(mut slot) = self.last_call.lock() {
            *slot = Some(call);
        }
    }
}
