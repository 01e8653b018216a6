//! Process-wide shared state (spec.md §5 "Shared state"): one storage
//! driver, one cache client, the role-profile registry and settings,
//! constructed once at startup and handed to every handler through axum's
//! `State` extractor — the same shape as the teacher's `EconomicApiState`.

use std::sync::Arc;

use once_cell::sync::Lazy;

use bv_cache::RawCache;
use bv_common::config::Settings;
use bv_policy::PolicyRegistry;
use storage::GraphStore;

pub struct AppState {
    pub graph: Arc<dyn GraphStore>,
    pub registry: PolicyRegistry,
    pub cache: Arc<dyn RawCache>,
    pub settings: Settings,
}

/// Fingerprint of the fixed Memory wire-schema shapes this build returns
/// (spec §4.5 `X-BV-Schema-FP`). Bumped only when the shapes themselves
/// change, so it never varies per-request.
pub const SCHEMA_VERSION: &str = "memory-api.v1";

pub static SCHEMA_FP: Lazy<String> =
    Lazy::new(|| bv_common::fingerprint(&SCHEMA_VERSION).expect("schema version always serialises"));
