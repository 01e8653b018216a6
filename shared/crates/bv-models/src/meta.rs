//! Response `meta` block (spec §4.13): everything a caller needs to audit,
//! cache-bust or replay a `/v2/ask` answer without re-deriving it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EvidenceMetrics {
    pub events_total: usize,
    pub events_truncated: usize,
    pub transitions_preceding: usize,
    pub transitions_succeeding: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MetaInfo {
    pub request_id: String,
    pub policy_id: String,
    pub prompt_id: String,
    pub prompt_fingerprint: String,
    pub bundle_fingerprint: String,
    pub bundle_size_bytes: usize,

    pub prompt_tokens: u32,
    pub max_tokens: u32,
    pub evidence_tokens: u32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_etag: Option<String>,
    pub snapshot_available: bool,

    pub gateway_version: String,
    pub selector_model_id: String,

    pub fallback_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,

    pub retries: u32,
    pub latency_ms: u64,

    pub validator_error_count: usize,
    #[serde(default)]
    pub validator_warnings: Vec<String>,

    pub evidence_metrics: EvidenceMetrics,
    pub events_total: usize,
    pub events_truncated: usize,

    pub load_shed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    pub resolver_path: String,

    /// Extension bag for fields callers attach ad-hoc (e.g. routing audit);
    /// kept so `meta` can grow without another schema bump.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, JsonValue>,
}

impl MetaInfo {
    pub fn builder(request_id: impl Into<String>, gateway_version: impl Into<String>) -> Self {
        MetaInfo {
            request_id: request_id.into(),
            gateway_version: gateway_version.into(),
            snapshot_available: true,
            resolver_path: "graph".to_string(),
            ..Default::default()
        }
    }
}
