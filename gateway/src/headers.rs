//! Bridges axum's `HeaderMap` to `bv_policy::RawHeaders`, and builds the
//! outbound fingerprint/snapshot headers `/v2/ask` mirrors back (spec §4.13,
//! §6) — identical shape to memory-api's `headers.rs`.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use bv_policy::headers::{
    OUT_ALLOWED_IDS_FP, OUT_GRAPH_FP, OUT_POLICY_ADVICE, OUT_POLICY_FP, OUT_SCHEMA_FP,
    OUT_SNAPSHOT_ETAG,
};
use bv_policy::RawHeaders;

pub fn to_raw_headers(headers: &HeaderMap) -> RawHeaders {
    RawHeaders::from_pairs(headers.iter().filter_map(|(name, value)| {
        value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
    }))
}

#[derive(Default)]
pub struct OutboundFingerprints {
    pub snapshot_etag: Option<String>,
    pub policy_fp: Option<String>,
    pub allowed_ids_fp: Option<String>,
    pub graph_fp: Option<String>,
    pub schema_fp: Option<String>,
    pub policy_advice: Option<String>,
    /// `x-request-id` / `x-trace-id` (spec §4.13 "Headers mirror ... plus").
    pub request_id: Option<String>,
    pub trace_id: Option<String>,
}

fn insert(headers: &mut HeaderMap, name: &str, value: &Option<String>) {
    if let Some(v) = value {
        if let (Ok(hn), Ok(hv)) = (
            HeaderName::try_from(name.to_ascii_lowercase()),
            HeaderValue::from_str(v),
        ) {
            headers.insert(hn, hv);
        }
    }
}

pub fn apply(headers: &mut HeaderMap, fp: &OutboundFingerprints) {
    insert(headers, OUT_SNAPSHOT_ETAG, &fp.snapshot_etag);
    insert(headers, OUT_POLICY_FP, &fp.policy_fp);
    insert(headers, OUT_ALLOWED_IDS_FP, &fp.allowed_ids_fp);
    insert(headers, OUT_GRAPH_FP, &fp.graph_fp);
    insert(headers, OUT_SCHEMA_FP, &fp.schema_fp);
    insert(headers, OUT_POLICY_ADVICE, &fp.policy_advice);
    insert(headers, "x-request-id", &fp.request_id);
    insert(headers, "x-trace-id", &fp.trace_id);
}
