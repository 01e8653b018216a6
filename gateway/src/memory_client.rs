//! Thin HTTP client the evidence builder uses to read through Memory
//! (spec §4.6 "Upstream fetch"). One shared `reqwest::Client` per process
//! (spec §5 "Shared state" (2)), policy headers forwarded verbatim so
//! Memory re-derives and re-checks the effective policy itself — the
//! Gateway never trusts its own cached copy of an ACL decision.

use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value as JsonValue;

use bv_common::error::{AclReason, BvError, PreconditionSubkind};
use bv_models::node::Edge;
use bv_policy::headers::PolicyRequest;

/// Maps a non-2xx upstream status to the closest local `BvError` variant so
/// a denied/precondition-failed response from Memory surfaces as the same
/// kind of error here, rather than always reading as a generic timeout.
fn status_to_error(status: reqwest::StatusCode, context: &str) -> BvError {
    match status.as_u16() {
        400 => BvError::Validation(format!("{context}: upstream rejected the request")),
        403 => BvError::AclDenied {
            reason: AclReason::RoleMissing,
            status: 403,
        },
        404 => BvError::NotFound(context.to_string()),
        412 => BvError::Precondition {
            subkind: PreconditionSubkind::Mismatch,
        },
        503 => BvError::StorageUnavailable(context.to_string()),
        other => BvError::UpstreamTimeout(format!("{context} failed with status {other}")),
    }
}

/// `enrich`'s response body: the masked anchor node plus its mask summary.
pub type EnrichBody = JsonValue;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ExpandMeta {
    pub snapshot_etag: String,
    pub policy_fp: String,
    pub allowed_ids: Vec<String>,
    pub allowed_ids_fp: String,
    #[serde(default)]
    pub alias: AliasMeta,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct AliasMeta {
    #[serde(default)]
    pub returned: Vec<String>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct GraphBody {
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct ExpandCandidatesResponse {
    pub anchor: JsonValue,
    pub graph: GraphBody,
    pub meta: ExpandMeta,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct EnrichBatchMeta {
    #[serde(default)]
    pub returned_count: usize,
    #[serde(default)]
    pub allowed_ids: Vec<String>,
    #[serde(default)]
    pub allowed_ids_fp: String,
    #[serde(default)]
    pub policy_fp: String,
    #[serde(default)]
    pub snapshot_etag: String,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct EnrichBatchResponse {
    #[serde(default)]
    pub items: std::collections::BTreeMap<String, JsonValue>,
    #[serde(default)]
    pub meta: EnrichBatchMeta,
}

pub struct MemoryClient {
    http: reqwest::Client,
    base_url: String,
}

fn req_headers(preq: &PolicyRequest) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut put = |name: &'static str, value: &str| {
        if let (Ok(hn), Ok(hv)) = (HeaderName::from_static(name), HeaderValue::from_str(value)) {
            headers.insert(hn, hv);
        }
    };
    put("x-user-id", &preq.user_id);
    put("x-user-roles", &preq.all_roles.join(","));
    put("x-policy-version", &preq.policy_version);
    put("x-policy-key", &preq.policy_key);
    put("x-request-id", &preq.request_id);
    put("x-trace-id", &preq.trace_id);
    if let Some(ns) = &preq.user_namespaces {
        put("x-user-namespaces", &ns.join(","));
    }
    if let Some(scopes) = &preq.domain_scopes {
        put("x-domain-scopes", &scopes.join(","));
    }
    if let Some(edges) = &preq.edge_allow {
        put("x-edge-allow", &edges.join(","));
    }
    if let Some(hops) = preq.max_hops {
        put("x-max-hops", &hops.to_string());
    }
    if let Some(s) = &preq.sensitivity_ceiling {
        put("x-sensitivity-ceiling", s);
    }
    if let Some(status) = preq.denied_status {
        put("x-denied-status", &status.to_string());
    }
    headers
}

/// Jittered backoff in `[0, max_jitter_ms)`, matching the spec's "≤300 ms
/// jittered backoff" phrasing for the evidence builder's single retry.
fn jittered_backoff(max_jitter_ms: u64) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..=max_jitter_ms.max(1));
    Duration::from_millis(jitter)
}

impl MemoryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        MemoryClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// GET `/api/enrich?anchor=...` with at most one retry and a jittered
    /// backoff (spec §4.6 "Upstream fetch").
    pub async fn enrich(
        &self,
        anchor_id: &str,
        snapshot_etag: &str,
        preq: &PolicyRequest,
        timeout: Duration,
    ) -> Result<EnrichBody, BvError> {
        let url = format!("{}/api/enrich", self.base_url);
        let mut attempt = 0;
        loop {
            let resp = self
                .http
                .get(&url)
                .query(&[("anchor", anchor_id), ("snapshot_etag", snapshot_etag)])
                .headers(req_headers(preq))
                .timeout(timeout)
                .send()
                .await;
            match resp {
                Ok(r) if r.status().is_success() => {
                    return r
                        .json::<EnrichBody>()
                        .await
                        .map_err(|e| BvError::Internal(format!("enrich decode error: {e}")));
                }
                Ok(r) if attempt == 0 => {
                    let status = r.status();
                    tracing::warn!(status = %status, "memory enrich non-2xx, retrying once");
                }
                Ok(r) => return Err(status_to_error(r.status(), "memory enrich")),
                Err(e) if attempt == 0 => {
                    tracing::warn!(error = %e, "memory enrich transport error, retrying once");
                }
                Err(e) => return Err(BvError::UpstreamTimeout(format!("memory enrich: {e}"))),
            }
            attempt += 1;
            tokio::time::sleep(jittered_backoff(300)).await;
        }
    }

    /// POST `/api/graph/expand_candidates` with the same one-retry policy.
    pub async fn expand_candidates(
        &self,
        anchor_id: &str,
        snapshot_etag: &str,
        preq: &PolicyRequest,
        timeout: Duration,
    ) -> Result<ExpandCandidatesResponse, BvError> {
        let url = format!("{}/api/graph/expand_candidates", self.base_url);
        let body = serde_json::json!({"anchor": anchor_id, "snapshot_etag": snapshot_etag});
        let mut attempt = 0;
        loop {
            let resp = self
                .http
                .post(&url)
                .json(&body)
                .headers(req_headers(preq))
                .timeout(timeout)
                .send()
                .await;
            match resp {
                Ok(r) if r.status().is_success() => {
                    return r
                        .json::<ExpandCandidatesResponse>()
                        .await
                        .map_err(|e| BvError::Internal(format!("expand_candidates decode error: {e}")));
                }
                Ok(r) if attempt == 0 => {
                    let status = r.status();
                    tracing::warn!(status = %status, "memory expand_candidates non-2xx, retrying once");
                }
                Ok(r) => return Err(status_to_error(r.status(), "memory expand_candidates")),
                Err(e) if attempt == 0 => {
                    tracing::warn!(error = %e, "memory expand_candidates transport error, retrying once");
                }
                Err(e) => return Err(BvError::UpstreamTimeout(format!("memory expand_candidates: {e}"))),
            }
            attempt += 1;
            tokio::time::sleep(jittered_backoff(300)).await;
        }
    }

    /// POST `/api/enrich/batch` to fetch full masked node bodies for a set
    /// of ids in one round trip (spec §4.6 "Upstream fetch" batches
    /// neighbour lookups rather than issuing one enrich per edge).
    pub async fn enrich_batch(
        &self,
        anchor_id: &str,
        snapshot_etag: &str,
        ids: &[String],
        preq: &PolicyRequest,
        timeout: Duration,
    ) -> Result<EnrichBatchResponse, BvError> {
        if ids.is_empty() {
            return Ok(EnrichBatchResponse::default());
        }
        let url = format!("{}/api/enrich/batch", self.base_url);
        let body = serde_json::json!({
            "anchor_id": anchor_id,
            "snapshot_etag": snapshot_etag,
            "ids": ids,
        });
        let mut attempt = 0;
        loop {
            let resp = self
                .http
                .post(&url)
                .json(&body)
                .headers(req_headers(preq))
                .timeout(timeout)
                .send()
                .await;
            match resp {
                Ok(r) if r.status().is_success() => {
                    return r
                        .json::<EnrichBatchResponse>()
                        .await
                        .map_err(|e| BvError::Internal(format!("enrich_batch decode error: {e}")));
                }
                Ok(r) if attempt == 0 => {
                    let status = r.status();
                    tracing::warn!(status = %status, "memory enrich_batch non-2xx, retrying once");
                }
                Ok(r) => return Err(status_to_error(r.status(), "memory enrich_batch")),
                Err(e) if attempt == 0 => {
                    tracing::warn!(error = %e, "memory enrich_batch transport error, retrying once");
                }
                Err(e) => return Err(BvError::UpstreamTimeout(format!("memory enrich_batch: {e}"))),
            }
            attempt += 1;
            tokio::time::sleep(jittered_backoff(300)).await;
        }
    }

    /// GET `/healthz`, used by the load-shed sampler (spec §5).
    pub async fn healthz_is_error(&self, timeout: Duration) -> bool {
        let url = format!("{}/healthz", self.base_url);
        match self.http.get(&url).timeout(timeout).send().await {
            Ok(r) => r.status().is_server_error(),
            Err(_) => true,
        }
    }
}
