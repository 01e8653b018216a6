//! The four Memory endpoints plus `/healthz` (spec.md §4.5). Each handler
//! follows the same shape: parse policy headers fail-closed, enforce the
//! snapshot precondition, derive the effective policy, do the read, mask,
//! mirror fingerprints — mirroring the teacher's `economic_api.rs` handlers
//! (`State<Arc<T>>` extractor, `Result<_, ApiError>` return).

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

use bv_common::error::{AclReason, BvError};
use bv_policy::backend::acl_denied;
use bv_policy::{acl_check, field_mask_with_summary, EffectivePolicy, PolicyRequest};
use bv_cache::swr::{self, CacheHit};

use crate::error::ApiError;
use crate::graph_view;
use crate::headers::{to_raw_headers, OutboundFingerprints};
use crate::precondition;
use crate::state::{AppState, SCHEMA_FP};

fn req_id_hint(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

async fn effective_policy(state: &AppState, req: &PolicyRequest) -> Result<EffectivePolicy, BvError> {
    let profile = state.registry.load(&req.active_role)?;
    Ok(EffectivePolicy::derive(req, &profile))
}

pub async fn healthz() -> Json<JsonValue> {
    Json(json!({"status": "ok"}))
}

#[derive(Debug, Deserialize)]
pub struct EnrichQuery {
    pub anchor: String,
    #[serde(default)]
    pub snapshot_etag: Option<String>,
}

pub async fn enrich(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<EnrichQuery>,
) -> Result<(HeaderMap, Json<JsonValue>), ApiError> {
    let rid = req_id_hint(&headers);
    let run = async {
        let raw = to_raw_headers(&headers);
        let preq = PolicyRequest::parse(&raw)?;
        let current_etag = precondition::enforce(
            state.graph.as_ref(),
            preq.snapshot_etag.as_deref(),
            query.snapshot_etag.as_deref(),
        )
        .await?;
        let policy = effective_policy(&state, &preq).await?;

        let (domain, _id) = bv_common::ids::parse_anchor(&query.anchor)?;
        let node = state
            .graph
            .get_node(&query.anchor)
            .await?
            .ok_or_else(|| BvError::NotFound(query.anchor.clone()))?;
        if node.domain != domain {
            return Err(BvError::DomainMismatch(format!(
                "anchor domain '{domain}' does not match stored domain '{}'",
                node.domain
            )));
        }
        acl_check(&node, &policy).map_err(|reason| acl_denied(reason, &policy))?;
        let (masked, summary) = field_mask_with_summary(&node, &policy.field_visibility, &policy.extra_visible);

        let mut body = serde_json::to_value(&masked).map_err(BvError::serialization)?;
        if let JsonValue::Object(ref mut obj) = body {
            obj.insert("mask_summary".to_string(), serde_json::to_value(&summary).map_err(BvError::serialization)?);
        }

        let fp = OutboundFingerprints {
            snapshot_etag: Some(current_etag),
            policy_fp: Some(policy.policy_fp.clone()),
            schema_fp: Some(SCHEMA_FP.clone()),
            ..Default::default()
        };
        Ok::<_, BvError>((body, fp))
    };

    let (body, fp) = run.await.map_err(|e| ApiError::new(e, rid))?;
    let mut out_headers = HeaderMap::new();
    crate::headers::apply(&mut out_headers, &fp);
    Ok((out_headers, Json(body)))
}

#[derive(Debug, Deserialize)]
pub struct EnrichBatchRequest {
    pub anchor_id: String,
    #[serde(default)]
    pub snapshot_etag: Option<String>,
    pub ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EnrichBatchMeta {
    returned_count: usize,
    allowed_ids: Vec<String>,
    allowed_ids_fp: String,
    policy_fp: String,
    snapshot_etag: String,
}

pub async fn enrich_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<EnrichBatchRequest>,
) -> Result<(HeaderMap, Json<JsonValue>), ApiError> {
    let rid = req_id_hint(&headers);
    let run = async {
        let raw = to_raw_headers(&headers);
        let preq = PolicyRequest::parse(&raw)?;
        let current_etag = precondition::enforce(
            state.graph.as_ref(),
            preq.snapshot_etag.as_deref(),
            req.snapshot_etag.as_deref(),
        )
        .await?;
        let policy = effective_policy(&state, &preq).await?;

        let anchor = state
            .graph
            .get_node(&req.anchor_id)
            .await?
            .ok_or_else(|| BvError::NotFound(req.anchor_id.clone()))?;
        acl_check(&anchor, &policy).map_err(|reason| acl_denied(reason, &policy))?;

        let view = graph_view::expand(state.graph.as_ref(), &anchor, &policy).await?;
        let allowed_set: std::collections::BTreeSet<&str> =
            view.allowed_ids.iter().map(|s| s.as_str()).collect();
        if !req.ids.iter().all(|id| allowed_set.contains(id.as_str())) {
            return Err(acl_denied(AclReason::RequestedIdsOutOfScope, &policy));
        }

        let mut items = serde_json::Map::new();
        for id in &req.ids {
            let Some(node) = state.graph.get_node(id).await? else {
                continue;
            };
            if acl_check(&node, &policy).is_err() {
                continue;
            }
            let (masked, _summary) = field_mask_with_summary(&node, &policy.field_visibility, &policy.extra_visible);
            items.insert(id.clone(), serde_json::to_value(&masked).map_err(BvError::serialization)?);
        }

        let allowed_ids_fp = bv_common::fingerprint(&view.allowed_ids)?;
        let meta = EnrichBatchMeta {
            returned_count: items.len(),
            allowed_ids: view.allowed_ids,
            allowed_ids_fp: allowed_ids_fp.clone(),
            policy_fp: policy.policy_fp.clone(),
            snapshot_etag: current_etag.clone(),
        };
        let body = json!({"items": items, "meta": meta});

        let fp = OutboundFingerprints {
            snapshot_etag: Some(current_etag),
            policy_fp: Some(policy.policy_fp.clone()),
            allowed_ids_fp: Some(allowed_ids_fp),
            schema_fp: Some(SCHEMA_FP.clone()),
            ..Default::default()
        };
        Ok::<_, BvError>((body, fp))
    };

    let (body, fp) = run.await.map_err(|e| ApiError::new(e, rid))?;
    let mut out_headers = HeaderMap::new();
    crate::headers::apply(&mut out_headers, &fp);
    Ok((out_headers, Json(body)))
}

#[derive(Debug, Deserialize)]
pub struct ResolveTextRequest {
    pub q: String,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub use_vector: bool,
    #[serde(default)]
    pub query_vector: Option<Vec<f64>>,
    #[serde(default)]
    pub snapshot_etag: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ResolveMatch {
    id: String,
    score: f64,
    title: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ResolveBody {
    query: String,
    matches: Vec<ResolveMatch>,
    vector_used: bool,
    resolved_id: Option<String>,
}

async fn compute_resolve(
    state: &AppState,
    policy: &EffectivePolicy,
    query: &str,
    limit: usize,
    use_vector: bool,
    query_vector: Option<&[f64]>,
) -> Result<ResolveBody, BvError> {
    if bv_common::ids::is_valid_anchor(query) {
        if let Some(node) = state.graph.get_node(query).await? {
            if acl_check(&node, policy).is_ok() {
                return Ok(ResolveBody {
                    query: query.to_string(),
                    matches: vec![ResolveMatch {
                        id: node.id.clone(),
                        score: 1.0,
                        title: node.title.clone(),
                        kind: match node.kind {
                            bv_models::node::NodeKind::Decision => "DECISION".to_string(),
                            bv_models::node::NodeKind::Event => "EVENT".to_string(),
                        },
                    }],
                    vector_used: false,
                    resolved_id: Some(node.id),
                });
            }
        }
    }

    let vector = if use_vector && state.settings.enable_embeddings {
        query_vector
    } else {
        None
    };
    let (hits, vector_used) = state
        .graph
        .resolve_text(query, &policy.domain_scopes, limit, vector)
        .await?;
    let mut matches = Vec::new();
    for (id, score) in hits {
        let Some(node) = state.graph.get_node(&id).await? else {
            continue;
        };
        if acl_check(&node, policy).is_err() {
            continue;
        }
        matches.push(ResolveMatch {
            id: node.id.clone(),
            score,
            title: node.title.clone(),
            kind: match node.kind {
                bv_models::node::NodeKind::Decision => "DECISION".to_string(),
                bv_models::node::NodeKind::Event => "EVENT".to_string(),
            },
        });
    }
    Ok(ResolveBody {
        query: query.to_string(),
        matches,
        vector_used,
        resolved_id: None,
    })
}

pub async fn resolve_text(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ResolveTextRequest>,
) -> Result<(HeaderMap, Json<JsonValue>), ApiError> {
    let rid = req_id_hint(&headers);
    let run = async {
        let raw = to_raw_headers(&headers);
        let preq = PolicyRequest::parse(&raw)?;
        let current_etag = precondition::enforce(
            state.graph.as_ref(),
            preq.snapshot_etag.as_deref(),
            req.snapshot_etag.as_deref(),
        )
        .await?;
        let policy = effective_policy(&state, &preq).await?;
        let limit = req.limit.unwrap_or(10).max(1);

        let cache_key = bv_cache::keys::mem_resolve(Some(&current_etag), Some(&policy.policy_fp), Some(&req.q));
        if let Some((hit, should_refresh)) = swr::read::<_, ResolveBody>(&state.cache, &cache_key).await {
            if should_refresh {
                let state2 = state.clone();
                let policy2 = policy.clone();
                let q = req.q.clone();
                let key2 = cache_key.clone();
                let ttl = state.settings.ttl_resolver_cache_sec;
                let use_vector = req.use_vector;
                let query_vector = req.query_vector.clone();
                tokio::spawn(async move {
                    if let Ok(body) =
                        compute_resolve(&state2, &policy2, &q, limit, use_vector, query_vector.as_deref()).await
                    {
                        if body.matches.is_empty() {
                            let _ = swr::write_negative(&state2.cache, &key2, ttl).await;
                        } else {
                            let _ = swr::write(&state2.cache, &key2, &body, ttl).await;
                        }
                    }
                });
            }
            let body = match hit {
                CacheHit::Found(b) => b,
                CacheHit::Negative => ResolveBody {
                    query: req.q.clone(),
                    matches: vec![],
                    vector_used: false,
                    resolved_id: None,
                },
            };
            let body_json = serde_json::to_value(&body).map_err(BvError::serialization)?;
            let fp = OutboundFingerprints {
                snapshot_etag: Some(current_etag),
                policy_fp: Some(policy.policy_fp.clone()),
                schema_fp: Some(SCHEMA_FP.clone()),
                ..Default::default()
            };
            return Ok::<_, BvError>((body_json, fp));
        }

        let body = compute_resolve(
            &state,
            &policy,
            &req.q,
            limit,
            req.use_vector,
            req.query_vector.as_deref(),
        )
        .await?;
        if body.matches.is_empty() {
            swr::write_negative(&state.cache, &cache_key, state.settings.ttl_resolver_cache_sec).await?;
        } else {
            swr::write(&state.cache, &cache_key, &body, state.settings.ttl_resolver_cache_sec).await?;
        }
        let body_json = serde_json::to_value(&body).map_err(BvError::serialization)?;

        let fp = OutboundFingerprints {
            snapshot_etag: Some(current_etag),
            policy_fp: Some(policy.policy_fp.clone()),
            schema_fp: Some(SCHEMA_FP.clone()),
            ..Default::default()
        };
        Ok::<_, BvError>((body_json, fp))
    };

    let (body, fp) = run.await.map_err(|e| ApiError::new(e, rid))?;
    let mut out_headers = HeaderMap::new();
    crate::headers::apply(&mut out_headers, &fp);
    Ok((out_headers, Json(body)))
}

#[derive(Debug, Deserialize)]
pub struct ExpandCandidatesRequest {
    pub anchor: String,
    #[serde(default)]
    pub snapshot_etag: Option<String>,
}

/// The outbound "Graph View" shape is only ever built by us, but the spec
/// calls for validating it against its schema before returning — a guard
/// against a future bug silently shipping a malformed edge.
fn validate_graph_view(anchor_id: &str, edges: &[bv_models::node::Edge]) -> Result<(), BvError> {
    if anchor_id.is_empty() {
        return Err(BvError::Validation("graph view anchor id is empty".into()));
    }
    for edge in edges {
        if edge.from.is_empty() || edge.to.is_empty() {
            return Err(BvError::Validation("graph view edge has an empty endpoint".into()));
        }
    }
    Ok(())
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct ExpandView {
    anchor: JsonValue,
    edges: Vec<bv_models::node::Edge>,
    allowed_ids: Vec<String>,
    allowed_ids_fp: String,
    graph_fp: String,
    alias_returned: Vec<String>,
}

async fn compute_expand_view(
    state: &AppState,
    policy: &EffectivePolicy,
    anchor: &bv_models::node::Node,
) -> Result<ExpandView, BvError> {
    let (masked_anchor, _summary) = field_mask_with_summary(anchor, &policy.field_visibility, &policy.extra_visible);

    let view = graph_view::expand(state.graph.as_ref(), anchor, policy).await?;
    validate_graph_view(&anchor.id, &view.edges)?;

    let mut sorted_edges = view.edges;
    sorted_edges.sort_by(|a, b| (a.kind.as_str(), &a.from, &a.to).cmp(&(b.kind.as_str(), &b.from, &b.to)));
    let graph_fp = bv_common::fingerprint(&(&anchor.id, &sorted_edges))?;
    let allowed_ids_fp = bv_common::fingerprint(&view.allowed_ids)?;

    Ok(ExpandView {
        anchor: serde_json::to_value(&masked_anchor).map_err(BvError::serialization)?,
        edges: sorted_edges,
        allowed_ids: view.allowed_ids,
        allowed_ids_fp,
        graph_fp,
        alias_returned: view.alias_returned,
    })
}

fn expand_view_body(view: &ExpandView, current_etag: &str, policy: &EffectivePolicy) -> JsonValue {
    json!({
        "anchor": view.anchor,
        "graph": {"edges": view.edges},
        "meta": {
            "snapshot_etag": current_etag,
            "policy_fp": policy.policy_fp,
            "allowed_ids": view.allowed_ids,
            "allowed_ids_fp": view.allowed_ids_fp,
            "fingerprints": {"graph_fp": view.graph_fp},
            "alias": {"returned": view.alias_returned},
        },
    })
}

pub async fn expand_candidates(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ExpandCandidatesRequest>,
) -> Result<(HeaderMap, Json<JsonValue>), ApiError> {
    let rid = req_id_hint(&headers);
    let run = async {
        let raw = to_raw_headers(&headers);
        let preq = PolicyRequest::parse(&raw)?;
        let current_etag = precondition::enforce(
            state.graph.as_ref(),
            preq.snapshot_etag.as_deref(),
            req.snapshot_etag.as_deref(),
        )
        .await?;
        let policy = effective_policy(&state, &preq).await?;

        let anchor = state
            .graph
            .get_node(&req.anchor)
            .await?
            .ok_or_else(|| BvError::NotFound(req.anchor.clone()))?;
        acl_check(&anchor, &policy).map_err(|reason| acl_denied(reason, &policy))?;

        let cache_key = bv_cache::keys::mem_expand_candidates(
            Some(&current_etag),
            Some(&policy.policy_fp),
            Some(&req.anchor),
        );

        let view = match swr::read::<_, ExpandView>(&state.cache, &cache_key).await {
            Some((CacheHit::Found(cached), should_refresh)) => {
                if should_refresh {
                    let state2 = state.clone();
                    let policy2 = policy.clone();
                    let anchor2 = anchor.clone();
                    let key2 = cache_key.clone();
                    let ttl = state.settings.ttl_expand_cache_sec;
                    tokio::spawn(async move {
                        if let Ok(fresh) = compute_expand_view(&state2, &policy2, &anchor2).await {
                            let _ = swr::write(&state2.cache, &key2, &fresh, ttl).await;
                        }
                    });
                }
                cached
            }
            _ => {
                let fresh = compute_expand_view(&state, &policy, &anchor).await?;
                swr::write(&state.cache, &cache_key, &fresh, state.settings.ttl_expand_cache_sec).await?;
                fresh
            }
        };

        let body = expand_view_body(&view, &current_etag, &policy);

        let fp = OutboundFingerprints {
            snapshot_etag: Some(current_etag),
            policy_fp: Some(policy.policy_fp.clone()),
            allowed_ids_fp: Some(view.allowed_ids_fp.clone()),
            graph_fp: Some(view.graph_fp.clone()),
            schema_fp: Some(SCHEMA_FP.clone()),
            ..Default::default()
        };
        Ok::<_, BvError>((body, fp))
    };

    let (body, fp) = run.await.map_err(|e| ApiError::new(e, rid))?;
    let mut out_headers = HeaderMap::new();
    crate::headers::apply(&mut out_headers, &fp);
    Ok((out_headers, Json(body)))
}
