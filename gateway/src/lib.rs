//! Gateway service library: router assembly, the `serve` entry point, and
//! the `/v2/ask` handler that wires evidence → selector → budget gate →
//! LLM router → validator → bundle → response assembly (spec.md §4.1-§4.13).
//! `main.rs` only parses the CLI and calls [`serve`], mirroring the
//! teacher's thin-binary/fat-lib split (memory-api's `lib.rs` is the same
//! shape one layer down the stack).

pub mod budget;
pub mod bundle;
pub mod cli;
pub mod error;
pub mod evidence;
pub mod headers;
pub mod llm;
pub mod load_shed;
pub mod memory_client;
pub mod selector;
pub mod state;
pub mod validator;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use bv_cache::{idem_redis_key, request_scope_fp, EvidenceCache, IdemRecord, IdemStore, MemoryCache, RawCache, RedisCache};
use bv_common::config::Settings;
use bv_common::error::BvError;
use bv_models::evidence::WhyDecisionAnswer;
use bv_models::meta::{EvidenceMetrics, MetaInfo};
use bv_models::response::WhyDecisionResponse;
use bv_policy::{EffectivePolicy, PolicyRegistry, PolicyRequest};

use crate::cli::GatewayCli;
use crate::error::ApiError;
use crate::headers::{to_raw_headers, OutboundFingerprints};
use crate::memory_client::MemoryClient;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v2/ask", post(ask))
        .route("/v2/query", post(query))
        .with_state(state)
}

pub async fn serve(cli: &GatewayCli, settings: Settings) -> anyhow::Result<()> {
    let registry = PolicyRegistry::new(settings.policy_dir.clone());

    let memory = MemoryClient::new(cli.memory_url.clone());

    let cache: Arc<dyn RawCache> = if cli.in_memory {
        Arc::new(MemoryCache::new())
    } else {
        Arc::new(RedisCache::new(&settings.redis_url).map_err(|e| anyhow::anyhow!("connecting to redis: {e}"))?)
    };

    let bundle_cache = bv_cache::LocalTtlCache::new(200, 600);

    let state = Arc::new(AppState {
        memory,
        cache,
        registry,
        settings,
        bundle_cache,
        last_call: std::sync::Mutex::new(None),
        started_at: Instant::now(),
    });

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    tracing::info!(bind = %cli.bind, "gateway listening");
    axum::serve(listener, app).await.context("axum serve")?;
    Ok(())
}

async fn healthz(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
    Json(serde_json::json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize, Default)]
pub struct AskQuery {
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AskRequest {
    pub intent: String,
    #[serde(default)]
    pub anchor_id: Option<String>,
    #[serde(default)]
    pub evidence: Option<bv_models::evidence::WhyDecisionEvidence>,
    #[serde(default)]
    pub answer: Option<WhyDecisionAnswer>,
    #[serde(default)]
    pub policy_id: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub request_id: Option<String>,
}

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

/// Shared `/v2/ask` pipeline: loads/builds evidence, runs selector + budget
/// gate, calls the LLM (or forces fallback under load shed / `llm_off`),
/// validates, composes the artifact bundle, and assembles the final
/// response (spec §4.6-§4.13). Both `/v2/ask` and the streaming variant
/// build on this; only the framing of the final frame differs.
async fn run_ask(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    body: &AskRequest,
) -> Result<(WhyDecisionResponse, OutboundFingerprints), BvError> {
    let started = Instant::now();
    let raw = to_raw_headers(headers);
    let preq = PolicyRequest::parse(&raw)?;
    let policy = effective_policy(state, &preq).await?;

    let anchor_id = body
        .anchor_id
        .clone()
        .or_else(|| body.evidence.as_ref().map(|e| e.anchor.id.clone()))
        .ok_or_else(|| BvError::Validation("anchor_id or evidence.anchor.id is required".into()))?;

    let load_shed = crate::load_shed::should_load_shed(
        state.cache.as_ref(),
        &state.memory,
        state.settings.timeout_for_stage("enrich"),
    )
    .await;

    let evidence_cache = EvidenceCache::new(state.cache.clone(), state.settings.ttl_evidence_cache_sec);
    let collected = match &body.evidence {
        Some(supplied) => crate::evidence::CollectResult {
            evidence: supplied.clone(),
            from_cache: false,
        },
        None => {
            crate::evidence::collect(
                &anchor_id,
                &preq,
                &policy,
                &state.memory,
                &evidence_cache,
                &state.settings,
            )
            .await?
        }
    };
    let mut evidence = collected.evidence;
    evidence.allowed_ids = evidence.derive_allowed_ids();

    let (ranked_events, _scores, selector_policy_id) =
        crate::selector::run_selector(&evidence.anchor, &evidence.events);
    evidence.events = ranked_events;

    let gate_policy = crate::budget::GatePolicy {
        edge_allowlist: policy.edge_allowlist.clone(),
        max_edges: policy.max_edges,
        max_events: policy.max_events,
        max_cited_ids: policy.max_cited_ids,
        cite_all_ids: state.settings.cite_all_ids,
    };
    let (plan, gated_evidence) = crate::budget::run_gate(&evidence, &gate_policy);
    evidence = gated_evidence;
    evidence.allowed_ids = evidence.derive_allowed_ids();

    let canary_header_present = headers.contains_key(crate::llm::CANARY_HEADER_OVERRIDE);
    let llm_forced_off = load_shed;
    let (llm_answer, last_call, llm_raw) = if llm_forced_off {
        (
            None,
            crate::llm::LastCall {
                model: "none".to_string(),
                canary: false,
                latency_ms: 0,
                endpoint: String::new(),
                adapter: "none".to_string(),
                attempt: 0,
                error_code: Some("llm_off".to_string()),
            },
            None,
        )
    } else {
        crate::llm::ask(
            &evidence,
            &plan.cited_ids,
            &preq.request_id,
            canary_header_present,
            &state.settings,
            &state.settings.control_model_endpoint,
            &state.settings.canary_model_endpoint,
        )
        .await
    };
    state.record_last_call(last_call.clone());

    let mut fallback_used = false;
    let mut fallback_reason: Option<crate::validator::FallbackReason> = None;
    let answer = match llm_answer {
        Some(answer) if !crate::validator::needs_fallback(&answer, &evidence) => answer,
        Some(_) => {
            fallback_used = true;
            fallback_reason = Some(crate::validator::FallbackReason::StyleViolation);
            crate::validator::compose_fallback(&evidence, &plan.cited_ids, crate::validator::FallbackReason::StyleViolation)
        }
        None => {
            fallback_used = true;
            let reason = last_call
                .error_code
                .as_deref()
                .map(crate::validator::FallbackReason::from_error_code)
                .unwrap_or(crate::validator::FallbackReason::LlmUnavailable);
            fallback_reason = Some(reason);
            crate::validator::compose_fallback(&evidence, &plan.cited_ids, reason)
        }
    };

    let report = crate::validator::validate(&crate::validator::ValidateInput {
        evidence: &evidence,
        cited_ids: &answer.cited_ids,
        policy_fp: Some(&policy.policy_fp),
        manifest: None,
        artifacts: &[],
        receipt_signature: None,
        receipt_message: None,
        verifying_key: None,
    });

    let request_id = body
        .request_id
        .clone()
        .unwrap_or_else(|| preq.request_id.clone());

    let mut meta = MetaInfo::builder(request_id.clone(), state.settings.gateway_version.clone());
    meta.policy_id = body.policy_id.clone().unwrap_or_else(|| policy.policy_version.clone());
    meta.prompt_id = body.prompt_id.clone().unwrap_or_else(|| "default".to_string());
    let envelope = crate::llm::prompt_envelope(&evidence, &plan.cited_ids);
    meta.prompt_fingerprint = bv_common::fingerprint(&envelope)?;
    meta.prompt_tokens = plan.prompt_tokens;
    meta.max_tokens = plan.max_tokens;
    meta.evidence_tokens = plan.evidence_tokens;
    meta.snapshot_etag = evidence.snapshot_etag.clone();
    meta.snapshot_available = evidence.snapshot_etag.is_some();
    meta.selector_model_id = selector_policy_id.to_string();
    meta.fallback_used = fallback_used;
    meta.fallback_reason = fallback_reason.map(|r| r.as_str().to_string());
    meta.retries = last_call.attempt;
    meta.latency_ms = started.elapsed().as_millis() as u64;
    meta.validator_error_count = report.errors.len();
    meta.evidence_metrics = EvidenceMetrics {
        events_total: evidence.events.len(),
        events_truncated: 0,
        transitions_preceding: evidence.transitions.preceding_slice().len(),
        transitions_succeeding: evidence.transitions.succeeding_slice().len(),
    };
    meta.events_total = meta.evidence_metrics.events_total;
    meta.events_truncated = meta.evidence_metrics.events_truncated;
    meta.load_shed = load_shed;
    meta.trace_id = Some(preq.trace_id.clone());
    meta.resolver_path = "graph".to_string();

    let response = WhyDecisionResponse::assemble(body.intent.clone(), evidence.clone(), answer, None, meta);

    let bundle = crate::bundle::build(&crate::bundle::BundleInputs {
        envelope: &envelope,
        evidence_pre: &evidence,
        evidence_post: &response.evidence,
        response: &response,
        llm_raw: llm_raw.as_deref(),
        validator_report: &report,
        receipt: None,
    });
    let bundle_bytes: usize = bundle.artifacts.iter().map(|(_, b)| b.len()).sum();
    let bundle_fp = bv_common::fingerprint(&response.evidence.without_snapshot_etag())?;
    state.bundle_cache.put(
        request_id.clone(),
        serde_json::to_value(&bundle.manifest).unwrap_or_default(),
    );

    let mut response = response;
    response.meta.bundle_fingerprint = bundle_fp.clone();
    response.meta.bundle_size_bytes = bundle_bytes;

    let allowed_ids_fp = bv_common::fingerprint(&response.evidence.allowed_ids)?;
    let fp = OutboundFingerprints {
        snapshot_etag: response.meta.snapshot_etag.clone(),
        policy_fp: Some(policy.policy_fp.clone()),
        allowed_ids_fp: Some(allowed_ids_fp),
        graph_fp: None,
        schema_fp: Some(crate::state::SCHEMA_VERSION.to_string()),
        policy_advice: if policy.key_mismatch(&preq.policy_key) {
            Some("stale_policy_key".to_string())
        } else {
            None
        },
        request_id: Some(request_id),
        trace_id: Some(preq.trace_id.clone()),
    };

    Ok((response, fp))
}

const IDEM_SERVICE: &str = "gateway";

/// Looks up a prior response for this `Idempotency-Key` (spec §4.11
/// "ordering guarantees"): a hit whose `request_scope_fp` still matches the
/// request's method/path/body/snapshot/policy basis is replayed verbatim
/// instead of re-running the pipeline (and re-billing the LLM call).
async fn idem_lookup(
    state: &AppState,
    headers: &HeaderMap,
    body: &AskRequest,
    path: &str,
) -> Option<(String, String, WhyDecisionResponse)> {
    let raw_key = headers.get("idempotency-key")?.to_str().ok()?.to_string();
    let redis_key = idem_redis_key(&raw_key, IDEM_SERVICE);
    let canonical_body = bv_common::canonical_json(body).ok()?;
    let store = IdemStore::new(state.cache.clone());
    let record = store.get(&redis_key).await.ok().flatten()?;
    let response: WhyDecisionResponse = serde_json::from_value(record.body).ok()?;
    let expected_scope = request_scope_fp(
        "POST",
        path,
        "",
        &canonical_body,
        response.meta.snapshot_etag.as_deref().unwrap_or(""),
        &response.meta.policy_id,
    );
    if expected_scope != record.request_scope_fp {
        return None;
    }
    Some((redis_key, canonical_body, response))
}

async fn idem_store(
    state: &AppState,
    redis_key: &str,
    canonical_body: &str,
    path: &str,
    response: &WhyDecisionResponse,
) {
    let scope_fp = request_scope_fp(
        "POST",
        path,
        "",
        canonical_body,
        response.meta.snapshot_etag.as_deref().unwrap_or(""),
        &response.meta.policy_id,
    );
    let Ok(body) = serde_json::to_value(response) else {
        return;
    };
    let store = IdemStore::new(state.cache.clone());
    let _ = store
        .set(
            redis_key,
            &IdemRecord {
                request_scope_fp: scope_fp,
                body,
            },
        )
        .await;
}

async fn ask(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<AskQuery>,
    Json(body): Json<AskRequest>,
) -> Result<axum::response::Response, ApiError> {
    let rid = req_id_hint(&headers);

    if let Some((_, _, cached)) = idem_lookup(&state, &headers, &body, "/v2/ask").await {
        let mut out_headers = HeaderMap::new();
        crate::headers::apply(
            &mut out_headers,
            &OutboundFingerprints {
                snapshot_etag: cached.meta.snapshot_etag.clone(),
                request_id: Some(cached.meta.request_id.clone()),
                ..Default::default()
            },
        );
        return Ok((out_headers, Json(cached)).into_response());
    }

    let (response, fp) = run_ask(&state, &headers, &body)
        .await
        .map_err(|e| ApiError::new(e, rid))?;

    if let Some(raw_key) = headers.get("idempotency-key").and_then(|v| v.to_str().ok()) {
        let redis_key = idem_redis_key(raw_key, IDEM_SERVICE);
        if let Ok(canonical_body) = bv_common::canonical_json(&body) {
            idem_store(&state, &redis_key, &canonical_body, "/v2/ask", &response).await;
        }
    }

    if query.stream {
        return Ok(stream_response(response, fp).into_response());
    }

    let mut out_headers = HeaderMap::new();
    crate::headers::apply(&mut out_headers, &fp);
    Ok((out_headers, Json(response)).into_response())
}

/// SSE framing for `?stream=true` (spec §6): one `data:` frame per
/// short-answer word, a terminal full `WhyDecisionResponse` frame, then
/// `data: [DONE]`. The answer is already fully computed by [`run_ask`]
/// before streaming starts — only the *framing* is incremental, matching
/// the spec's "optional `event: short_answer` framing" rather than a
/// token-by-token model stream (this build has no adapter that yields
/// partial tokens; vLLM/TGI responses are whole-JSON).
fn stream_response(
    response: WhyDecisionResponse,
    fp: OutboundFingerprints,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let words: Vec<String> = response
        .answer
        .short_answer
        .split_whitespace()
        .map(|w| w.to_string())
        .collect();
    let mut frames: Vec<Event> = words
        .into_iter()
        .map(|token| Event::default().event("short_answer").data(serde_json::json!({"token": token}).to_string()))
        .collect();
    let final_body = serde_json::to_string(&response).unwrap_or_else(|_| "{}".to_string());
    frames.push(Event::default().data(final_body));
    frames.push(Event::default().data("[DONE]"));
    let _ = fp;
    Sse::new(stream::iter(frames.into_iter().map(Ok))).keep_alive(KeepAlive::default())
}

#[derive(Debug, Serialize)]
struct RetryAfterBody {
    error: &'static str,
    retry_after_secs: u64,
}

/// `/v2/query` (spec §5 "Backpressure and load shedding", P11): sheds
/// load outright under pressure instead of `/v2/ask`'s forced-fallback
/// degrade, since a raw query has no deterministic answer to fall back to.
async fn query(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<AskRequest>,
) -> Result<axum::response::Response, ApiError> {
    let rid = req_id_hint(&headers);
    let shedding = crate::load_shed::should_load_shed(
        state.cache.as_ref(),
        &state.memory,
        state.settings.timeout_for_stage("search"),
    )
    .await;
    if shedding {
        let mut out_headers = HeaderMap::new();
        out_headers.insert("retry-after", "1".parse().unwrap());
        return Ok((
            axum::http::StatusCode::TOO_MANY_REQUESTS,
            out_headers,
            Json(RetryAfterBody {
                error: "load_shed",
                retry_after_secs: 1,
            }),
        )
            .into_response());
    }

    let (response, fp) = run_ask(&state, &headers, &body)
        .await
        .map_err(|e| ApiError::new(e, rid))?;
    let mut out_headers = HeaderMap::new();
    crate::headers::apply(&mut out_headers, &fp);
    Ok((out_headers, Json(response)).into_response())
}
