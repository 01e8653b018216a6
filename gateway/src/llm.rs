//! LLM router (spec §4.11): stable per-request canary/control cohort
//! selection, vLLM/TGI adapter dispatch, a safety clamp on the returned
//! JSON, and the `last_call` telemetry the Gateway mirrors into response
//! headers. Canary always talks TGI's prompt-string endpoint; control
//! always talks vLLM's OpenAI-compatible chat endpoint, mirroring the
//! original router's fixed adapter-per-cohort wiring.

use std::time::{Duration, Instant};

use rand::Rng;
use serde_json::Value as JsonValue;

use bv_common::config::{LlmMode, Settings};
use bv_models::evidence::WhyDecisionAnswer;

pub const CANARY_HEADER_OVERRIDE: &str = "x-batvault-canary";

/// Per-process, last-writer-wins telemetry for the most recent LLM call
/// (spec §5 "Shared state" (4)).
#[derive(Debug, Clone, Default)]
pub struct LastCall {
    pub model: String,
    pub canary: bool,
    pub latency_ms: u64,
    pub endpoint: String,
    pub adapter: String,
    pub attempt: u32,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: &'static str,
    pub content: String,
}

/// Builds the two-message chat envelope (system instructions + evidence
/// payload) both adapters render from. Deterministic: same evidence and
/// cited ids always produce byte-identical messages.
const SYSTEM_PROMPT: &str = "Answer why the cited decision was made, citing only the \
    provided ids. Respond as JSON: {\"short_answer\": string, \"supporting_ids\": [string]}.";

/// The user-message payload both adapters render; also hashed into
/// `prompt_fp` (I4) so a request can be reproduced from its fingerprint.
pub fn prompt_envelope(evidence: &bv_models::evidence::WhyDecisionEvidence, cited_ids: &[String]) -> JsonValue {
    serde_json::json!({
        "system": SYSTEM_PROMPT,
        "anchor": evidence.anchor,
        "events": evidence.events,
        "transitions": evidence.transitions,
        "cited_ids": cited_ids,
    })
}

pub fn build_messages(evidence: &bv_models::evidence::WhyDecisionEvidence, cited_ids: &[String]) -> Vec<Message> {
    let payload = prompt_envelope(evidence, cited_ids);
    vec![
        Message {
            role: "system",
            content: SYSTEM_PROMPT.to_string(),
        },
        Message {
            role: "user",
            content: payload.to_string(),
        },
    ]
}

fn estimate_messages_tokens(messages: &[Message]) -> u32 {
    let chars: usize = messages.iter().map(|m| m.content.len()).sum();
    (chars / 4) as u32
}

fn stable_hash_pct(request_id: &str) -> u8 {
    let hex = bv_common::canonical::sha256_hex(request_id.as_bytes());
    let first_byte = u8::from_str_radix(&hex[0..2], 16).unwrap_or(0);
    let second_byte = u8::from_str_radix(&hex[2..4], 16).unwrap_or(0);
    (((first_byte as u16) << 8 | second_byte as u16) % 100) as u8
}

fn should_use_canary(request_id: &str, header_override_present: bool, settings: &Settings) -> bool {
    if !settings.canary_enabled || settings.canary_pct == 0 {
        return false;
    }
    if header_override_present {
        return true;
    }
    stable_hash_pct(request_id) < settings.canary_pct
}

#[async_trait::async_trait]
pub trait LlmAdapter: Send + Sync {
    fn name(&self) -> &'static str;
    async fn generate(
        &self,
        endpoint: &str,
        messages: &[Message],
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, AdapterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterError {
    Unreachable,
    Timeout,
    Http,
    Parse,
}

pub struct VllmAdapter {
    http: reqwest::Client,
}

impl VllmAdapter {
    pub fn new() -> Self {
        VllmAdapter {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for VllmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmAdapter for VllmAdapter {
    fn name(&self) -> &'static str {
        "vllm"
    }

    async fn generate(
        &self,
        endpoint: &str,
        messages: &[Message],
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, AdapterError> {
        let base = endpoint.trim_end_matches('/');
        let url = if base.ends_with("/v1/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        };
        let payload = serde_json::json!({
            "model": "default",
            "temperature": 0.0,
            "max_tokens": max_tokens,
            "messages": messages.iter().map(|m| serde_json::json!({"role": m.role, "content": m.content})).collect::<Vec<_>>(),
        });
        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { AdapterError::Timeout } else { AdapterError::Unreachable })?;
        if !resp.status().is_success() {
            return Err(AdapterError::Http);
        }
        let data: JsonValue = resp.json().await.map_err(|_| AdapterError::Parse)?;
        let text = data["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        Ok(strip_code_fences(&text))
    }
}

pub struct TgiAdapter {
    http: reqwest::Client,
}

impl TgiAdapter {
    pub fn new() -> Self {
        TgiAdapter {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for TgiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl LlmAdapter for TgiAdapter {
    fn name(&self) -> &'static str {
        "tgi"
    }

    async fn generate(
        &self,
        endpoint: &str,
        messages: &[Message],
        max_tokens: u32,
        timeout: Duration,
    ) -> Result<String, AdapterError> {
        let url = format!("{}/generate", endpoint.trim_end_matches('/'));
        let prompt = messages
            .iter()
            .map(|m| format!("{}:\n{}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n\n");
        let payload = serde_json::json!({
            "inputs": prompt,
            "parameters": {"temperature": 0.0, "max_new_tokens": max_tokens},
        });
        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { AdapterError::Timeout } else { AdapterError::Unreachable })?;
        if !resp.status().is_success() {
            return Err(AdapterError::Http);
        }
        let data: JsonValue = resp.json().await.map_err(|_| AdapterError::Parse)?;
        let text = if let Some(arr) = data.as_array() {
            arr.first()
                .and_then(|v| v.get("generated_text"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        } else {
            data.get("generated_text")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        Ok(strip_code_fences(&text))
    }
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") && trimmed.ends_with("```") {
        trimmed.trim_matches('`').trim().to_string()
    } else {
        text.to_string()
    }
}

fn jittered_backoff() -> Duration {
    let extra = rand::thread_rng().gen_range(0..50);
    Duration::from_millis(50 + extra)
}

/// Route, call, and safety-clamp one `/v2/ask` answer. Returns `None` when
/// LLM mode is off or every attempt failed; `LastCall.error_code` names why.
pub async fn ask(
    evidence: &bv_models::evidence::WhyDecisionEvidence,
    cited_ids: &[String],
    request_id: &str,
    canary_header_present: bool,
    settings: &Settings,
    control_endpoint: &str,
    canary_endpoint: &str,
) -> (Option<WhyDecisionAnswer>, LastCall, Option<String>) {
    if settings.llm_mode == LlmMode::Off {
        return (
            None,
            LastCall {
                model: "none".to_string(),
                canary: false,
                latency_ms: 0,
                endpoint: String::new(),
                adapter: "none".to_string(),
                attempt: 0,
                error_code: Some("llm_off".to_string()),
            },
            None,
        );
    }

    let messages = build_messages(evidence, cited_ids);
    let prompt_tokens = estimate_messages_tokens(&messages);
    let remaining = settings
        .control_context_window
        .saturating_sub(prompt_tokens)
        .saturating_sub(settings.control_prompt_guard_tokens);
    let max_tokens = settings.control_completion_tokens.min(remaining).max(1);

    let mut use_canary = should_use_canary(request_id, canary_header_present, settings);
    let vllm = VllmAdapter::new();
    let tgi = TgiAdapter::new();
    let timeout = settings.timeout_for_stage("llm");

    let retries = 2u32;
    let mut last_error = AdapterError::Unreachable;
    for attempt in 0..=retries {
        let (endpoint, model_name, adapter): (&str, &str, &dyn LlmAdapter) = if use_canary {
            (canary_endpoint, "canary", &tgi)
        } else {
            (control_endpoint, "control", &vllm)
        };
        let started = Instant::now();
        match adapter.generate(endpoint, &messages, max_tokens, timeout).await {
            Ok(raw) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                let last_call = LastCall {
                    model: model_name.to_string(),
                    canary: use_canary,
                    latency_ms,
                    endpoint: endpoint.to_string(),
                    adapter: adapter.name().to_string(),
                    attempt,
                    error_code: None,
                };
                return match clamp_answer(&raw, &evidence.allowed_ids) {
                    Some(answer) => (Some(answer), last_call, Some(raw)),
                    None => {
                        let mut lc = last_call;
                        lc.error_code = Some(if raw.trim().is_empty() {
                            "no_raw_json".to_string()
                        } else {
                            "parse_error".to_string()
                        });
                        (None, lc, Some(raw))
                    }
                };
            }
            Err(err) => {
                last_error = err;
                if use_canary && attempt == 0 {
                    use_canary = false;
                    continue;
                }
                if attempt < retries {
                    tokio::time::sleep(jittered_backoff()).await;
                }
            }
        }
    }

    let error_code = match last_error {
        AdapterError::Timeout => "timeout",
        AdapterError::Unreachable => "endpoint_unreachable",
        AdapterError::Http => "http_error",
        AdapterError::Parse => "parse_error",
    };
    (
        None,
        LastCall {
            model: if use_canary { "canary" } else { "control" }.to_string(),
            canary: use_canary,
            latency_ms: 0,
            endpoint: if use_canary { canary_endpoint } else { control_endpoint }.to_string(),
            adapter: if use_canary { "tgi" } else { "vllm" }.to_string(),
            attempt: retries,
            error_code: Some(error_code.to_string()),
        },
        None,
    )
}

/// Parses the model's raw JSON and enforces `supporting_ids ⊆ allowed_ids`
/// plus the 320-char `short_answer` cap (spec §4.11 "safety clamp").
fn clamp_answer(raw: &str, allowed_ids: &[String]) -> Option<WhyDecisionAnswer> {
    let value: JsonValue = serde_json::from_str(raw).ok()?;
    let short_answer = value.get("short_answer")?.as_str()?.to_string();
    let supporting = value
        .get("supporting_ids")
        .or_else(|| value.get("cited_ids"))
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let allowed: std::collections::BTreeSet<&str> = allowed_ids.iter().map(|s| s.as_str()).collect();
    let cited_ids: Vec<String> = supporting
        .into_iter()
        .filter(|id| allowed.contains(id.as_str()))
        .collect();

    let mut short_answer = short_answer;
    if short_answer.chars().count() > 320 {
        short_answer = short_answer.chars().take(320).collect();
    }

    let mut answer = WhyDecisionAnswer {
        short_answer,
        cited_ids,
        supporting_ids: Vec::new(),
    };
    answer.mirror_legacy_supporting_ids();
    Some(answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_hash_is_deterministic() {
        assert_eq!(stable_hash_pct("req-1"), stable_hash_pct("req-1"));
    }

    #[test]
    fn canary_disabled_when_pct_zero() {
        let settings = Settings {
            canary_pct: 0,
            ..Settings::default()
        };
        assert!(!should_use_canary("req-1", false, &settings));
    }

    #[test]
    fn header_override_forces_canary() {
        let settings = Settings {
            canary_pct: 1,
            canary_enabled: true,
            ..Settings::default()
        };
        assert!(should_use_canary("req-1", true, &settings));
    }

    #[test]
    fn clamp_rejects_ids_outside_allowed_set() {
        let raw = r#"{"short_answer": "ok", "supporting_ids": ["a", "b"]}"#;
        let answer = clamp_answer(raw, &["a".to_string()]).unwrap();
        assert_eq!(answer.cited_ids, vec!["a".to_string()]);
    }

    #[test]
    fn clamp_truncates_long_short_answer() {
        let long = "x".repeat(400);
        let raw = serde_json::json!({"short_answer": long, "supporting_ids": []}).to_string();
        let answer = clamp_answer(&raw, &[]).unwrap();
        assert_eq!(answer.short_answer.chars().count(), 320);
    }
}
