//! Evidence builder (spec §4.6 `Collect(anchor_id)`). Two-key cache read
//! first; on a miss, fetches the anchor and its k=1 neighbourhood from
//! Memory, classifies neighbours into events/preceding/succeeding,
//! normalises event text (currency/amount extraction, near-duplicate
//! collapse), sets `allowed_ids` from Memory's own derivation so the two
//! never drift apart (spec §4.8 "any divergence is a bug"), then writes
//! the bundle back under the composite+alias keys.

use std::collections::BTreeMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value as JsonValue;

use bv_cache::{CachedEvidence, EvidenceCache};
use bv_common::error::BvError;
use bv_models::evidence::{WhyDecisionAnchor, WhyDecisionEvidence, WhyDecisionTransitions};
use bv_models::node::EdgeType;
use bv_policy::headers::PolicyRequest;
use bv_policy::EffectivePolicy;

use crate::memory_client::MemoryClient;

pub const INTENT_WHY_DECISION: &str = "why_decision";

/// Outcome of a `Collect` call: the bundle plus whether it came from cache
/// (callers use this to skip re-emitting selector/gate side channels).
pub struct CollectResult {
    pub evidence: WhyDecisionEvidence,
    pub from_cache: bool,
}

/// Cache-key scope derived from the effective policy's edge allowlist, so
/// two roles with different graph visibility never share a cached bundle
/// for the same anchor (spec §7 "composite key ... graph_scope").
fn graph_scope(policy: &EffectivePolicy) -> String {
    if policy.edge_allowlist.is_empty() {
        "none".to_string()
    } else {
        policy.edge_allowlist.join(",")
    }
}

/// Rough token estimate (4 chars/token) used purely to decide whether the
/// event list needs pre-selector truncation (spec §4.9
/// `selector_truncation_threshold_tokens`); the budget gate (§4.10) still
/// applies its own, separate, per-policy caps downstream.
fn estimate_tokens(events: &[JsonValue]) -> u32 {
    let chars: usize = events.iter().map(|e| e.to_string().len()).sum();
    (chars / 4) as u32
}

fn truncate_to_budget(mut events: Vec<JsonValue>, threshold_tokens: u32) -> (Vec<JsonValue>, bool) {
    if estimate_tokens(&events) <= threshold_tokens {
        return (events, false);
    }
    let mut truncated = false;
    while events.len() > 1 && estimate_tokens(&events) > threshold_tokens {
        events.pop();
        truncated = true;
    }
    (events, truncated)
}

pub async fn collect<C: bv_cache::RawCache>(
    anchor_id: &str,
    preq: &PolicyRequest,
    policy: &EffectivePolicy,
    memory: &MemoryClient,
    cache: &EvidenceCache<C>,
    settings: &bv_common::config::Settings,
) -> Result<CollectResult, BvError> {
    if let Some(hit) = cache.read(anchor_id).await {
        let evidence = match hit {
            CachedEvidence::Found(body) => body,
            CachedEvidence::Absent => WhyDecisionEvidence {
                anchor: WhyDecisionAnchor {
                    id: anchor_id.to_string(),
                    ..Default::default()
                },
                allowed_ids: vec![anchor_id.to_string()],
                ..Default::default()
            },
        };
        return Ok(CollectResult {
            evidence,
            from_cache: true,
        });
    }

    let enrich_timeout = settings.timeout_for_stage("enrich");
    let expand_timeout = settings.timeout_for_stage("expand");

    let anchor_body = memory.enrich(anchor_id, "", preq, enrich_timeout).await?;
    let mut anchor: WhyDecisionAnchor =
        serde_json::from_value(anchor_body).map_err(|e| BvError::Internal(format!("anchor decode: {e}")))?;
    anchor.mirror_option_to_title();

    let expand = memory
        .expand_candidates(anchor_id, "", preq, expand_timeout)
        .await?;
    let snapshot_etag = expand.meta.snapshot_etag.clone();

    let mut event_ids = Vec::new();
    let mut preceding_ids = Vec::new();
    let mut succeeding_ids = Vec::new();
    for edge in &expand.graph.edges {
        match edge.kind {
            EdgeType::LedTo if edge.to == anchor_id => event_ids.push(edge.from.clone()),
            EdgeType::Causal if edge.to == anchor_id => preceding_ids.push(edge.from.clone()),
            EdgeType::Causal if edge.from == anchor_id => succeeding_ids.push(edge.to.clone()),
            _ => {}
        }
    }

    let mut neighbour_ids: Vec<String> = event_ids
        .iter()
        .chain(preceding_ids.iter())
        .chain(succeeding_ids.iter())
        .cloned()
        .collect();
    neighbour_ids.sort();
    neighbour_ids.dedup();

    let batch = memory
        .enrich_batch(anchor_id, &snapshot_etag, &neighbour_ids, preq, expand_timeout)
        .await?;

    let lookup = |ids: &[String]| -> Vec<JsonValue> {
        ids.iter()
            .filter_map(|id| batch.items.get(id).cloned())
            .collect()
    };

    let mut events = dedup_and_normalise(lookup(&event_ids));
    let (truncated_events, truncation_flag) =
        truncate_to_budget(std::mem::take(&mut events), settings.selector_truncation_threshold_tokens);
    events = truncated_events;

    let preceding = lookup(&preceding_ids);
    let succeeding = lookup(&succeeding_ids);

    let mut transitions = WhyDecisionTransitions {
        preceding: Some(preceding),
        succeeding: Some(succeeding),
    };
    transitions.normalise();

    let evidence = WhyDecisionEvidence {
        anchor,
        events,
        transitions,
        allowed_ids: expand.meta.allowed_ids,
        snapshot_etag: Some(snapshot_etag.clone()),
    };

    cache
        .write(
            anchor_id,
            anchor_id,
            INTENT_WHY_DECISION,
            &graph_scope(policy),
            &snapshot_etag,
            truncation_flag,
            &evidence,
        )
        .await?;

    Ok(CollectResult {
        evidence,
        from_cache: false,
    })
}

/// Dedup by `id`, then collapse same-day near-duplicates whose text
/// differs only by currency symbol or magnitude, attaching
/// `normalized_amount`/`normalized_currency` when a monetary figure
/// parses (spec §4.6 step 4).
fn dedup_and_normalise(items: Vec<JsonValue>) -> Vec<JsonValue> {
    let mut by_id: BTreeMap<String, JsonValue> = BTreeMap::new();
    for mut item in items {
        let id = item
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if id.is_empty() || by_id.contains_key(&id) {
            continue;
        }
        normalise_event_amount(&mut item);
        by_id.insert(id, item);
    }

    let mut groups: BTreeMap<(String, String), String> = BTreeMap::new();
    let mut ordered_ids: Vec<String> = by_id.keys().cloned().collect();
    ordered_ids.sort();
    for id in &ordered_ids {
        let item = &by_id[id];
        let date = item
            .get("timestamp")
            .and_then(|v| v.as_str())
            .map(|s| s.split('T').next().unwrap_or(s).to_string())
            .unwrap_or_default();
        let signature = text_signature(item);
        groups.entry((date, signature)).or_insert_with(|| id.clone());
    }

    let keep: std::collections::BTreeSet<String> = groups.into_values().collect();
    ordered_ids
        .into_iter()
        .filter(|id| keep.contains(id))
        .map(|id| by_id.remove(&id).unwrap())
        .collect()
}

/// Text fingerprint used to detect same-day near-duplicates: lower-cased
/// summary/description with digits, currency symbols and magnitude words
/// stripped, so `"$1.2m"` and `"1,200,000 USD"` collapse to the same key.
fn text_signature(item: &JsonValue) -> String {
    static STRIP: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)[\$€¥£]|\b[a-z]{3}\b|[\d,]+(?:\.\d+)?|\b(k|m|b|thousand|millions?|billions?)\b")
            .expect("valid regex")
    });
    let text = item
        .get("summary")
        .and_then(|v| v.as_str())
        .or_else(|| item.get("description").and_then(|v| v.as_str()))
        .unwrap_or_default()
        .to_lowercase();
    STRIP.replace_all(&text, "").split_whitespace().collect::<Vec<_>>().join(" ")
}

const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("$", "USD"),
    ("usd", "USD"),
    ("€", "EUR"),
    ("eur", "EUR"),
    ("¥", "JPY"),
    ("jpy", "JPY"),
    ("£", "GBP"),
    ("gbp", "GBP"),
];

fn currency_code(raw: &str) -> Option<String> {
    let lower = raw.to_lowercase();
    CURRENCY_SYMBOLS
        .iter()
        .find(|(sym, _)| *sym == lower)
        .map(|(_, code)| code.to_string())
        .or_else(|| {
            if raw.len() == 3 && raw.chars().all(|c| c.is_ascii_alphabetic()) {
                Some(raw.to_uppercase())
            } else {
                None
            }
        })
}

fn unit_multiplier(unit: &str) -> f64 {
    match unit.to_lowercase().as_str() {
        "k" | "thousand" => 1_000.0,
        "m" | "million" | "millions" => 1_000_000.0,
        "b" | "billion" | "billions" => 1_000_000_000.0,
        _ => 1.0,
    }
}

fn parse_amount(raw: &str, unit: &str) -> Option<f64> {
    let cleaned = raw
        .replace('\u{a0}', "")
        .replace('\u{2009}', "")
        .replace(' ', "");
    let normalised = if cleaned.matches(',').count() == 1 && !cleaned.contains('.') {
        let comma_idx = cleaned.rfind(',').unwrap();
        if cleaned.len() - comma_idx - 1 <= 2 {
            cleaned.replacen(',', ".", 1)
        } else {
            cleaned.replace(',', "")
        }
    } else {
        cleaned.replace(',', "")
    };
    normalised.parse::<f64>().ok().map(|v| v * unit_multiplier(unit))
}

/// Regex-scan `summary`/`description` for a monetary figure and attach
/// `normalized_amount`/`normalized_currency` via setdefault semantics
/// (first match wins, idempotent on repeated calls).
fn normalise_event_amount(event: &mut JsonValue) {
    if event.get("normalized_amount").is_some() {
        return;
    }
    static AMOUNT: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r"(?i)(?P<currency>[\$€¥£]|[A-Za-z]{3})?\s*(?P<amount>[\d,]+(?:\.\d+)?)\s*(?P<unit>k|m|b|thousand|millions?|billions?)?")
            .expect("valid regex")
    });
    let text = event
        .get("summary")
        .and_then(|v| v.as_str())
        .or_else(|| event.get("description").and_then(|v| v.as_str()))
        .map(|s| s.to_string());
    let Some(text) = text else { return };
    let Some(caps) = AMOUNT.captures(&text) else { return };
    let amount_raw = match caps.name("amount") {
        Some(m) => m.as_str(),
        None => return,
    };
    let unit = caps.name("unit").map(|m| m.as_str()).unwrap_or("");
    let Some(amount) = parse_amount(amount_raw, unit) else { return };
    let currency = caps
        .name("currency")
        .and_then(|m| currency_code(m.as_str()));

    if let JsonValue::Object(map) = event {
        map.insert("normalized_amount".to_string(), serde_json::json!(amount));
        if let Some(code) = currency {
            map.insert("normalized_currency".to_string(), serde_json::json!(code));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_dollar_millions() {
        let mut ev = json!({"id": "eng#e-1", "summary": "wrote down $1.2m of inventory"});
        normalise_event_amount(&mut ev);
        assert_eq!(ev["normalized_amount"], json!(1_200_000.0));
        assert_eq!(ev["normalized_currency"], json!("USD"));
    }

    #[test]
    fn parses_european_comma_decimal() {
        let mut ev = json!({"id": "eng#e-2", "summary": "cost of 1,2 million EUR"});
        normalise_event_amount(&mut ev);
        assert_eq!(ev["normalized_currency"], json!("EUR"));
    }

    #[test]
    fn setdefault_is_idempotent() {
        let mut ev = json!({"id": "eng#e-3", "normalized_amount": 5.0, "summary": "$9"});
        normalise_event_amount(&mut ev);
        assert_eq!(ev["normalized_amount"], json!(5.0));
    }

    #[test]
    fn dedup_collapses_same_day_currency_variants() {
        let items = vec![
            json!({"id": "eng#e-1", "timestamp": "2012-01-01T00:00:00Z", "summary": "wrote down $1.2m"}),
            json!({"id": "eng#e-2", "timestamp": "2012-01-01T00:00:00Z", "summary": "wrote down 1,200,000 USD"}),
        ];
        let out = dedup_and_normalise(items);
        assert_eq!(out.len(), 1);
    }
}
