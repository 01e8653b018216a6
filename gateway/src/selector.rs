//! Deterministic event ranking (spec §4.9). Similarity is Jaccard over
//! lower-cased whitespace tokens of anchor `description ∪ title` against
//! event `summary|description`; order is similarity desc → timestamp desc
//! → id asc, implemented as three precomputed-key stable sorts so the
//! result is identical across runtimes regardless of sort-algorithm
//! details.

use std::collections::BTreeMap;
use std::collections::HashSet;

use serde_json::Value as JsonValue;

use bv_models::evidence::WhyDecisionAnchor;

/// Public, stable policy identifier surfaced in `meta.selector_model_id`
/// (spec §4.9 "A compatible policy identifier ... is emitted in meta").
pub const SELECTOR_POLICY_ID: &str = "sim_desc__ts_iso_desc__id_asc";

fn text_tokens(s: &str) -> HashSet<String> {
    s.to_lowercase().split_whitespace().map(|t| t.to_string()).collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count();
    let union = a.union(b).count();
    inter as f64 / union as f64
}

fn str_field<'a>(v: &'a JsonValue, key: &str) -> &'a str {
    v.get(key).and_then(|x| x.as_str()).unwrap_or("")
}

/// Rank events deterministically for the anchor. Ties are broken with
/// three precomputed-key sorts applied id asc, then ts desc, then sim
/// desc — the last sort wins, so the visible order is sim desc → ts desc
/// → id asc.
pub fn rank_events(anchor: &WhyDecisionAnchor, events: &[JsonValue]) -> Vec<JsonValue> {
    if events.is_empty() {
        return Vec::new();
    }
    let anchor_text = anchor
        .description
        .clone()
        .or_else(|| anchor.title.clone())
        .unwrap_or_default();
    let anchor_tokens = text_tokens(&anchor_text);

    let mut prepared: Vec<(String, f64, String, JsonValue)> = events
        .iter()
        .map(|ev| {
            let id = str_field(ev, "id").to_string();
            let text = {
                let summary = str_field(ev, "summary");
                if !summary.is_empty() {
                    summary
                } else {
                    str_field(ev, "description")
                }
            };
            let sim = jaccard(&text_tokens(text), &anchor_tokens);
            let ts = str_field(ev, "timestamp").to_string();
            (id, sim, ts, ev.clone())
        })
        .collect();

    prepared.sort_by(|a, b| a.0.cmp(&b.0));
    prepared.sort_by(|a, b| b.2.cmp(&a.2));
    prepared.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    prepared.into_iter().map(|t| t.3).collect()
}

/// Per-id confidence signals used for explainability (spec §4.9
/// `compute_scores`): `{id: {sim, recency_days, importance}}`.
pub fn compute_scores(
    anchor: &WhyDecisionAnchor,
    items: &[JsonValue],
) -> BTreeMap<String, BTreeMap<String, f64>> {
    let mut scores = BTreeMap::new();
    if items.is_empty() {
        return scores;
    }
    let anchor_text = anchor
        .description
        .clone()
        .or_else(|| anchor.title.clone())
        .unwrap_or_default();
    let anchor_tokens = text_tokens(&anchor_text);
    let anchor_ts = anchor
        .timestamp
        .as_deref()
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok());

    for it in items {
        let id = str_field(it, "id");
        if id.is_empty() {
            continue;
        }
        let text = {
            let summary = str_field(it, "summary");
            if !summary.is_empty() {
                summary
            } else {
                str_field(it, "description")
            }
        };
        let sim = jaccard(&text_tokens(text), &anchor_tokens);
        let importance = it.get("importance").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let recency_days = match (anchor_ts, chrono::DateTime::parse_from_rfc3339(str_field(it, "timestamp"))) {
            (Some(a), Ok(i)) => (a - i).num_days().unsigned_abs() as f64,
            _ => 0.0,
        };
        let mut entry = BTreeMap::new();
        entry.insert("sim".to_string(), sim);
        entry.insert("recency_days".to_string(), recency_days);
        entry.insert("importance".to_string(), importance);
        scores.insert(id.to_string(), entry);
    }
    scores
}

/// Ranks + scores in one call (spec §4.9 "primary entry for builder").
/// Returns `(ranked_events, scores_by_id, policy_id)`.
pub fn run_selector(
    anchor: &WhyDecisionAnchor,
    items: &[JsonValue],
) -> (Vec<JsonValue>, BTreeMap<String, BTreeMap<String, f64>>, &'static str) {
    let ranked = rank_events(anchor, items);
    let scores = compute_scores(anchor, &ranked);
    (ranked, scores, SELECTOR_POLICY_ID)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn anchor() -> WhyDecisionAnchor {
        WhyDecisionAnchor {
            id: "eng#d-1".into(),
            description: Some("panasonic exits plasma manufacturing".into()),
            ..Default::default()
        }
    }

    #[test]
    fn ranks_by_similarity_then_timestamp_then_id() {
        let events = vec![
            json!({"id": "eng#e-2", "summary": "unrelated budget note", "timestamp": "2012-01-02T00:00:00Z"}),
            json!({"id": "eng#e-1", "summary": "plasma manufacturing exit plan", "timestamp": "2012-01-01T00:00:00Z"}),
            json!({"id": "eng#e-3", "summary": "plasma manufacturing exit plan", "timestamp": "2012-01-03T00:00:00Z"}),
        ];
        let ranked = rank_events(&anchor(), &events);
        let ids: Vec<&str> = ranked.iter().map(|e| str_field(e, "id")).collect();
        assert_eq!(ids, vec!["eng#e-3", "eng#e-1", "eng#e-2"]);
    }

    #[test]
    fn empty_events_returns_empty() {
        assert!(rank_events(&anchor(), &[]).is_empty());
    }
}
