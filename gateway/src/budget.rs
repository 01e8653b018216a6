//! Deterministic, LLM-free budget gate (spec §4.10). Filters evidence by
//! the policy's edge allowlist, caps edge/event/cited-id counts, and emits
//! a plan with zero token counts and no messages — the gate only decides
//! *what* would be cited, never *how* to phrase it. Ranking stays the
//! selector's job (§4.9); the gate re-derives its own top-events order
//! independently (timestamp desc, id asc) so its `cited_ids` pick is
//! stable even if the selector's display order changes upstream.

use serde::Serialize;

use bv_common::fingerprint;
use bv_models::evidence::WhyDecisionEvidence;

#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub edge_allowlist: Vec<String>,
    pub max_edges: usize,
    pub max_events: usize,
    pub max_cited_ids: usize,
    /// spec §6 `CITE_ALL_IDS`: when set, `cited_ids` is `allowed_ids`
    /// verbatim instead of the anchor/top-events/transitions pick (P1).
    pub cite_all_ids: bool,
}

impl Default for GatePolicy {
    fn default() -> Self {
        GatePolicy {
            edge_allowlist: vec!["LED_TO".to_string(), "CAUSAL".to_string()],
            max_edges: 256,
            max_events: 8,
            max_cited_ids: 8,
            cite_all_ids: false,
        }
    }
}

#[derive(Serialize)]
struct GateCfgBasis<'a> {
    edge_allowlist: &'a [String],
    max_edges: usize,
    max_events: usize,
    max_cited_ids: usize,
    cite_all_ids: bool,
}

/// First id in a transitions list (spec §4.12 fallback "first preceding
/// transition title"; here used for the matching first-transition citation
/// grounded in the original's `_compute_supporting_ids`).
fn first_id(items: &[serde_json::Value]) -> Option<String> {
    items.iter().find_map(event_id).map(|s| s.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct GatePlan {
    pub edges_in: usize,
    pub edges_out: usize,
    pub events_ranked_top: Vec<String>,
    pub cited_ids: Vec<String>,
    pub budget_cfg_fp: String,
    /// All zero by construction (spec §4.10 "LLM-free: zero token counts").
    pub prompt_tokens: u32,
    pub max_tokens: u32,
    pub evidence_tokens: u32,
}

fn event_id(v: &serde_json::Value) -> Option<&str> {
    v.get("id").and_then(|x| x.as_str())
}

fn event_ts(v: &serde_json::Value) -> &str {
    v.get("timestamp").and_then(|x| x.as_str()).unwrap_or("")
}

/// Rank by `(timestamp desc, id asc)` via two precomputed-key stable sorts,
/// id asc applied first so it survives as the tiebreaker after the
/// timestamp-desc pass.
fn pick_top_events(events: &[serde_json::Value], limit: usize) -> Vec<String> {
    let mut ids: Vec<(&str, &str)> = events
        .iter()
        .filter_map(|e| event_id(e).map(|id| (id, event_ts(e))))
        .collect();
    ids.sort_by(|a, b| a.0.cmp(b.0));
    ids.sort_by(|a, b| b.1.cmp(a.1));
    ids.into_iter().take(limit).map(|(id, _)| id.to_string()).collect()
}

/// Applies the gate to already-selected evidence, returning the plan and a
/// trimmed copy of the evidence (edge-allowlist filtered, event count
/// capped at `max_edges`).
pub fn run_gate(evidence: &WhyDecisionEvidence, policy: &GatePolicy) -> (GatePlan, WhyDecisionEvidence) {
    let allows = |kind: &str| policy.edge_allowlist.iter().any(|a| a == kind);

    let mut trimmed = evidence.clone();
    if !allows("LED_TO") {
        trimmed.events.clear();
    }
    if !allows("CAUSAL") {
        trimmed.transitions.preceding = None;
        trimmed.transitions.succeeding = None;
    }

    let edges_in = evidence.events.len()
        + evidence.transitions.preceding_slice().len()
        + evidence.transitions.succeeding_slice().len();

    trimmed.events.truncate(policy.max_edges);
    let edges_out = trimmed.events.len()
        + trimmed.transitions.preceding_slice().len()
        + trimmed.transitions.succeeding_slice().len();

    let events_ranked_top = pick_top_events(&trimmed.events, policy.max_events);

    // spec §4.10 step 3 + maintainer-requested extension: cited_ids is
    // [anchor] ++ top_events ++ first_preceding ++ first_succeeding,
    // deduped and intersected with allowed_ids, mirroring the original's
    // `_compute_supporting_ids`. `evidence.allowed_ids` (not `trimmed`'s,
    // which is recomputed by the caller afterwards) is the canonical set
    // this plan's citations must stay inside.
    let cited_ids = if policy.cite_all_ids {
        evidence.allowed_ids.clone()
    } else {
        let allowed: std::collections::BTreeSet<&str> =
            evidence.allowed_ids.iter().map(|s| s.as_str()).collect();

        let mut candidates = Vec::new();
        if !trimmed.anchor.id.is_empty() {
            candidates.push(trimmed.anchor.id.clone());
        }
        candidates.extend(events_ranked_top.iter().cloned());
        if let Some(id) = first_id(trimmed.transitions.preceding_slice()) {
            candidates.push(id);
        }
        if let Some(id) = first_id(trimmed.transitions.succeeding_slice()) {
            candidates.push(id);
        }

        let mut seen = std::collections::BTreeSet::new();
        let mut cited_ids = Vec::new();
        for id in candidates {
            if !id.is_empty() && allowed.contains(id.as_str()) && seen.insert(id.clone()) {
                cited_ids.push(id);
            }
        }
        cited_ids.truncate(policy.max_cited_ids);
        cited_ids
    };

    let basis = GateCfgBasis {
        edge_allowlist: &policy.edge_allowlist,
        max_edges: policy.max_edges,
        max_events: policy.max_events,
        max_cited_ids: policy.max_cited_ids,
        cite_all_ids: policy.cite_all_ids,
    };
    let budget_cfg_fp = fingerprint(&basis).expect("gate cfg basis always serialises");

    let plan = GatePlan {
        edges_in,
        edges_out,
        events_ranked_top,
        cited_ids,
        budget_cfg_fp,
        prompt_tokens: 0,
        max_tokens: 0,
        evidence_tokens: 0,
    };
    (plan, trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_models::evidence::WhyDecisionAnchor;
    use serde_json::json;

    fn evidence() -> WhyDecisionEvidence {
        let mut ev = WhyDecisionEvidence {
            anchor: WhyDecisionAnchor {
                id: "eng#d-1".into(),
                ..Default::default()
            },
            events: vec![
                json!({"id": "eng#e-2", "timestamp": "2012-01-02T00:00:00Z"}),
                json!({"id": "eng#e-1", "timestamp": "2012-01-01T00:00:00Z"}),
            ],
            ..Default::default()
        };
        ev.allowed_ids = ev.derive_allowed_ids();
        ev
    }

    fn evidence_with_transitions() -> WhyDecisionEvidence {
        let mut ev = evidence();
        ev.transitions.preceding = Some(vec![json!({"id": "eng#d-0", "timestamp": "2011-12-01T00:00:00Z"})]);
        ev.transitions.succeeding = Some(vec![json!({"id": "eng#d-2", "timestamp": "2012-02-01T00:00:00Z"})]);
        ev.allowed_ids = ev.derive_allowed_ids();
        ev
    }

    #[test]
    fn cited_ids_lead_with_anchor() {
        let (plan, _) = run_gate(&evidence(), &GatePolicy::default());
        assert_eq!(plan.cited_ids[0], "eng#d-1");
    }

    #[test]
    fn top_events_ranked_by_timestamp_desc() {
        let (plan, _) = run_gate(&evidence(), &GatePolicy::default());
        assert_eq!(plan.events_ranked_top, vec!["eng#e-2", "eng#e-1"]);
    }

    #[test]
    fn max_cited_ids_caps_total() {
        let policy = GatePolicy {
            max_cited_ids: 1,
            ..GatePolicy::default()
        };
        let (plan, _) = run_gate(&evidence(), &policy);
        assert_eq!(plan.cited_ids, vec!["eng#d-1"]);
    }

    #[test]
    fn budget_cfg_fp_is_deterministic() {
        let (a, _) = run_gate(&evidence(), &GatePolicy::default());
        let (b, _) = run_gate(&evidence(), &GatePolicy::default());
        assert_eq!(a.budget_cfg_fp, b.budget_cfg_fp);
    }

    #[test]
    fn cited_ids_include_first_preceding_and_succeeding_transition() {
        let (plan, _) = run_gate(&evidence_with_transitions(), &GatePolicy::default());
        assert!(plan.cited_ids.contains(&"eng#d-0".to_string()));
        assert!(plan.cited_ids.contains(&"eng#d-2".to_string()));
    }

    #[test]
    fn cited_ids_drop_transitions_not_in_allowed_ids() {
        let mut ev = evidence();
        ev.transitions.preceding = Some(vec![json!({"id": "eng#d-0", "timestamp": "2011-12-01T00:00:00Z"})]);
        // allowed_ids deliberately stale (derived before the transition was added).
        let (plan, _) = run_gate(&ev, &GatePolicy::default());
        assert!(!plan.cited_ids.contains(&"eng#d-0".to_string()));
    }

    #[test]
    fn cite_all_ids_returns_allowed_ids_verbatim() {
        let policy = GatePolicy {
            cite_all_ids: true,
            max_cited_ids: 1,
            ..GatePolicy::default()
        };
        let ev = evidence_with_transitions();
        let (plan, _) = run_gate(&ev, &policy);
        assert_eq!(plan.cited_ids, ev.allowed_ids);
    }
}
