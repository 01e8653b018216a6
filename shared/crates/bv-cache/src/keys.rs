//! Cache key derivation (spec.md §7 "Two-key pattern for evidence bundles",
//! grounded in `core_cache/keys.py`'s namespaced-key convention).

use serde::Serialize;

use bv_common::fingerprint;

const NS_GW: &str = "bv:gw:v1";
const NS_MEM: &str = "bv:mem:v1";

fn s(v: Option<&str>) -> &str {
    v.unwrap_or("")
}

/// `evidence:{anchor_id}:latest` — always points at the most recent
/// composite key written for this anchor.
pub fn alias_key(anchor_id: &str) -> String {
    format!("evidence:{anchor_id}:latest")
}

#[derive(Serialize)]
struct CompositeBasis<'a> {
    decision_id: &'a str,
    intent: &'a str,
    graph_scope: &'a str,
    snapshot_etag: &'a str,
    truncation_flag: bool,
}

/// `evidence:sha256({decision_id, intent, graph_scope, snapshot_etag,
/// truncation_flag})` (spec §7, I4 fingerprint discipline).
pub fn composite_key(
    decision_id: &str,
    intent: &str,
    graph_scope: &str,
    snapshot_etag: &str,
    truncation_flag: bool,
) -> String {
    let basis = CompositeBasis {
        decision_id,
        intent,
        graph_scope,
        snapshot_etag,
        truncation_flag,
    };
    let fp = fingerprint(&basis).expect("composite basis always serialises");
    format!("evidence:{fp}")
}

pub fn gw_evidence(snapshot_etag: Option<&str>, allowed_ids_fp: Option<&str>, policy_fp: Option<&str>) -> String {
    format!(
        "{NS_GW}:evidence:{}|{}|{}",
        s(snapshot_etag),
        s(allowed_ids_fp),
        s(policy_fp)
    )
}

pub fn gw_bundle(bundle_fp: Option<&str>) -> String {
    format!("{NS_GW}:bundle:{}", s(bundle_fp))
}

pub fn mem_resolve(snapshot_etag: Option<&str>, policy_fp: Option<&str>, query: Option<&str>) -> String {
    let fp = fingerprint(&(s(snapshot_etag), s(policy_fp), s(query))).expect("tuple always serialises");
    format!("{NS_MEM}:resolve:{fp}")
}

pub fn mem_expand_candidates(snapshot_etag: Option<&str>, policy_fp: Option<&str>, anchor_id: Option<&str>) -> String {
    let fp = fingerprint(&(s(snapshot_etag), s(policy_fp), s(anchor_id))).expect("tuple always serialises");
    format!("{NS_MEM}:expand:{fp}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_is_deterministic() {
        let a = composite_key("eng#d-1", "why_decision", "eng/*", "snap-1", false);
        let b = composite_key("eng#d-1", "why_decision", "eng/*", "snap-1", false);
        assert_eq!(a, b);
        assert!(a.starts_with("evidence:sha256:"));
    }

    #[test]
    fn composite_key_changes_with_snapshot_etag() {
        let a = composite_key("eng#d-1", "why_decision", "eng/*", "snap-1", false);
        let b = composite_key("eng#d-1", "why_decision", "eng/*", "snap-2", false);
        assert_ne!(a, b);
    }

    #[test]
    fn gateway_keys_are_namespaced() {
        assert!(gw_evidence(Some("s"), Some("a"), Some("p")).starts_with("bv:gw:v1:evidence:"));
        assert!(gw_bundle(Some("b")).starts_with("bv:gw:v1:bundle:"));
    }
}
