//! Shared k=1 edges-only traversal plus the bounded alias tail (spec.md
//! §4.5 `expand_candidates`, §4.7 "Alias Tail"). `enrich/batch`'s scoped
//! `allowed_ids` recomputation (§4.5, §4.8) reuses the same walk so the
//! two endpoints can never diverge on what counts as in-scope.

use std::collections::BTreeSet;

use bv_common::error::BvError;
use bv_models::node::{Edge, Node};
use bv_policy::{acl_check, EffectivePolicy};
use storage::GraphStore;

/// Result of expanding one anchor's k=1 neighbourhood plus its alias tail.
pub struct ExpandResult {
    /// Surviving wire edges: direct LED_TO/CAUSAL neighbours that passed
    /// the edge allowlist and per-neighbour ACL, plus alias-tail edges.
    pub edges: Vec<Edge>,
    /// Canonical allowed-ids scope for this view: anchor plus every
    /// surviving edge endpoint (spec §4.8 "reachable only via edges").
    pub allowed_ids: Vec<String>,
    /// Alias-tail decision IDs that survived ACL (spec §4.7 `alias.returned`).
    pub alias_returned: Vec<String>,
}

fn edge_allowed(edge: &Edge, policy: &EffectivePolicy) -> bool {
    policy.edge_allowlist.is_empty()
        || policy.edge_allowlist.iter().any(|k| k.as_str() == edge.kind.as_str())
}

pub async fn expand(
    graph: &dyn GraphStore,
    anchor: &Node,
    policy: &EffectivePolicy,
) -> Result<ExpandResult, BvError> {
    let mut edges = Vec::new();
    let mut allowed: BTreeSet<String> = BTreeSet::new();
    allowed.insert(anchor.id.clone());
    let mut alias_returned = Vec::new();

    let adjacent = graph.get_edges_adjacent(&anchor.id).await?;

    for edge in &adjacent {
        if !edge.kind.is_causal_kind() {
            continue;
        }
        if !edge_allowed(edge, policy) {
            continue;
        }
        let neighbour_id = if edge.from == anchor.id { &edge.to } else { &edge.from };
        let Some(neighbour) = graph.get_node(neighbour_id).await? else {
            continue;
        };
        if acl_check(&neighbour, policy).is_err() {
            continue;
        }
        allowed.insert(neighbour.id.clone());
        edges.push(edge.clone());
    }

    for edge in &adjacent {
        if edge.kind != bv_models::node::EdgeType::AliasOf || edge.to != anchor.id {
            continue;
        }
        let event_anchor = &edge.from;
        let Some(event) = graph.get_node(event_anchor).await? else {
            continue;
        };
        if acl_check(&event, policy).is_err() {
            continue;
        }
        let tail = graph.next_decisions_from_event(event_anchor, 3).await?;
        for next in tail {
            let Some(decision) = graph.get_node(&next.id).await? else {
                continue;
            };
            if acl_check(&decision, policy).is_err() {
                continue;
            }
            edges.push(Edge {
                kind: next.edge_kind,
                from: event_anchor.clone(),
                to: next.id.clone(),
                timestamp: next.edge_timestamp.clone(),
                domain: None,
            });
            allowed.insert(next.id.clone());
            alias_returned.push(next.id);
        }
    }

    Ok(ExpandResult {
        edges,
        allowed_ids: allowed.into_iter().collect(),
        alias_returned,
    })
}
