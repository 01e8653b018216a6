//! Reciprocal link derivation and referential-integrity checking
//! (spec.md §4.14: "derive reciprocal links: `event.led_to ↔
//! decision.supported_by`"; "referential integrity fails the batch with
//! explicit messages").

use std::collections::{BTreeSet, HashSet};

use bv_models::node::{Edge, EdgeType, Node, NodeKind};

use crate::normalize::{normalise_domain, normalise_id};

/// Normalise a reference anchor the same way a node's own `id`/`domain`
/// were normalised, so a fixture that spells a reference loosely (mixed
/// case, stray punctuation) still resolves against the batch's node set.
fn normalise_anchor_ref(raw: &str) -> Result<String, String> {
    let Some((domain, id)) = raw.split_once('#') else {
        return Err(format!("reference '{raw}' is not a '<domain>#<id>' anchor"));
    };
    let domain = normalise_domain(domain)?;
    let id = normalise_id(id)?;
    Ok(format!("{domain}#{id}"))
}

pub struct LinkedNode {
    pub node: Node,
    /// Raw (un-normalised) reference anchors declared on this record:
    /// `supported_by ∪ based_on` for decisions, `led_to` for events.
    pub refs: Vec<String>,
}

/// Resolves every declared reference against `nodes`, deriving the
/// implied edge for each, and reports every reference that names no known
/// node. `path_for` looks up the originating file for an error message.
pub fn derive_and_check(
    nodes: &[LinkedNode],
    explicit_transitions: &[Edge],
    path_for: impl Fn(&str) -> String,
) -> Result<Vec<Edge>, Vec<String>> {
    let known: std::collections::BTreeMap<String, &Node> =
        nodes.iter().map(|n| (n.node.id.clone(), &n.node)).collect();

    let mut errors = Vec::new();
    let mut edge_ids: HashSet<String> = HashSet::new();
    let mut edges = Vec::new();

    let mut push_edge = |edge: Edge| {
        if let Ok(id) = edge.id() {
            if edge_ids.insert(id) {
                edges.push(edge);
            }
        }
    };

    for linked in nodes {
        for raw_ref in &linked.refs {
            let resolved = match normalise_anchor_ref(raw_ref) {
                Ok(r) => r,
                Err(e) => {
                    errors.push(format!("{}: {e}", path_for(&linked.node.id)));
                    continue;
                }
            };
            if !known.contains_key(&resolved) {
                errors.push(format!(
                    "{}: dangling reference '{raw_ref}' (resolved '{resolved}') not found in this batch",
                    path_for(&linked.node.id)
                ));
                continue;
            }
            match linked.node.kind {
                NodeKind::Decision => {
                    let other = &known[&resolved];
                    match other.kind {
                        NodeKind::Event => push_edge(Edge {
                            kind: EdgeType::LedTo,
                            from: resolved,
                            to: linked.node.id.clone(),
                            timestamp: None,
                            domain: None,
                        }),
                        NodeKind::Decision => push_edge(Edge {
                            kind: EdgeType::Causal,
                            from: resolved,
                            to: linked.node.id.clone(),
                            timestamp: None,
                            domain: None,
                        }),
                    }
                }
                NodeKind::Event => push_edge(Edge {
                    kind: EdgeType::LedTo,
                    from: linked.node.id.clone(),
                    to: resolved,
                    timestamp: None,
                    domain: None,
                }),
            }
        }
    }

    for edge in explicit_transitions {
        if !known.contains_key(&edge.from) {
            errors.push(format!(
                "transition {}: unknown 'from' anchor '{}'",
                edge.kind.as_str(),
                edge.from
            ));
            continue;
        }
        if !known.contains_key(&edge.to) {
            errors.push(format!(
                "transition {}: unknown 'to' anchor '{}'",
                edge.kind.as_str(),
                edge.to
            ));
            continue;
        }
        push_edge(edge.clone());
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(edges)
}

/// Relation catalog is fixed and alphabetical (spec.md §4.14).
pub fn relation_catalog() -> Vec<&'static str> {
    vec!["ALIAS_OF", "CAUSAL", "LED_TO"]
}

pub fn observed_field_keys(nodes: &[LinkedNode]) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for n in nodes {
        keys.insert("id".to_string());
        keys.insert("domain".to_string());
        keys.insert("title".to_string());
        keys.insert("description".to_string());
        keys.insert("timestamp".to_string());
        keys.insert("tags".to_string());
        keys.insert("sensitivity".to_string());
        keys.insert("namespaces".to_string());
        keys.insert("roles_allowed".to_string());
        if n.node.decision_maker.is_some() {
            keys.insert("decision_maker".to_string());
        }
        match n.node.kind {
            NodeKind::Decision => {
                keys.insert("supported_by".to_string());
                keys.insert("based_on".to_string());
            }
            NodeKind::Event => {
                keys.insert("led_to".to_string());
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_models::node::Sensitivity;

    fn decision(id: &str, supported_by: Vec<&str>) -> LinkedNode {
        LinkedNode {
            node: Node {
                id: id.to_string(),
                kind: NodeKind::Decision,
                domain: "eng".to_string(),
                title: "t".to_string(),
                description: "d".to_string(),
                timestamp: "2026-01-01T00:00:00Z".to_string(),
                tags: vec![],
                x_extra: Default::default(),
                decision_maker: None,
                sensitivity: Sensitivity::Low,
                namespaces: vec![],
                roles_allowed: vec![],
                embedding: None,
                snapshot_etag: None,
            },
            refs: supported_by.into_iter().map(str::to_string).collect(),
        }
    }

    fn event(id: &str) -> LinkedNode {
        LinkedNode {
            node: Node {
                id: id.to_string(),
                kind: NodeKind::Event,
                domain: "eng".to_string(),
                title: "t".to_string(),
                description: "d".to_string(),
                timestamp: "2026-01-01T00:00:00Z".to_string(),
                tags: vec![],
                x_extra: Default::default(),
                decision_maker: None,
                sensitivity: Sensitivity::Low,
                namespaces: vec![],
                roles_allowed: vec![],
                embedding: None,
                snapshot_etag: None,
            },
            refs: vec![],
        }
    }

    #[test]
    fn derives_led_to_edge_from_decision_supported_by() {
        let nodes = vec![decision("eng#d-1", vec!["eng#e-1"]), event("eng#e-1")];
        let edges = derive_and_check(&nodes, &[], |id| id.to_string()).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].kind, EdgeType::LedTo);
        assert_eq!(edges[0].from, "eng#e-1");
        assert_eq!(edges[0].to, "eng#d-1");
    }

    #[test]
    fn dangling_reference_is_a_referential_integrity_error() {
        let nodes = vec![decision("eng#d-1", vec!["eng#e-ghost"])];
        let err = derive_and_check(&nodes, &[], |id| id.to_string()).unwrap_err();
        assert!(err[0].contains("dangling reference"));
    }
}
