//! `field_mask` / `field_mask_with_summary` (spec §4.2).
//!
//! Masking always keeps `id` and `type`; everything else is gated by the
//! role profile's `field_visibility[type].visible_fields` (dot-path/glob
//! patterns) plus the `x-extra` allowlist in `extra_visible`.

use std::collections::BTreeMap;

use bv_common::value::{pattern_matches, Value};
use bv_models::node::{MaskedNode, Node, NodeKind};

use crate::profile::FieldVisibility;

fn kind_key(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Decision => "DECISION",
        NodeKind::Event => "EVENT",
    }
}

fn base_fields(node: &Node) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    out.insert("domain".to_string(), Value::String(node.domain.clone()));
    out.insert("title".to_string(), Value::String(node.title.clone()));
    out.insert(
        "description".to_string(),
        Value::String(node.description.clone()),
    );
    out.insert(
        "timestamp".to_string(),
        Value::String(node.timestamp.clone()),
    );
    out.insert(
        "tags".to_string(),
        Value::List(node.tags.iter().cloned().map(Value::String).collect()),
    );
    if let Some(dm) = &node.decision_maker {
        out.insert("decision_maker".to_string(), Value::String(dm.clone()));
    }
    out
}

/// Mask `node` under `field_visibility` for its kind. Always keeps `id`
/// and `type`; visible base fields are selected by exact dot-path or glob
/// match against `visible_fields`, `rationale_visible=false` always strips
/// `description` on `DECISION` nodes (the original's synonym for
/// rationale), and `x-extra.*` entries are filtered by `extra_visible`.
pub fn field_mask(node: &Node, field_visibility: &BTreeMap<String, FieldVisibility>, extra_visible: &[String]) -> MaskedNode {
    let mut out: MaskedNode = BTreeMap::new();
    out.insert("id".to_string(), Value::String(node.id.clone()));
    out.insert(
        "type".to_string(),
        Value::String(kind_key(node.kind).to_string()),
    );

    let fv = field_visibility.get(kind_key(node.kind));
    let visible_fields: &[String] = fv.map(|f| f.visible_fields.as_slice()).unwrap_or(&[]);
    let rationale_visible = fv.map(|f| f.rationale_visible).unwrap_or(false);

    for (field, value) in base_fields(node) {
        if field == "description" && node.kind == NodeKind::Decision && !rationale_visible {
            continue;
        }
        let allowed = visible_fields
            .iter()
            .any(|pattern| pattern == "*" || pattern == &field || pattern_matches(pattern, &field));
        if allowed {
            out.insert(field, value);
        }
    }

    if let Some(extra_obj) = node.x_extra.as_object() {
        for (key, value) in extra_obj {
            let path = format!("x-extra.{key}");
            let allowed = extra_visible
                .iter()
                .any(|pattern| pattern == &path || pattern_matches(pattern, &path));
            if allowed {
                out.insert(path, value.clone());
            }
        }
    }

    out
}

/// One entry of `mask_summary.items` (spec §4.2: `{field, reason_code,
/// rule_id}`). `rule_id` is absent for `x-extra` removals, mirroring the
/// original's `field_mask_with_summary` (`policy.py`) which only attaches a
/// `visible_fields`-derived rule id to base-field denials.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MaskSummaryItem {
    pub field: String,
    pub reason_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
}

/// Summary of what masking removed, surfaced as `mask_summary` on
/// `enrich` responses (spec §4.2, §4.5): `{total_removed, items}`, values
/// never included.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MaskSummary {
    pub total_removed: usize,
    pub items: Vec<MaskSummaryItem>,
}

const FIELD_DENIED: &str = "policy:field_denied";

pub fn field_mask_with_summary(
    node: &Node,
    field_visibility: &BTreeMap<String, FieldVisibility>,
    extra_visible: &[String],
) -> (MaskedNode, MaskSummary) {
    let masked = field_mask(node, field_visibility, extra_visible);
    let full = base_fields(node);

    let node_type = kind_key(node.kind).to_lowercase();
    let visible_fields: &[String] = field_visibility
        .get(kind_key(node.kind))
        .map(|f| f.visible_fields.as_slice())
        .unwrap_or(&[]);
    let mut sorted_visible: Vec<&str> = visible_fields.iter().map(|s| s.as_str()).collect();
    sorted_visible.sort_unstable();
    let visible_joined = if sorted_visible.is_empty() {
        "<empty>".to_string()
    } else {
        sorted_visible.join(",")
    };
    let rule_id = format!("{node_type}.visible_fields={visible_joined}");

    let mut items: Vec<MaskSummaryItem> = full
        .keys()
        .filter(|k| !masked.contains_key(*k))
        .map(|field| MaskSummaryItem {
            field: field.clone(),
            reason_code: FIELD_DENIED.to_string(),
            rule_id: Some(rule_id.clone()),
        })
        .collect();

    if let Some(extra_obj) = node.x_extra.as_object() {
        for key in extra_obj.keys() {
            let path = format!("x-extra.{key}");
            if !masked.contains_key(&path) {
                items.push(MaskSummaryItem {
                    field: path,
                    reason_code: FIELD_DENIED.to_string(),
                    rule_id: None,
                });
            }
        }
    }

    let summary = MaskSummary {
        total_removed: items.len(),
        items,
    };
    (masked, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_common::Value as BvValue;

    fn node() -> Node {
        Node {
            id: "eng#d-1".into(),
            kind: NodeKind::Decision,
            domain: "eng".into(),
            title: "Adopt gRPC".into(),
            description: "because latency".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            tags: vec!["infra".into()],
            x_extra: BvValue::Object(
                [("migration".to_string(), BvValue::Bool(true))]
                    .into_iter()
                    .collect(),
            ),
            decision_maker: Some("alice".into()),
            sensitivity: Sensitivity::Low,
            namespaces: vec!["eng".into()],
            roles_allowed: vec![],
            embedding: None,
            snapshot_etag: None,
        }
    }

    use bv_models::node::Sensitivity;

    #[test]
    fn always_keeps_id_and_type() {
        let masked = field_mask(&node(), &Default::default(), &[]);
        assert_eq!(masked.get("id"), Some(&Value::String("eng#d-1".to_string())));
        assert_eq!(masked.get("type"), Some(&Value::String("DECISION".to_string())));
        assert!(!masked.contains_key("title"));
    }

    #[test]
    fn visible_fields_allowlist_lets_fields_through() {
        let mut fv = BTreeMap::new();
        fv.insert(
            "DECISION".to_string(),
            FieldVisibility {
                visible_fields: vec!["title".into(), "tags".into()],
                rationale_visible: false,
            },
        );
        let masked = field_mask(&node(), &fv, &[]);
        assert!(masked.contains_key("title"));
        assert!(masked.contains_key("tags"));
        assert!(!masked.contains_key("description"));
    }

    #[test]
    fn rationale_visible_gates_description_on_decisions() {
        let mut fv = BTreeMap::new();
        fv.insert(
            "DECISION".to_string(),
            FieldVisibility {
                visible_fields: vec!["description".into()],
                rationale_visible: true,
            },
        );
        let masked = field_mask(&node(), &fv, &[]);
        assert!(masked.contains_key("description"));
    }

    #[test]
    fn extra_visible_gates_x_extra_entries() {
        let masked = field_mask(&node(), &Default::default(), &["x-extra.migration".into()]);
        assert!(masked.contains_key("x-extra.migration"));
    }

    #[test]
    fn summary_counts_removed_fields() {
        let (_, summary) = field_mask_with_summary(&node(), &Default::default(), &[]);
        assert!(summary.items.iter().any(|i| i.field == "title" && i.reason_code == "policy:field_denied"));
        assert_eq!(summary.total_removed, summary.items.len());
        assert!(summary.items.iter().any(|i| i.field == "x-extra.migration" && i.rule_id.is_none()));
    }

    #[test]
    fn summary_rule_id_names_visible_fields_allowlist() {
        let mut fv = BTreeMap::new();
        fv.insert(
            "DECISION".to_string(),
            FieldVisibility {
                visible_fields: vec!["title".into()],
                rationale_visible: false,
            },
        );
        let (_, summary) = field_mask_with_summary(&node(), &fv, &[]);
        let tags_item = summary.items.iter().find(|i| i.field == "tags").unwrap();
        assert_eq!(tags_item.rule_id.as_deref(), Some("decision.visible_fields=title"));
    }
}
