//! Required-field validation and record → `Node`/`Edge` construction
//! (spec.md §4.14 "validate against JSON schemas"). No `jsonschema`-style
//! dependency sits in this workspace's stack, so validation is hand-rolled
//! over the tagged `serde_json::Value` tree the same way `bv_common::Value`
//! stands in for the original's dynamic dicts.

use serde_json::{Map, Value as JsonValue};

use bv_models::node::{Edge, EdgeType, Node, NodeKind, Sensitivity};

use crate::model::{RawRecord, RecordKind};
use crate::normalize;

/// A record reduced to its storage form plus the raw (pre-normalisation)
/// reference anchors it declares, which `links::derive_and_check` resolves
/// against the batch's collected node set.
pub enum Built {
    Node { node: Node, refs: Vec<String> },
    Transition { edge: Edge },
}

fn str_field<'a>(obj: &'a Map<String, JsonValue>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(|v| v.as_str())
}

fn string_list(obj: &Map<String, JsonValue>, key: &str) -> Vec<String> {
    obj.get(key)
        .and_then(|v| v.as_array())
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn parse_sensitivity(raw: Option<&str>, path: &str, errors: &mut Vec<String>) -> Sensitivity {
    match raw {
        None => Sensitivity::Low,
        Some("low") => Sensitivity::Low,
        Some("medium") => Sensitivity::Medium,
        Some("high") => Sensitivity::High,
        Some(other) => {
            errors.push(format!("{path}: invalid sensitivity '{other}' (want low|medium|high)"));
            Sensitivity::Low
        }
    }
}

fn require<'a>(
    obj: &'a Map<String, JsonValue>,
    key: &str,
    path: &str,
    errors: &mut Vec<String>,
) -> Option<&'a str> {
    match str_field(obj, key) {
        Some(v) if !v.is_empty() => Some(v),
        _ => {
            errors.push(format!("{path}: missing required field '{key}'"));
            None
        }
    }
}

/// Validates, normalises and builds one record. Pushes every problem found
/// onto `errors` and returns `None` only when a required field is absent
/// (normalisation failures on a present field are pushed as errors too, but
/// the record is still skipped from graph construction).
pub fn build_record(record: RawRecord, errors: &mut Vec<String>) -> Option<Built> {
    let path = record.source_path.display().to_string();
    let RawRecord { kind, mut fields, .. } = record;

    match kind {
        RecordKind::Transition => {
            let from = require(&fields, "from", &path, errors)?.to_string();
            let to = require(&fields, "to", &path, errors)?.to_string();
            let relation = require(&fields, "relation", &path, errors)?.to_string();
            let edge_kind = match relation.as_str() {
                "led_to" => EdgeType::LedTo,
                "causal" => EdgeType::Causal,
                "alias_of" => EdgeType::AliasOf,
                other => {
                    errors.push(format!(
                        "{path}: unknown transition relation '{other}' (want led_to|causal|alias_of)"
                    ));
                    return None;
                }
            };
            let timestamp = str_field(&fields, "timestamp")
                .map(normalize::normalise_timestamp)
                .transpose()
                .map_err(|e| errors.push(format!("{path}: {e}")))
                .ok()
                .flatten();
            let domain = str_field(&fields, "domain").map(str::to_string);
            Some(Built::Transition {
                edge: Edge {
                    kind: edge_kind,
                    from,
                    to,
                    timestamp,
                    domain,
                },
            })
        }

        RecordKind::Decision | RecordKind::Event => {
            let raw_id = require(&fields, "id", &path, errors)?.to_string();
            let raw_domain = require(&fields, "domain", &path, errors)?.to_string();
            let title = require(&fields, "title", &path, errors).unwrap_or("").to_string();
            let description = str_field(&fields, "description").unwrap_or("").to_string();
            let rationale = str_field(&fields, "rationale").map(str::to_string);
            let decision_maker = str_field(&fields, "decision_maker").map(str::to_string);
            let raw_timestamp = require(&fields, "timestamp", &path, errors).map(str::to_string);
            let sensitivity = parse_sensitivity(str_field(&fields, "sensitivity"), &path, errors);
            let namespaces = string_list(&fields, "namespaces");
            let roles_allowed = string_list(&fields, "roles_allowed");
            let tags: Vec<String> = string_list(&fields, "tags")
                .iter()
                .map(|t| normalize::normalise_tag(t))
                .collect();

            let snippet = normalize::build_snippet(&title, &description, rationale.as_deref());
            normalize::apply_whitelist(kind, &mut fields);
            let mut x_extra = normalize::x_extra_value(&fields);
            if let bv_common::Value::Object(ref mut m) = x_extra {
                m.insert("snippet".to_string(), bv_common::Value::String(snippet));
            }

            let id = match normalize::normalise_id(&raw_id) {
                Ok(v) => v,
                Err(e) => {
                    errors.push(format!("{path}: {e}"));
                    return None;
                }
            };
            let domain = match normalize::normalise_domain(&raw_domain) {
                Ok(v) => v,
                Err(e) => {
                    errors.push(format!("{path}: {e}"));
                    return None;
                }
            };
            let timestamp = match raw_timestamp {
                Some(ts) => match normalize::normalise_timestamp(&ts) {
                    Ok(v) => v,
                    Err(e) => {
                        errors.push(format!("{path}: {e}"));
                        return None;
                    }
                },
                None => return None,
            };

            let node_kind = if kind == RecordKind::Decision {
                NodeKind::Decision
            } else {
                NodeKind::Event
            };
            let refs = if kind == RecordKind::Decision {
                let mut r = string_list(&fields, "supported_by");
                r.extend(string_list(&fields, "based_on"));
                r
            } else {
                string_list(&fields, "led_to")
            };

            let node = Node {
                id: format!("{domain}#{id}"),
                kind: node_kind,
                domain,
                title,
                description,
                timestamp,
                tags,
                x_extra,
                decision_maker,
                sensitivity,
                namespaces,
                roles_allowed,
                embedding: None,
                snapshot_etag: None,
            };
            Some(Built::Node { node, refs })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_record;
    use std::path::PathBuf;

    #[test]
    fn builds_decision_node_from_legacy_option_field() {
        let raw = r#"{"id":"D 100!","domain":"Eng","option":"Adopt gRPC","timestamp":"2026-01-02","sensitivity":"high","tags":["M-and-A"]}"#;
        let record = parse_record(PathBuf::from("d.json"), raw).unwrap();
        let mut errors = Vec::new();
        let built = build_record(record, &mut errors).unwrap();
        assert!(errors.is_empty(), "{errors:?}");
        match built {
            Built::Node { node, .. } => {
                assert_eq!(node.id, "eng#d-100");
                assert_eq!(node.title, "Adopt gRPC");
                assert_eq!(node.tags, vec!["m_and_a".to_string()]);
            }
            _ => panic!("expected a node"),
        }
    }

    #[test]
    fn missing_required_field_is_reported() {
        let raw = r#"{"domain":"eng","option":"x","timestamp":"2026-01-02"}"#;
        let record = parse_record(PathBuf::from("d.json"), raw).unwrap();
        let mut errors = Vec::new();
        assert!(build_record(record, &mut errors).is_none());
        assert!(errors.iter().any(|e| e.contains("missing required field 'id'")));
    }
}
