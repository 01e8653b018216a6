//! Raw fixture record shape, kind inference and alias canonicalisation
//! (spec.md §4.14). Mirrors `bv_common::Value`'s "runtime reflection"
//! design note: fixtures arrive as loosely-typed JSON objects and are
//! walked as a tagged tree rather than deserialised into a fixed struct,
//! since unknown keys must survive under `x-extra` rather than be rejected.

use std::path::PathBuf;

use serde_json::{Map, Value as JsonValue};

/// `ts → timestamp`, `option → title`, `desc → description`,
/// `maker → decision_maker` (spec.md §4.14: "canonicalise aliases
/// (`title↔option`, `ts↔timestamp`, etc.)"). The legacy key is always
/// preserved verbatim under `x-extra` once canonicalised.
const ALIASES: &[(&str, &str)] = &[
    ("ts", "timestamp"),
    ("option", "title"),
    ("desc", "description"),
    ("maker", "decision_maker"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Decision,
    Event,
    Transition,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Decision => "decision",
            RecordKind::Event => "event",
            RecordKind::Transition => "transition",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawRecord {
    pub kind: RecordKind,
    pub fields: Map<String, JsonValue>,
    pub source_path: PathBuf,
}

/// `transition` if `from`/`to`/`relation` are all present; `decision` if the
/// legacy `option` key is present; `event` otherwise. Checked on the
/// as-parsed object, before alias canonicalisation runs, since inference
/// keys on the *original* field name (spec.md §4.14, literal order).
pub fn infer_kind(obj: &Map<String, JsonValue>) -> RecordKind {
    if obj.contains_key("from") && obj.contains_key("to") && obj.contains_key("relation") {
        RecordKind::Transition
    } else if obj.contains_key("option") {
        RecordKind::Decision
    } else {
        RecordKind::Event
    }
}

/// Rewrite every aliased key to its canonical name, stashing the original
/// value under `x-extra.<legacy-key>` so nothing is lost (spec.md §4.14
/// "preserving originals under `x-extra`"). A canonical key already present
/// wins over its alias; the alias is still preserved under `x-extra`.
pub fn canonicalise_aliases(obj: &mut Map<String, JsonValue>) {
    let mut extra = match obj.remove("x-extra") {
        Some(JsonValue::Object(m)) => m,
        _ => Map::new(),
    };
    for (legacy, canonical) in ALIASES {
        if let Some(value) = obj.remove(*legacy) {
            extra.insert((*legacy).to_string(), value.clone());
            obj.entry((*canonical).to_string()).or_insert(value);
        }
    }
    if !extra.is_empty() {
        obj.insert("x-extra".to_string(), JsonValue::Object(extra));
    }
}

pub fn parse_record(path: PathBuf, raw: &str) -> Result<RawRecord, String> {
    let value: JsonValue = serde_json::from_str(raw)
        .map_err(|e| format!("{}: malformed JSON: {e}", path.display()))?;
    let JsonValue::Object(mut obj) = value else {
        return Err(format!("{}: expected a JSON object", path.display()));
    };
    let kind = infer_kind(&obj);
    canonicalise_aliases(&mut obj);
    Ok(RawRecord {
        kind,
        fields: obj,
        source_path: path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_transition_before_decision() {
        let obj: Map<String, JsonValue> = serde_json::from_str(
            r#"{"from":"eng#e-1","to":"eng#d-1","relation":"led_to","option":"ignored"}"#,
        )
        .unwrap();
        assert_eq!(infer_kind(&obj), RecordKind::Transition);
    }

    #[test]
    fn infers_decision_from_legacy_option_key() {
        let obj: Map<String, JsonValue> =
            serde_json::from_str(r#"{"id":"d-1","option":"Adopt gRPC"}"#).unwrap();
        assert_eq!(infer_kind(&obj), RecordKind::Decision);
    }

    #[test]
    fn canonicalises_option_to_title_and_preserves_original() {
        let mut obj: Map<String, JsonValue> =
            serde_json::from_str(r#"{"id":"d-1","option":"Adopt gRPC"}"#).unwrap();
        canonicalise_aliases(&mut obj);
        assert_eq!(obj.get("title").unwrap(), "Adopt gRPC");
        assert_eq!(
            obj["x-extra"].get("option").unwrap(),
            "Adopt gRPC"
        );
    }
}
