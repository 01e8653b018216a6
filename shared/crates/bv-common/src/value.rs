//! Tagged-variant JSON tree (spec §9 "runtime reflection / dynamic typing").
//!
//! Stands in for the original's reliance on free-form Python dicts for
//! `x-extra` and similar flexible payloads. Field-visibility pattern
//! matching (bv-policy) walks this tree by dot-path.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Object(BTreeMap::new())
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(a) => Value::List(a.into_iter().map(Value::from).collect()),
            JsonValue::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for JsonValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(b),
            Value::Int(i) => JsonValue::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s),
            Value::List(l) => JsonValue::Array(l.into_iter().map(JsonValue::from).collect()),
            Value::Object(o) => {
                JsonValue::Object(o.into_iter().map(|(k, v)| (k, JsonValue::from(v))).collect())
            }
        }
    }
}

impl Value {
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(m) => Some(m),
            _ => None,
        }
    }

    pub fn is_empty_object(&self) -> bool {
        matches!(self, Value::Object(m) if m.is_empty())
    }

    /// Look up a dot-path (e.g. `"foo.bar"`) within this tree.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut cur = self;
        for seg in path.split('.') {
            cur = match cur {
                Value::Object(m) => m.get(seg)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Remove a (possibly nested) dot-path, returning whether anything was
    /// removed. Used by field masking to build `mask_summary`.
    pub fn remove_path(&mut self, path: &str) -> bool {
        let segs: Vec<&str> = path.split('.').collect();
        remove_rec(self, &segs)
    }
}

fn remove_rec(v: &mut Value, segs: &[&str]) -> bool {
    match segs {
        [] => false,
        [last] => {
            if let Value::Object(m) = v {
                m.remove(*last).is_some()
            } else {
                false
            }
        }
        [head, rest @ ..] => {
            if let Value::Object(m) = v {
                if let Some(child) = m.get_mut(*head) {
                    return remove_rec(child, rest);
                }
            }
            false
        }
    }
}

/// Does `pattern` (exact, `*` glob, or `foo.*` subtree prefix) match `path`?
/// Used by field-visibility checks (bv-policy) over dot-paths into a
/// document or its `x-extra` subtree.
pub fn pattern_matches(pattern: &str, path: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return path == prefix || path.starts_with(&format!("{prefix}."));
    }
    pattern == path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_json() {
        let j = serde_json::json!({"a": 1, "b": [1, "x", null, true], "c": {"d": 2.5}});
        let v: Value = j.clone().into();
        let back: JsonValue = v.into();
        assert_eq!(j, back);
    }

    #[test]
    fn dot_path_subtree_glob() {
        assert!(pattern_matches("x-extra.*", "x-extra.region"));
        assert!(pattern_matches("x-extra.*", "x-extra"));
        assert!(!pattern_matches("x-extra.*", "other.region"));
        assert!(pattern_matches("title", "title"));
        assert!(!pattern_matches("title", "titles"));
        assert!(pattern_matches("*", "anything.nested"));
    }

    #[test]
    fn get_and_remove_path() {
        let mut v: Value = serde_json::json!({"a": {"b": 1, "c": 2}}).into();
        assert_eq!(v.get_path("a.b"), Some(&Value::Int(1)));
        assert!(v.remove_path("a.b"));
        assert_eq!(v.get_path("a.b"), None);
        assert!(!v.remove_path("a.b"));
    }
}
