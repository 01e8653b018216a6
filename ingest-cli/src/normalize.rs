//! ID/tag slugification, timestamp normalisation, field whitelisting and
//! snippet enrichment (spec.md §4.14), all grounded on `bv_common::ids`
//! rather than reimplemented ad hoc.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value as JsonValue};

use bv_common::ids::{is_valid_domain, is_slug, slugify_id, slugify_tag};
use bv_common::Value;

use crate::model::RecordKind;

const DECISION_FIELDS: &[&str] = &[
    "id",
    "domain",
    "title",
    "description",
    "rationale",
    "timestamp",
    "decision_maker",
    "tags",
    "supported_by",
    "based_on",
    "sensitivity",
    "namespaces",
    "roles_allowed",
];

const EVENT_FIELDS: &[&str] = &[
    "id",
    "domain",
    "title",
    "description",
    "timestamp",
    "tags",
    "led_to",
    "sensitivity",
    "namespaces",
    "roles_allowed",
];

const TRANSITION_FIELDS: &[&str] = &["from", "to", "relation", "timestamp", "domain"];

pub fn whitelist_for(kind: RecordKind) -> &'static [&'static str] {
    match kind {
        RecordKind::Decision => DECISION_FIELDS,
        RecordKind::Event => EVENT_FIELDS,
        RecordKind::Transition => TRANSITION_FIELDS,
    }
}

/// Move every key not in `kind`'s whitelist into `x-extra`, merging with
/// whatever alias-preserved entries `canonicalise_aliases` already placed
/// there. Unknown keys are never dropped (spec.md §4.14 "unknown keys move
/// to `x-extra`").
pub fn apply_whitelist(kind: RecordKind, fields: &mut Map<String, JsonValue>) {
    let allowed = whitelist_for(kind);
    let mut extra = match fields.remove("x-extra") {
        Some(JsonValue::Object(m)) => m,
        _ => Map::new(),
    };
    let stray: Vec<String> = fields
        .keys()
        .filter(|k| !allowed.contains(&k.as_str()))
        .cloned()
        .collect();
    for key in stray {
        if let Some(value) = fields.remove(&key) {
            extra.entry(key).or_insert(value);
        }
    }
    if !extra.is_empty() {
        fields.insert("x-extra".to_string(), JsonValue::Object(extra));
    }
}

pub fn x_extra_value(fields: &Map<String, JsonValue>) -> Value {
    match fields.get("x-extra") {
        Some(v) => Value::from(v.clone()),
        None => Value::default(),
    }
}

/// `slugify_id` + strict-slug check, failing closed rather than silently
/// emitting an id that does not satisfy `^[a-z0-9][a-z0-9-]{2,}[a-z0-9]$`.
pub fn normalise_id(raw: &str) -> Result<String, String> {
    let slug = slugify_id(raw);
    if !is_slug(&slug) {
        return Err(format!("id '{raw}' does not slugify to a valid id (got '{slug}')"));
    }
    Ok(slug)
}

/// Per-segment `slugify_id`, rejoined with `/`, so a multi-segment domain
/// like `"HR / Payroll"` becomes `hr/payroll`.
pub fn normalise_domain(raw: &str) -> Result<String, String> {
    let joined = raw
        .split('/')
        .map(|seg| slugify_id(seg))
        .collect::<Vec<_>>()
        .join("/");
    if !is_valid_domain(&joined) {
        return Err(format!("domain '{raw}' does not normalise to a valid domain (got '{joined}')"));
    }
    Ok(joined)
}

pub fn normalise_tag(raw: &str) -> String {
    slugify_tag(raw)
}

/// Accepts RFC3339, a bare `YYYY-MM-DD` date, or a space-separated
/// `YYYY-MM-DD HH:MM:SS`, and normalises all three to
/// `YYYY-MM-DDTHH:MM:SSZ` (spec.md §4.14).
pub fn normalise_timestamp(raw: &str) -> Result<String, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc).format("%Y-%m-%dT%H:%M:%SZ").to_string());
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(ndt.format("%Y-%m-%dT%H:%M:%SZ").to_string());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.format("%Y-%m-%dT00:00:00Z").to_string());
    }
    Err(format!("timestamp '{raw}' is not RFC3339, a date, or a date+time"))
}

/// `≤160` chars assembled from `title`, then `description`, then
/// `rationale`, each separated by a single space and truncated on a
/// `char_indices` boundary so multi-byte characters are never split
/// (spec.md §4.14 "enrich snippets").
pub fn build_snippet(title: &str, description: &str, rationale: Option<&str>) -> String {
    let mut joined = String::new();
    for part in [Some(title), Some(description), rationale] {
        if let Some(p) = part {
            if p.is_empty() {
                continue;
            }
            if !joined.is_empty() {
                joined.push(' ');
            }
            joined.push_str(p);
        }
    }
    const LIMIT: usize = 160;
    if joined.len() <= LIMIT {
        return joined;
    }
    let cut = joined
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= LIMIT)
        .last()
        .unwrap_or(0);
    joined[..cut].to_string()
}

/// Union of every field actually observed on a record plus the aliases
/// `canonicalise_aliases` knows how to map, in deterministic (sorted)
/// order (spec.md §4.14 "field catalog construction").
pub fn field_catalog(observed: &std::collections::BTreeSet<String>) -> Vec<String> {
    const KNOWN_ALIASES: &[&str] = &["ts", "option", "desc", "maker"];
    let mut all = observed.clone();
    for a in KNOWN_ALIASES {
        all.insert((*a).to_string());
    }
    all.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_variants_normalise_to_the_same_shape() {
        assert_eq!(
            normalise_timestamp("2026-01-02T03:04:05Z").unwrap(),
            "2026-01-02T03:04:05Z"
        );
        assert_eq!(
            normalise_timestamp("2026-01-02 03:04:05").unwrap(),
            "2026-01-02T03:04:05Z"
        );
        assert_eq!(normalise_timestamp("2026-01-02").unwrap(), "2026-01-02T00:00:00Z");
    }

    #[test]
    fn snippet_caps_at_160_chars_on_a_char_boundary() {
        let long_title = "é".repeat(200);
        let snippet = build_snippet(&long_title, "", None);
        assert!(snippet.len() <= 160);
    }

    #[test]
    fn domain_normalises_multi_segment_paths() {
        assert_eq!(normalise_domain("HR / Payroll").unwrap(), "hr/payroll");
    }
}
