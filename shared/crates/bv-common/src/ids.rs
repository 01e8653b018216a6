//! Anchor/domain parsing, slugging and deterministic edge IDs (spec §3, §4.14).

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::error::BvError;

static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap());
static DOMAIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*(?:/[a-z0-9]+(?:-[a-z0-9]+)*)*$").unwrap()
});
static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9._:-]+$").unwrap());
static ANCHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<domain>[a-z0-9]+(?:-[a-z0-9]+)*(?:/[a-z0-9]+(?:-[a-z0-9]+)*)*)#(?P<id>[a-z0-9][a-z0-9._:-]+)$").unwrap()
});
static SLUG_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{2,}[a-z0-9]$").unwrap());

/// Edge kind token as carried on the wire (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EdgeKind {
    #[serde(rename = "LED_TO")]
    LedTo,
    #[serde(rename = "CAUSAL")]
    Causal,
    #[serde(rename = "ALIAS_OF")]
    AliasOf,
}

impl EdgeKind {
    fn id_prefix(self) -> &'static str {
        match self {
            EdgeKind::LedTo => "ledto",
            EdgeKind::Causal => "causal",
            EdgeKind::AliasOf => "alias",
        }
    }
}

/// Validate a bare domain string (no anchor `#id` suffix).
pub fn is_valid_domain(domain: &str) -> bool {
    DOMAIN_RE.is_match(domain)
}

/// Validate a bare id string (no `<domain>#` prefix).
pub fn is_valid_id(id: &str) -> bool {
    ID_RE.is_match(id)
}

/// Validate a full `<domain>#<id>` wire anchor.
pub fn is_valid_anchor(anchor: &str) -> bool {
    ANCHOR_RE.is_match(anchor)
}

/// Split `<domain>#<id>` into its parts, failing closed on malformed input.
pub fn parse_anchor(anchor: &str) -> Result<(String, String), BvError> {
    let caps = ANCHOR_RE
        .captures(anchor)
        .ok_or_else(|| BvError::Validation(format!("invalid anchor format: '{anchor}'")))?;
    Ok((caps["domain"].to_string(), caps["id"].to_string()))
}

pub fn make_anchor(domain: &str, id: &str) -> Result<String, BvError> {
    if !is_valid_domain(domain) {
        return Err(BvError::Validation(format!("invalid domain: '{domain}'")));
    }
    if !is_valid_id(id) {
        return Err(BvError::Validation(format!("invalid id: '{id}'")));
    }
    Ok(format!("{domain}#{id}"))
}

/// Map a wire anchor `<domain>#<id>` to its storage `_key` form: the single
/// `#` separator becomes `_` (ArangoDB forbids `#` in `_key`s; spec §3).
pub fn anchor_to_storage_key(anchor: &str) -> Result<String, BvError> {
    if !is_valid_anchor(anchor) {
        return Err(BvError::Validation(format!("invalid anchor: '{anchor}'")));
    }
    Ok(anchor.replacen('#', "_", 1))
}

/// Inverse of [`anchor_to_storage_key`]: the first `_` after the last `/`
/// becomes `#`. A no-op when `key` already contains `#` (already wire-form).
pub fn storage_key_to_anchor(key: &str) -> Result<String, BvError> {
    if key.is_empty() {
        return Err(BvError::Validation("empty storage key".into()));
    }
    if key.contains('#') {
        return Ok(key.to_string());
    }
    let slash = key.rfind('/').map(|i| i + 1).unwrap_or(0);
    match key[slash..].find('_') {
        Some(rel) => {
            let us = slash + rel;
            Ok(format!("{}#{}", &key[..us], &key[us + 1..]))
        }
        None => Ok(key.to_string()),
    }
}

/// Deterministic edge ID: `{ledto|causal|alias}:{from_anchor}:{to_anchor}`.
pub fn edge_id(kind: EdgeKind, from_anchor: &str, to_anchor: &str) -> Result<String, BvError> {
    if !is_valid_anchor(from_anchor) {
        return Err(BvError::Validation(format!("invalid from anchor: '{from_anchor}'")));
    }
    if !is_valid_anchor(to_anchor) {
        return Err(BvError::Validation(format!("invalid to anchor: '{to_anchor}'")));
    }
    Ok(format!("{}:{}:{}", kind.id_prefix(), from_anchor, to_anchor))
}

/// Canonical slug rules for general identifiers (ingest §4.14): NFKC →
/// lowercase, non-`[a-z0-9]` → `-`, collapse repeats, trim. Best-effort;
/// callers must still check [`is_slug`] against the strict regex.
pub fn slugify_id(s: &str) -> String {
    let normalised: String = s.nfkc().collect::<String>().trim().to_lowercase();
    let dashed = Regex::new(r"[^a-z0-9]+").unwrap().replace_all(&normalised, "-");
    let collapsed = Regex::new(r"-{2,}").unwrap().replace_all(&dashed, "-");
    collapsed.trim_matches('-').to_string()
}

/// `true` iff `s` already matches the strict slug regex
/// `^[a-z0-9][a-z0-9-]{2,}[a-z0-9]$`.
pub fn is_slug(s: &str) -> bool {
    !s.is_empty() && SLUG_ID_RE.is_match(s.trim())
}

/// Canonical tag slug: NFKC, lowercase, non-`[a-z0-9]` runs → single `_`,
/// trim, collapse repeats (ingest §4.14, scenario 2: `"m_and_a"` not
/// `"M-and-A"`).
pub fn slugify_tag(s: &str) -> String {
    let normalised: String = s.nfkc().collect::<String>().to_lowercase();
    let underscored = Regex::new(r"[^a-z0-9]+").unwrap().replace_all(&normalised, "_");
    let collapsed = Regex::new(r"_+").unwrap().replace_all(&underscored, "_");
    collapsed.trim_matches('_').to_string()
}

/// Deterministic 16-char hex request ID derived from the request shape
/// (path + canonical query + canonical body), mirroring the original's
/// `compute_request_id`.
pub fn compute_request_id(path: &str, query_canonical: &str, body_canonical: &str) -> String {
    let raw = format!("{path}?{query_canonical}#{body_canonical}");
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_roundtrip() {
        let anchors = [
            "eng#d-eng-010",
            "hr/payroll#q3-review",
            "panasonic-exit-plasma-2012#panasonic-exit-plasma-2012",
        ];
        for a in anchors {
            let key = anchor_to_storage_key(a).unwrap();
            let back = storage_key_to_anchor(&key).unwrap();
            assert_eq!(&back, a, "round trip failed for {a}");
        }
    }

    #[test]
    fn rejects_malformed_anchor() {
        assert!(parse_anchor("no-hash-here").is_err());
        assert!(parse_anchor("UPPER#id").is_err());
        assert!(parse_anchor("domain#").is_err());
    }

    #[test]
    fn edge_id_is_deterministic() {
        let id = edge_id(EdgeKind::Causal, "eng#d-1", "eng#d-2").unwrap();
        assert_eq!(id, "causal:eng#d-1:eng#d-2");
    }

    #[test]
    fn tag_slug_normalises_case_and_punctuation() {
        assert_eq!(slugify_tag("M-and-A"), "m_and_a");
        assert_eq!(slugify_tag("  Foo  Bar--Baz "), "foo_bar_baz");
    }

    #[test]
    fn id_slug_uses_dashes() {
        assert_eq!(slugify_id("Hello, World!!"), "hello-world");
        assert!(is_slug(&slugify_id("Hello, World!!")));
    }
}
