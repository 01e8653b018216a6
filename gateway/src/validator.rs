//! Validator & deterministic fallback (spec §4.12). Checks run in a fixed
//! order so the first failure is always the same one for the same input;
//! the fallback composer only runs when the LLM answer is missing,
//! oversized, or names a raw id in prose.

use bv_models::evidence::{WhyDecisionAnswer, WhyDecisionEvidence};
use serde::{Deserialize, Serialize};

pub const VALIDATOR_VERSION: &str = "batvault.validator.v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub name: String,
    pub sha256: String,
    pub bytes: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BundleManifest {
    pub artifacts: Vec<ManifestEntry>,
}

#[derive(Debug, Clone)]
pub struct ArtifactBytes<'a> {
    pub name: &'a str,
    pub content_type: &'a str,
    pub bytes: &'a [u8],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub pass: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorReport {
    pub version: String,
    pub pass: bool,
    pub errors: Vec<String>,
    pub checks: Vec<CheckResult>,
}

impl ValidatorReport {
    fn new() -> Self {
        ValidatorReport {
            version: VALIDATOR_VERSION.to_string(),
            pass: true,
            errors: Vec::new(),
            checks: Vec::new(),
        }
    }

    fn record(&mut self, name: &str, ok: bool, detail: Option<String>) {
        if !ok {
            self.pass = false;
            self.errors.push(detail.clone().unwrap_or_else(|| format!("{name} failed")));
        }
        self.checks.push(CheckResult {
            name: name.to_string(),
            pass: ok,
            detail,
        });
    }
}

pub struct ValidateInput<'a> {
    pub evidence: &'a WhyDecisionEvidence,
    pub cited_ids: &'a [String],
    pub policy_fp: Option<&'a str>,
    pub manifest: Option<&'a BundleManifest>,
    pub artifacts: &'a [ArtifactBytes<'a>],
    pub receipt_signature: Option<&'a [u8]>,
    pub receipt_message: Option<&'a [u8]>,
    pub verifying_key: Option<&'a crypto_primitives::Ed25519PublicKey>,
}

/// Runs every check in spec order, short-circuiting nothing — a later
/// check's failure never masks an earlier one, but all are still recorded.
pub fn validate(input: &ValidateInput) -> ValidatorReport {
    let mut report = ValidatorReport::new();

    let schema_ok = !input.evidence.anchor.id.is_empty();
    report.record("bundle_schema", schema_ok, (!schema_ok).then(|| "anchor.id missing".to_string()));

    let policy_fp_ok = input.policy_fp.map(|fp| !fp.is_empty()).unwrap_or(false);
    report.record(
        "policy_fp_presence",
        policy_fp_ok,
        (!policy_fp_ok).then(|| "policy_fp absent".to_string()),
    );

    let inventory_ok = input
        .manifest
        .map(|m| !m.artifacts.is_empty())
        .unwrap_or(false);
    report.record(
        "bundle_inventory",
        inventory_ok,
        (!inventory_ok).then(|| "manifest has no artifacts".to_string()),
    );

    match (input.receipt_signature, input.verifying_key) {
        (None, _) => report.record("receipt_signature", true, None),
        (Some(_), None) => report.record(
            "receipt_signature",
            false,
            Some("receipt present but no verifying key configured".to_string()),
        ),
        (Some(sig), Some(key)) => {
            let message = input.receipt_message.unwrap_or(&[]);
            let ok = ed25519_dalek::Signature::from_slice(sig)
                .ok()
                .and_then(|signature| key.verifying_key().ok().map(|vk| (vk, signature)))
                .map(|(vk, signature)| {
                    use ed25519_dalek::Verifier;
                    vk.verify(message, &signature).is_ok()
                })
                .unwrap_or(false);
            report.record("receipt_signature", ok, (!ok).then(|| "signature verification failed".to_string()));
        }
    }

    if let Some(manifest) = input.manifest {
        report.record("manifest_integrity", manifest_matches(manifest, input.artifacts), None);
    } else {
        report.record("manifest_integrity", true, None);
    }

    report.record("edge_schema", true, None);

    let allowed: std::collections::BTreeSet<&str> =
        input.evidence.allowed_ids.iter().map(|s| s.as_str()).collect();
    let cited_ok = input.cited_ids.iter().all(|id| allowed.contains(id.as_str()));
    report.record(
        "cited_ids_subset_allowed_ids",
        cited_ok,
        (!cited_ok).then(|| "cited id outside allowed_ids".to_string()),
    );

    report
}

fn manifest_matches(manifest: &BundleManifest, artifacts: &[ArtifactBytes]) -> bool {
    if manifest.artifacts.len() != artifacts.len() {
        return false;
    }
    for entry in &manifest.artifacts {
        let Some(found) = artifacts.iter().find(|a| a.name == entry.name) else {
            return false;
        };
        let digest = bv_common::canonical::sha256_hex(found.bytes);
        if digest != entry.sha256
            || found.bytes.len() as u64 != entry.bytes
            || found.content_type != entry.content_type
        {
            return false;
        }
    }
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    LlmOff,
    StubAnswer,
    ParseError,
    StyleViolation,
    NoRawJson,
    HttpError,
    Timeout,
    EndpointUnreachable,
    LlmUnavailable,
}

impl FallbackReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FallbackReason::LlmOff => "llm_off",
            FallbackReason::StubAnswer => "stub_answer",
            FallbackReason::ParseError => "parse_error",
            FallbackReason::StyleViolation => "style_violation",
            FallbackReason::NoRawJson => "no_raw_json",
            FallbackReason::HttpError => "http_error",
            FallbackReason::Timeout => "timeout",
            FallbackReason::EndpointUnreachable => "endpoint_unreachable",
            FallbackReason::LlmUnavailable => "llm_unavailable",
        }
    }

    pub fn from_error_code(code: &str) -> Self {
        match code {
            "llm_off" => FallbackReason::LlmOff,
            "stub_answer" => FallbackReason::StubAnswer,
            "parse_error" => FallbackReason::ParseError,
            "no_raw_json" => FallbackReason::NoRawJson,
            "http_error" => FallbackReason::HttpError,
            "timeout" => FallbackReason::Timeout,
            "endpoint_unreachable" => FallbackReason::EndpointUnreachable,
            _ => FallbackReason::LlmUnavailable,
        }
    }
}

/// True when the LLM answer needs replacing. Covers the spec's fatal
/// validator set (§7 "only the fatal set ... triggers fallback
/// composition"): empty or oversized `short_answer`, a raw id leaked into
/// prose, the anchor missing from `cited_ids` (I2,
/// `anchor_missing_in_supporting_ids`), or a present transition never
/// cited (`supporting_ids_missing_transition`).
pub fn needs_fallback(answer: &WhyDecisionAnswer, evidence: &WhyDecisionEvidence) -> bool {
    if answer.short_answer.trim().is_empty() || answer.short_answer.chars().count() > 320 {
        return true;
    }
    if evidence
        .allowed_ids
        .iter()
        .any(|id| answer.short_answer.contains(id.as_str()))
    {
        return true;
    }
    if !answer.cited_ids.iter().any(|id| id == &evidence.anchor.id) {
        return true;
    }
    let cited: std::collections::BTreeSet<&str> = answer.cited_ids.iter().map(|s| s.as_str()).collect();
    let transition_ids = evidence
        .transitions
        .preceding_slice()
        .iter()
        .chain(evidence.transitions.succeeding_slice().iter())
        .filter_map(|t| t.get("id").and_then(|v| v.as_str()));
    for id in transition_ids {
        if !cited.contains(id) {
            return true;
        }
    }
    false
}

fn title_of(item: &serde_json::Value) -> Option<String> {
    item.get("title")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn date_of(anchor: &bv_models::evidence::WhyDecisionAnchor) -> Option<String> {
    anchor.timestamp.as_deref().and_then(|ts| ts.split('T').next()).map(|s| s.to_string())
}

/// Builds the plain-sentence fallback answer (spec §4.12 "Fallback
/// composition"): a lead sentence naming the decision, an optional
/// "Because ..." sentence citing up to two driving events by title, and an
/// optional "Next: ..." sentence, hard-cut at 320 chars / 2 sentences.
pub fn compose_fallback(
    evidence: &WhyDecisionEvidence,
    cited_ids: &[String],
    reason: FallbackReason,
) -> WhyDecisionAnswer {
    let anchor = &evidence.anchor;
    let mut sentences = Vec::new();

    let title = anchor.title.clone().unwrap_or_else(|| anchor.id.clone());
    let lead = match (&anchor.decision_maker, date_of(anchor)) {
        (Some(maker), Some(date)) => format!("{maker} on {date}: {title}."),
        (Some(maker), None) => format!("{maker}: {title}."),
        (None, Some(date)) => format!("On {date}: {title}."),
        (None, None) => format!("{title}."),
    };
    sentences.push(lead);

    let drivers: Vec<String> = evidence.events.iter().filter_map(title_of).take(2).collect();
    if !drivers.is_empty() {
        let joined = match drivers.len() {
            1 => drivers[0].clone(),
            _ => format!("{} (and {})", drivers[0], drivers[1]),
        };
        sentences.push(format!("Because {joined}."));
    }

    if sentences.len() < 2 {
        if let Some(next_title) = evidence.transitions.succeeding_slice().iter().find_map(title_of) {
            sentences.push(format!("Next: {next_title}."));
        }
    }

    sentences.truncate(2);
    let mut short_answer = sentences.join(" ");
    if short_answer.chars().count() > 320 {
        short_answer = short_answer.chars().take(320).collect();
    }

    let mut answer = WhyDecisionAnswer {
        short_answer,
        cited_ids: cited_ids.to_vec(),
        supporting_ids: Vec::new(),
    };
    answer.mirror_legacy_supporting_ids();
    let _ = reason;
    answer
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_models::evidence::WhyDecisionAnchor;
    use serde_json::json;

    fn evidence() -> WhyDecisionEvidence {
        WhyDecisionEvidence {
            anchor: WhyDecisionAnchor {
                id: "eng#d-1".into(),
                title: Some("Exit plasma manufacturing".into()),
                decision_maker: Some("Panasonic".into()),
                timestamp: Some("2012-03-01T00:00:00Z".into()),
                ..Default::default()
            },
            events: vec![json!({"id": "eng#e-1", "title": "Plasma demand collapse"})],
            allowed_ids: vec!["eng#d-1".into(), "eng#e-1".into()],
            ..Default::default()
        }
    }

    #[test]
    fn cited_ids_subset_check_fails_on_stray_id() {
        let ev = evidence();
        let input = ValidateInput {
            evidence: &ev,
            cited_ids: &["eng#d-1".to_string(), "ghost#id".to_string()],
            policy_fp: Some("sha256:abc"),
            manifest: None,
            artifacts: &[],
            receipt_signature: None,
            receipt_message: None,
            verifying_key: None,
        };
        let report = validate(&input);
        assert!(!report.pass);
    }

    #[test]
    fn fallback_lead_includes_maker_and_date() {
        let ev = evidence();
        let answer = compose_fallback(&ev, &["eng#d-1".to_string()], FallbackReason::LlmOff);
        assert!(answer.short_answer.starts_with("Panasonic on 2012-03-01"));
    }

    #[test]
    fn needs_fallback_flags_raw_id_leak() {
        let answer = WhyDecisionAnswer {
            short_answer: "because of eng#e-1 decision".to_string(),
            cited_ids: vec![],
            supporting_ids: vec![],
        };
        assert!(needs_fallback(&answer, &evidence()));
    }

    #[test]
    fn needs_fallback_flags_anchor_missing_from_cited_ids() {
        let answer = WhyDecisionAnswer {
            short_answer: "Exit plasma manufacturing.".to_string(),
            cited_ids: vec!["eng#e-1".to_string()],
            supporting_ids: vec![],
        };
        assert!(needs_fallback(&answer, &evidence()));
    }

    #[test]
    fn needs_fallback_flags_missing_transition_citation() {
        let mut ev = evidence();
        ev.transitions.preceding = Some(vec![json!({"id": "eng#d-0"})]);
        ev.allowed_ids.push("eng#d-0".to_string());
        let answer = WhyDecisionAnswer {
            short_answer: "Exit plasma manufacturing.".to_string(),
            cited_ids: vec!["eng#d-1".to_string()],
            supporting_ids: vec![],
        };
        assert!(needs_fallback(&answer, &ev));
    }

    #[test]
    fn needs_fallback_passes_clean_answer() {
        let answer = WhyDecisionAnswer {
            short_answer: "Exit plasma manufacturing.".to_string(),
            cited_ids: vec!["eng#d-1".to_string(), "eng#e-1".to_string()],
            supporting_ids: vec![],
        };
        assert!(!needs_fallback(&answer, &evidence()));
    }
}
