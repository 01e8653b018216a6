//! Artifact bundle assembly (spec §6 "Artifact bundle"). Builds the fixed
//! set of per-request JSON artifacts plus a manifest naming each one's
//! SHA-256, byte length and content type — exactly this set, no extras,
//! so the validator's manifest-integrity check always has something
//! authoritative to compare against.

use serde::Serialize;
use serde_json::Value as JsonValue;

use bv_common::canonical::sha256_hex;
use bv_models::evidence::WhyDecisionEvidence;
use bv_models::response::WhyDecisionResponse;

use crate::validator::{BundleManifest, ManifestEntry, ValidatorReport};

const CONTENT_TYPE_JSON: &str = "application/json";

pub struct BundleInputs<'a> {
    pub envelope: &'a JsonValue,
    pub evidence_pre: &'a WhyDecisionEvidence,
    pub evidence_post: &'a WhyDecisionEvidence,
    pub response: &'a WhyDecisionResponse,
    pub llm_raw: Option<&'a str>,
    pub validator_report: &'a ValidatorReport,
    pub receipt: Option<&'a JsonValue>,
}

pub struct Bundle {
    pub artifacts: Vec<(String, Vec<u8>)>,
    pub manifest: BundleManifest,
}

fn artifact_json<T: Serialize>(name: &str, value: &T) -> (String, Vec<u8>) {
    let bytes = serde_json::to_vec(value).expect("artifact value always serialises");
    (name.to_string(), bytes)
}

/// Builds every artifact plus the manifest entry describing it. `llm_raw`
/// is written even when absent (an empty string) so the artifact set
/// never varies between a fallback-answered and an LLM-answered request.
pub fn build(inputs: &BundleInputs) -> Bundle {
    let mut artifacts = vec![
        artifact_json("envelope.json", inputs.envelope),
        artifact_json("evidence_pre.json", inputs.evidence_pre),
        artifact_json("evidence_post.json", inputs.evidence_post),
        artifact_json("response.json", inputs.response),
        (
            "llm_raw.json".to_string(),
            serde_json::to_vec(&serde_json::json!({ "raw": inputs.llm_raw.unwrap_or("") }))
                .expect("llm_raw artifact always serialises"),
        ),
        artifact_json("validator_report.json", inputs.validator_report),
    ];

    let manifest_entries: Vec<ManifestEntry> = artifacts
        .iter()
        .map(|(name, bytes)| ManifestEntry {
            name: name.clone(),
            sha256: sha256_hex(bytes),
            bytes: bytes.len() as u64,
            content_type: CONTENT_TYPE_JSON.to_string(),
        })
        .collect();
    let manifest = BundleManifest {
        artifacts: manifest_entries,
    };
    artifacts.push(artifact_json("bundle.manifest.json", &manifest));

    if let Some(receipt) = inputs.receipt {
        artifacts.push(artifact_json("receipt.json", receipt));
    }

    Bundle { artifacts, manifest }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_models::evidence::{CompletenessFlags, WhyDecisionAnchor, WhyDecisionAnswer};
    use bv_models::meta::MetaInfo;

    #[test]
    fn manifest_lists_every_fixed_artifact_exactly_once() {
        let evidence = WhyDecisionEvidence {
            anchor: WhyDecisionAnchor {
                id: "eng#d-1".into(),
                ..Default::default()
            },
            ..Default::default()
        };
        let response = WhyDecisionResponse {
            intent: "why_decision".into(),
            evidence: evidence.clone(),
            answer: WhyDecisionAnswer::default(),
            completeness_flags: CompletenessFlags::default(),
            bundle_url: None,
            meta: MetaInfo::default(),
        };
        let report = crate::validator::ValidatorReport {
            version: "v1".into(),
            pass: true,
            errors: vec![],
            checks: vec![],
        };
        let envelope = serde_json::json!({});
        let bundle = build(&BundleInputs {
            envelope: &envelope,
            evidence_pre: &evidence,
            evidence_post: &evidence,
            response: &response,
            llm_raw: None,
            validator_report: &report,
            receipt: None,
        });
        assert_eq!(bundle.manifest.artifacts.len(), 6);
        assert!(bundle.artifacts.iter().any(|(n, _)| n == "bundle.manifest.json"));
    }
}
