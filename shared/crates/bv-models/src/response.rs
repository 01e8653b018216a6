//! `/v2/ask` response envelope (spec §4.13).

use serde::{Deserialize, Serialize};

use crate::evidence::{CompletenessFlags, WhyDecisionAnswer, WhyDecisionEvidence};
use crate::meta::MetaInfo;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhyDecisionResponse {
    pub intent: String,
    pub evidence: WhyDecisionEvidence,
    pub answer: WhyDecisionAnswer,
    pub completeness_flags: CompletenessFlags,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_url: Option<String>,
    pub meta: MetaInfo,
}

impl WhyDecisionResponse {
    /// Construct from the assembled pieces, applying the two legacy-field
    /// mirrors (`option`→`title`, `cited_ids`↔`supporting_ids`) and
    /// recomputing `completeness_flags` from the final evidence so they can
    /// never drift from what was actually returned.
    pub fn assemble(
        intent: String,
        mut evidence: WhyDecisionEvidence,
        mut answer: WhyDecisionAnswer,
        bundle_url: Option<String>,
        meta: MetaInfo,
    ) -> Self {
        evidence.anchor.mirror_option_to_title();
        evidence.transitions.normalise();
        answer.mirror_legacy_supporting_ids();
        let completeness_flags = CompletenessFlags::from_evidence(&evidence);
        WhyDecisionResponse {
            intent,
            evidence,
            answer,
            completeness_flags,
            bundle_url,
            meta,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::WhyDecisionAnchor;

    #[test]
    fn assemble_fills_completeness_flags_from_evidence() {
        let evidence = WhyDecisionEvidence {
            anchor: WhyDecisionAnchor {
                id: "domain#d1".into(),
                ..Default::default()
            },
            events: vec![serde_json::json!({"id": "domain#e1"})],
            ..Default::default()
        };
        let answer = WhyDecisionAnswer {
            short_answer: "because reasons".into(),
            cited_ids: vec!["domain#d1".into()],
            ..Default::default()
        };
        let meta = MetaInfo::default();
        let resp = WhyDecisionResponse::assemble("why_decision".into(), evidence, answer, None, meta);
        assert_eq!(resp.completeness_flags.event_count, 1);
        assert!(!resp.completeness_flags.has_preceding);
        assert_eq!(resp.answer.supporting_ids, vec!["domain#d1".to_string()]);
    }
}
