//! Evidence bundle and response envelope (spec §3).

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Anchor decision as carried inside the evidence bundle. Keeps the
/// original's legacy `option` alias, mirrored into `title` when `title` is
/// absent (spec §3 "wire-compatible extras from the original").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WhyDecisionAnchor {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Legacy alias for `title`; accepted on input, never emitted.
    #[serde(skip_serializing, default)]
    pub option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_maker: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub supported_by: Vec<String>,
    #[serde(default)]
    pub based_on: Vec<String>,
    #[serde(default)]
    pub transitions: Vec<JsonValue>,
}

impl WhyDecisionAnchor {
    /// Apply the legacy `option` → `title` mirror (no-op once `title` is set).
    pub fn mirror_option_to_title(&mut self) {
        if self.title.is_none() {
            if let Some(opt) = self.option.clone() {
                self.title = Some(opt);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WhyDecisionTransitions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preceding: Option<Vec<JsonValue>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub succeeding: Option<Vec<JsonValue>>,
}

impl WhyDecisionTransitions {
    pub fn preceding_slice(&self) -> &[JsonValue] {
        self.preceding.as_deref().unwrap_or(&[])
    }

    pub fn succeeding_slice(&self) -> &[JsonValue] {
        self.succeeding.as_deref().unwrap_or(&[])
    }

    /// Collapse empty lists to `None` so they are omitted from the wire
    /// representation, matching the original's `exclude_none` behaviour.
    pub fn normalise(&mut self) {
        if matches!(&self.preceding, Some(v) if v.is_empty()) {
            self.preceding = None;
        }
        if matches!(&self.succeeding, Some(v) if v.is_empty()) {
            self.succeeding = None;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WhyDecisionEvidence {
    pub anchor: WhyDecisionAnchor,
    #[serde(default)]
    pub events: Vec<JsonValue>,
    #[serde(default)]
    pub transitions: WhyDecisionTransitions,
    #[serde(default)]
    pub allowed_ids: Vec<String>,

    /// Out-of-band: used for cache-key generation and freshness checks,
    /// never serialised on the wire (I4: `bundle_fp` excludes it).
    #[serde(skip)]
    pub snapshot_etag: Option<String>,
}

impl WhyDecisionEvidence {
    /// A copy with `snapshot_etag` blanked, used for `bundle_fp` (I4) since
    /// `snapshot_etag` is `#[serde(skip)]` already and thus already absent
    /// from `canonical_json`; kept as an explicit, self-documenting step.
    pub fn without_snapshot_etag(&self) -> WhyDecisionEvidence {
        let mut clone = self.clone();
        clone.snapshot_etag = None;
        clone
    }

    fn event_id(v: &JsonValue) -> Option<&str> {
        v.get("id").and_then(|x| x.as_str())
    }

    /// Canonical `allowed_ids` derivation (spec §4.8, invariant I1):
    /// sorted, deduplicated union of anchor id, event ids and transition ids.
    pub fn derive_allowed_ids(&self) -> Vec<String> {
        let mut ids: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
        ids.insert(self.anchor.id.clone());
        for e in &self.events {
            if let Some(id) = Self::event_id(e) {
                ids.insert(id.to_string());
            }
        }
        for t in self
            .transitions
            .preceding_slice()
            .iter()
            .chain(self.transitions.succeeding_slice().iter())
        {
            if let Some(id) = Self::event_id(t) {
                ids.insert(id.to_string());
            }
        }
        ids.into_iter().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WhyDecisionAnswer {
    pub short_answer: String,
    #[serde(default)]
    pub cited_ids: Vec<String>,
    /// Legacy field mirrored in lock-step with `cited_ids`, never emitted.
    #[serde(skip_serializing, default)]
    pub supporting_ids: Vec<String>,
}

impl WhyDecisionAnswer {
    pub fn mirror_legacy_supporting_ids(&mut self) {
        if self.cited_ids.is_empty() && !self.supporting_ids.is_empty() {
            self.cited_ids = self.supporting_ids.clone();
        }
        if !self.cited_ids.is_empty() {
            self.supporting_ids = self.cited_ids.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompletenessFlags {
    pub has_preceding: bool,
    pub has_succeeding: bool,
    pub event_count: usize,
}

impl CompletenessFlags {
    pub fn from_evidence(ev: &WhyDecisionEvidence) -> Self {
        CompletenessFlags {
            has_preceding: !ev.transitions.preceding_slice().is_empty(),
            has_succeeding: !ev.transitions.succeeding_slice().is_empty(),
            event_count: ev.events.len(),
        }
    }
}
