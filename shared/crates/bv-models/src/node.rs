//! Node/edge data model (spec §3).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use bv_common::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeKind {
    Decision,
    Event,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
}

impl Sensitivity {
    pub fn as_str(self) -> &'static str {
        match self {
            Sensitivity::Low => "low",
            Sensitivity::Medium => "medium",
            Sensitivity::High => "high",
        }
    }
}

/// A stored graph node. `x_extra` carries arbitrary additional fields
/// preserved verbatim from ingest (spec §4.14) and is governed separately
/// by the policy's `extra_visible` allowlist (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Wire anchor `<domain>#<id>`.
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    pub domain: String,
    pub title: String,
    pub description: String,
    pub timestamp: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(rename = "x-extra", default)]
    pub x_extra: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_maker: Option<String>,

    pub sensitivity: Sensitivity,
    #[serde(default)]
    pub namespaces: Vec<String>,
    #[serde(default)]
    pub roles_allowed: Vec<String>,

    /// Optional dense embedding used by `resolve_text`'s vector-cosine tier
    /// (spec §4.3 "vector cosine when enabled and vector provided";
    /// §6 `ENABLE_EMBEDDINGS`). Absent for fixtures that never ran through
    /// an embeddings backfill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,

    /// Snapshot ETag this node was stamped with at ingest time (spec §3
    /// ownership & lifecycle). Not part of the wire contract; stripped
    /// before masking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_etag: Option<String>,
}

impl Node {
    pub fn storage_key(&self) -> Result<String, bv_common::BvError> {
        bv_common::ids::anchor_to_storage_key(&self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeType {
    LedTo,
    Causal,
    AliasOf,
}

impl EdgeType {
    pub fn as_str(self) -> &'static str {
        match self {
            EdgeType::LedTo => "LED_TO",
            EdgeType::Causal => "CAUSAL",
            EdgeType::AliasOf => "ALIAS_OF",
        }
    }

    pub fn is_causal_kind(self) -> bool {
        matches!(self, EdgeType::LedTo | EdgeType::Causal)
    }
}

/// A stored/wire edge (spec §3). `domain` is only meaningful for
/// `ALIAS_OF` edges, where it surfaces the aliased event's domain (I3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    #[serde(rename = "type")]
    pub kind: EdgeType,
    pub from: String,
    pub to: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl Edge {
    pub fn id(&self) -> Result<String, bv_common::BvError> {
        let kind = match self.kind {
            EdgeType::LedTo => bv_common::ids::EdgeKind::LedTo,
            EdgeType::Causal => bv_common::ids::EdgeKind::Causal,
            EdgeType::AliasOf => bv_common::ids::EdgeKind::AliasOf,
        };
        bv_common::ids::edge_id(kind, &self.from, &self.to)
    }
}

/// JSON-first masked node as returned by Memory endpoints: always carries
/// `id`/`type`, plus whatever fields the policy's field mask let through.
pub type MaskedNode = BTreeMap<String, Value>;
