//! Wire/data-model types shared by Memory, Gateway and Ingest (spec §3,
//! §4.13).

pub mod evidence;
pub mod meta;
pub mod node;
pub mod response;

pub use evidence::{
    CompletenessFlags, WhyDecisionAnchor, WhyDecisionAnswer, WhyDecisionEvidence,
    WhyDecisionTransitions,
};
pub use meta::{EvidenceMetrics, MetaInfo};
pub use node::{Edge, EdgeType, MaskedNode, Node, NodeKind, Sensitivity};
pub use response::WhyDecisionResponse;
