//! `PolicyBackend` trait: the default role-profile engine, plus an optional
//! OPA-backed implementation behind the `opa` feature (spec §4.2, grounded
//! in `core_policy_opa/adapter.py`'s `opa_decide_if_enabled`).

use bv_common::error::{AclReason, BvError};
use bv_models::node::Node;

use crate::acl::acl_check;
use crate::effective::EffectivePolicy;
use crate::mask::{field_mask_with_summary, MaskSummary};
use bv_models::node::MaskedNode;

pub trait PolicyBackend: Send + Sync {
    fn check_and_mask(
        &self,
        node: &Node,
        policy: &EffectivePolicy,
    ) -> Result<(MaskedNode, MaskSummary), AclReason>;
}

/// Default backend: pure in-process ACL + field mask derived from the
/// loaded role profile, no network call.
pub struct RoleProfileBackend;

impl PolicyBackend for RoleProfileBackend {
    fn check_and_mask(
        &self,
        node: &Node,
        policy: &EffectivePolicy,
    ) -> Result<(MaskedNode, MaskSummary), AclReason> {
        acl_check(node, policy)?;
        Ok(field_mask_with_summary(
            node,
            &policy.field_visibility,
            &policy.extra_visible,
        ))
    }
}

/// Placeholder for an OPA-backed decision engine, activated when `OPA_URL`
/// is configured. Network calls happen in the `opa` feature's async client;
/// this struct only documents the seam (see SPEC_FULL.md §4.2) so callers
/// can swap backends without branching on feature flags at every call site.
#[cfg(feature = "opa")]
pub struct OpaBackend {
    pub opa_url: String,
}

#[cfg(feature = "opa")]
impl PolicyBackend for OpaBackend {
    fn check_and_mask(
        &self,
        _node: &Node,
        _policy: &EffectivePolicy,
    ) -> Result<(MaskedNode, MaskSummary), AclReason> {
        // The real implementation calls out to OPA's `/v1/data/batvault/decision`
        // endpoint (mirroring `opa_decide_if_enabled`) and falls back to
        // `RoleProfileBackend` on transport failure. Network I/O is async-only,
        // so the actual call happens in memory-api's request handler; this
        // synchronous trait method only exists to keep the two backends
        // interchangeable in code that doesn't need the async path.
        Err(AclReason::InvalidNode)
    }
}

pub fn default_backend() -> impl PolicyBackend {
    RoleProfileBackend
}

/// Wrap a denial reason into the configurable-status error the HTTP layer
/// expects (`X-Denied-Status`, default 403 — spec §4.2 "Errors").
pub fn acl_denied(reason: AclReason, policy: &EffectivePolicy) -> BvError {
    BvError::AclDenied {
        reason,
        status: policy.denied_status,
    }
}
