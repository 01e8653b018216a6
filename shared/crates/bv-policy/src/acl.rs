//! `acl_check(node, policy) -> (allowed, reason)` (spec §4.2). Fail-closed:
//! any ambiguity resolves to denial, never to allow.

use bv_common::error::AclReason;
use bv_models::node::{Node, Sensitivity};

use crate::effective::EffectivePolicy;

fn sensitivity_rank(level: Sensitivity) -> usize {
    match level {
        Sensitivity::Low => 0,
        Sensitivity::Medium => 1,
        Sensitivity::High => 2,
    }
}

/// Evaluate `node` against `policy`. Returns `Ok(())` when allowed, or the
/// first failing reason in a fixed precedence order: invalid shape, role,
/// namespace, sensitivity, domain scope.
pub fn acl_check(node: &Node, policy: &EffectivePolicy) -> Result<(), AclReason> {
    if node.id.is_empty() || node.domain.is_empty() {
        return Err(AclReason::InvalidNode);
    }
    if policy.role.is_empty() {
        return Err(AclReason::RoleMissing);
    }
    if !node.namespaces.is_empty()
        && !node
            .namespaces
            .iter()
            .any(|ns| policy.namespaces.iter().any(|pn| pn == ns))
    {
        return Err(AclReason::NamespaceMismatch);
    }
    if sensitivity_rank(node.sensitivity) > policy.sensitivity_rank() {
        return Err(AclReason::SensitivityExceeded);
    }
    if !policy.domain_scopes.is_empty() {
        let in_scope = policy.domain_scopes.iter().any(|scope| {
            scope
                .strip_suffix("/*")
                .map(|prefix| node.domain == prefix || node.domain.starts_with(&format!("{prefix}/")))
                .unwrap_or(node.domain == *scope)
        });
        if !in_scope {
            return Err(AclReason::DomainOutOfScope);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_models::node::NodeKind;

    fn policy() -> EffectivePolicy {
        EffectivePolicy {
            role: "engineer".into(),
            namespaces: vec!["eng".into()],
            domain_scopes: vec!["eng/*".into()],
            edge_allowlist: vec![],
            sensitivity_ceiling: "medium".into(),
            max_hops: 1,
            extra_visible: vec![],
            field_visibility: Default::default(),
            denied_status: 403,
            policy_version: "v1".into(),
            policy_fp: "sha256:dummy".into(),
        }
    }

    fn node() -> Node {
        Node {
            id: "eng#d-1".into(),
            kind: NodeKind::Decision,
            domain: "eng".into(),
            title: "t".into(),
            description: "d".into(),
            timestamp: "2026-01-01T00:00:00Z".into(),
            tags: vec![],
            x_extra: Default::default(),
            decision_maker: None,
            sensitivity: Sensitivity::Low,
            namespaces: vec!["eng".into()],
            roles_allowed: vec![],
            embedding: None,
            snapshot_etag: None,
        }
    }

    #[test]
    fn allows_matching_node() {
        assert!(acl_check(&node(), &policy()).is_ok());
    }

    #[test]
    fn denies_namespace_mismatch() {
        let mut n = node();
        n.namespaces = vec!["hr".into()];
        assert_eq!(acl_check(&n, &policy()).unwrap_err(), AclReason::NamespaceMismatch);
    }

    #[test]
    fn denies_sensitivity_above_ceiling() {
        let mut n = node();
        n.sensitivity = Sensitivity::High;
        assert_eq!(acl_check(&n, &policy()).unwrap_err(), AclReason::SensitivityExceeded);
    }

    #[test]
    fn denies_domain_out_of_scope() {
        let mut n = node();
        n.domain = "hr".into();
        n.namespaces = vec![];
        assert_eq!(acl_check(&n, &policy()).unwrap_err(), AclReason::DomainOutOfScope);
    }

    #[test]
    fn denies_invalid_node_shape() {
        let mut n = node();
        n.id = String::new();
        assert_eq!(acl_check(&n, &policy()).unwrap_err(), AclReason::InvalidNode);
    }
}
