//! Effective policy derivation (spec §4.2 "Effective policy derivation").

use std::collections::BTreeSet;

use serde::Serialize;

use bv_common::fingerprint;

use crate::headers::PolicyRequest;
use crate::profile::RoleProfile;

const SENSITIVITY_ORDER: [&str; 3] = ["low", "medium", "high"];

fn sensitivity_rank(level: &str) -> usize {
    SENSITIVITY_ORDER
        .iter()
        .position(|s| *s == level)
        .unwrap_or(SENSITIVITY_ORDER.len() - 1)
}

fn intersect_sorted(requested: Option<&[String]>, allowed: &[String]) -> Vec<String> {
    let allowed_set: BTreeSet<&str> = allowed.iter().map(|s| s.as_str()).collect();
    match requested {
        None => {
            let mut out: Vec<String> = allowed.to_vec();
            out.sort();
            out.dedup();
            out
        }
        Some(req) => {
            let mut out: BTreeSet<String> = BTreeSet::new();
            for r in req {
                if allowed_set.contains(r.as_str()) {
                    out.insert(r.clone());
                }
            }
            out.into_iter().collect()
        }
    }
}

/// Canonical basis hashed to produce `policy_fp` (spec §4.2, I4).
#[derive(Debug, Clone, Serialize)]
struct PolicyFpBasis<'a> {
    role: &'a str,
    namespaces: &'a [String],
    scopes: &'a [String],
    edge_allowlist: &'a [String],
    sensitivity: &'a str,
    max_hops: u32,
    policy_version: &'a str,
    extra_visible: &'a [String],
    fv_hash: String,
}

#[derive(Debug, Clone)]
pub struct EffectivePolicy {
    pub role: String,
    pub namespaces: Vec<String>,
    pub domain_scopes: Vec<String>,
    pub edge_allowlist: Vec<String>,
    pub sensitivity_ceiling: String,
    pub max_hops: u32,
    pub extra_visible: Vec<String>,
    pub field_visibility: std::collections::BTreeMap<String, crate::profile::FieldVisibility>,
    pub denied_status: u16,
    pub policy_version: String,
    pub policy_fp: String,

    /// Gateway budget-gate inputs, carried straight from the role profile
    /// (spec §4.10); excluded from `policy_fp`'s basis since they gate the
    /// LLM budget, not ACL/field-visibility outcomes.
    pub max_edges: usize,
    pub max_events: usize,
    pub max_cited_ids: usize,
    pub retries: u32,
}

impl EffectivePolicy {
    /// Intersect header-requested namespaces/scopes/edges with the role
    /// profile, take the minimum sensitivity ceiling, clamp `max_hops` to 1
    /// (spec §4.2: alias-tail expansion never exceeds k=1), then compute
    /// `policy_fp` over the canonical basis.
    pub fn derive(req: &PolicyRequest, profile: &RoleProfile) -> Self {
        let namespaces = intersect_sorted(req.user_namespaces.as_deref(), &profile.namespaces);
        let domain_scopes = intersect_sorted(req.domain_scopes.as_deref(), &profile.domain_scopes);
        let edge_allowlist = intersect_sorted(req.edge_allow.as_deref(), &profile.edge_allowlist);

        let role_rank = sensitivity_rank(&profile.sensitivity_ceiling);
        let header_rank = req
            .sensitivity_ceiling
            .as_deref()
            .map(sensitivity_rank)
            .unwrap_or(role_rank);
        let effective_rank = role_rank.min(header_rank);
        let sensitivity_ceiling = SENSITIVITY_ORDER[effective_rank].to_string();

        let role_max_hops = profile.alias_max_hops.unwrap_or(1);
        let requested_max_hops = req.max_hops.unwrap_or(role_max_hops);
        let max_hops = requested_max_hops.min(role_max_hops).min(1);

        let mut extra_visible = profile.extra_visible.clone();
        extra_visible.sort();
        extra_visible.dedup();

        // Canonical-JSON serialisation of these in-memory types cannot fail;
        // an error here would indicate a serde bug, not bad input.
        let fv_hash = fingerprint(&profile.field_visibility)
            .expect("field_visibility always serialises");

        let basis = PolicyFpBasis {
            role: &req.active_role,
            namespaces: &namespaces,
            scopes: &domain_scopes,
            edge_allowlist: &edge_allowlist,
            sensitivity: &sensitivity_ceiling,
            max_hops,
            policy_version: &req.policy_version,
            extra_visible: &extra_visible,
            fv_hash,
        };
        let policy_fp = fingerprint(&basis).expect("policy fp basis always serialises");

        EffectivePolicy {
            role: req.active_role.clone(),
            namespaces,
            domain_scopes,
            edge_allowlist,
            sensitivity_ceiling,
            max_hops,
            extra_visible,
            field_visibility: profile.field_visibility.clone(),
            denied_status: req.denied_status.unwrap_or(403),
            policy_version: req.policy_version.clone(),
            policy_fp,

            max_edges: profile.max_edges,
            max_events: profile.max_events,
            max_cited_ids: profile.max_cited_ids,
            retries: profile.retries,
        }
    }

    /// True when the client-supplied `X-Policy-Key` no longer matches the
    /// freshly computed `policy_fp`; callers should emit an advisory header
    /// rather than fail the request (spec §4.2 "Errors").
    pub fn key_mismatch(&self, presented_key: &str) -> bool {
        !presented_key.is_empty() && presented_key != self.policy_fp
    }

    pub fn sensitivity_rank(&self) -> usize {
        sensitivity_rank(&self.sensitivity_ceiling)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{PolicyRequest, RawHeaders};
    use crate::profile::RoleProfile;

    fn profile() -> RoleProfile {
        RoleProfile {
            role: "engineer".into(),
            namespaces: vec!["eng".into(), "hr".into()],
            domain_scopes: vec!["eng/*".into()],
            edge_allowlist: vec!["LED_TO".into(), "CAUSAL".into()],
            sensitivity_ceiling: "high".into(),
            alias_max_hops: Some(1),
            extra_visible: vec!["migration".into()],
            field_visibility: Default::default(),
            max_edges: 50,
            max_events: 20,
            max_cited_ids: 12,
            retries: 2,
        }
    }

    fn request_headers() -> RawHeaders {
        RawHeaders::from_pairs([
            ("x-user-id", "u-1"),
            ("x-user-roles", "engineer"),
            ("x-policy-version", "v1"),
            ("x-policy-key", ""),
            ("x-request-id", "r-1"),
            ("x-trace-id", "t-1"),
        ])
    }

    #[test]
    fn narrows_namespaces_to_the_intersection() {
        let headers = RawHeaders::from_pairs([
            ("x-user-id", "u-1"),
            ("x-user-roles", "engineer"),
            ("x-policy-version", "v1"),
            ("x-policy-key", ""),
            ("x-request-id", "r-1"),
            ("x-trace-id", "t-1"),
            ("x-user-namespaces", "eng,finance"),
        ]);
        let req = PolicyRequest::parse(&headers).unwrap();
        let eff = EffectivePolicy::derive(&req, &profile());
        assert_eq!(eff.namespaces, vec!["eng".to_string()]);
    }

    #[test]
    fn sensitivity_ceiling_is_the_minimum_of_header_and_role() {
        let headers = RawHeaders::from_pairs([
            ("x-user-id", "u-1"),
            ("x-user-roles", "engineer"),
            ("x-policy-version", "v1"),
            ("x-policy-key", ""),
            ("x-request-id", "r-1"),
            ("x-trace-id", "t-1"),
            ("x-sensitivity-ceiling", "low"),
        ]);
        let req = PolicyRequest::parse(&headers).unwrap();
        let eff = EffectivePolicy::derive(&req, &profile());
        assert_eq!(eff.sensitivity_ceiling, "low");
    }

    #[test]
    fn max_hops_is_always_clamped_to_one() {
        let headers = RawHeaders::from_pairs([
            ("x-user-id", "u-1"),
            ("x-user-roles", "engineer"),
            ("x-policy-version", "v1"),
            ("x-policy-key", ""),
            ("x-request-id", "r-1"),
            ("x-trace-id", "t-1"),
            ("x-max-hops", "5"),
        ]);
        let req = PolicyRequest::parse(&headers).unwrap();
        let eff = EffectivePolicy::derive(&req, &profile());
        assert_eq!(eff.max_hops, 1);
    }

    #[test]
    fn policy_fp_is_deterministic_for_identical_input() {
        let req = PolicyRequest::parse(&request_headers()).unwrap();
        let a = EffectivePolicy::derive(&req, &profile());
        let b = EffectivePolicy::derive(&req, &profile());
        assert_eq!(a.policy_fp, b.policy_fp);
        assert!(a.policy_fp.starts_with("sha256:"));
    }

    #[test]
    fn key_mismatch_flags_stale_client_key() {
        let req = PolicyRequest::parse(&request_headers()).unwrap();
        let eff = EffectivePolicy::derive(&req, &profile());
        assert!(eff.key_mismatch("sha256:stale"));
        assert!(!eff.key_mismatch(&eff.policy_fp));
        assert!(!eff.key_mismatch(""));
    }
}
