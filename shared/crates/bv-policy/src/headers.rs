//! Canonical policy header parsing (spec §4.2, §6). Header lookups are
//! case-insensitive on input; `CanonicalHeaders` exposes the canonical
//! casing used when mirroring headers back on responses.

use std::collections::BTreeMap;

use bv_common::error::BvError;

pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_ROLES: &str = "x-user-roles";
pub const X_POLICY_VERSION: &str = "x-policy-version";
pub const X_POLICY_KEY: &str = "x-policy-key";
pub const X_REQUEST_ID: &str = "x-request-id";
pub const X_TRACE_ID: &str = "x-trace-id";
pub const X_USER_NAMESPACES: &str = "x-user-namespaces";
pub const X_DOMAIN_SCOPES: &str = "x-domain-scopes";
pub const X_EDGE_ALLOW: &str = "x-edge-allow";
pub const X_MAX_HOPS: &str = "x-max-hops";
pub const X_SENSITIVITY_CEILING: &str = "x-sensitivity-ceiling";
pub const X_DENIED_STATUS: &str = "x-denied-status";
pub const X_SNAPSHOT_ETAG: &str = "x-snapshot-etag";

/// Response-side mirrors (spec §4.2, canonical header casing on output).
pub const OUT_SNAPSHOT_ETAG: &str = "x-snapshot-etag";
pub const OUT_POLICY_FP: &str = "X-BV-Policy-Fingerprint";
pub const OUT_ALLOWED_IDS_FP: &str = "X-BV-Allowed-Ids-FP";
pub const OUT_GRAPH_FP: &str = "X-BV-Graph-FP";
pub const OUT_SCHEMA_FP: &str = "X-BV-Schema-FP";
pub const OUT_POLICY_ADVICE: &str = "X-BV-Policy-Advice";

/// Raw request headers as an inbound client presented them, normalised to
/// lower-case keys so lookups are case-insensitive regardless of what the
/// HTTP layer handed us.
#[derive(Debug, Clone, Default)]
pub struct RawHeaders(BTreeMap<String, String>);

impl RawHeaders {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            map.insert(k.as_ref().to_ascii_lowercase(), v.into());
        }
        RawHeaders(map)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(|s| s.as_str())
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// The parsed request-scoped policy inputs (spec §4.2 "Inputs"). Required
/// headers missing → `PolicyHeaderError` equivalent (`BvError::Policy`, 400).
#[derive(Debug, Clone)]
pub struct PolicyRequest {
    pub user_id: String,
    pub active_role: String,
    pub all_roles: Vec<String>,
    pub policy_version: String,
    pub policy_key: String,
    pub request_id: String,
    pub trace_id: String,

    pub user_namespaces: Option<Vec<String>>,
    pub domain_scopes: Option<Vec<String>>,
    pub edge_allow: Option<Vec<String>>,
    pub max_hops: Option<u32>,
    pub sensitivity_ceiling: Option<String>,
    pub denied_status: Option<u16>,

    pub snapshot_etag: Option<String>,
}

impl PolicyRequest {
    pub fn parse(headers: &RawHeaders) -> Result<Self, BvError> {
        let required = |name: &str| -> Result<String, BvError> {
            headers
                .get(name)
                .map(|s| s.to_string())
                .filter(|s| !s.is_empty())
                .ok_or_else(|| BvError::Policy(format!("missing required header {name}")))
        };

        let user_id = required(X_USER_ID)?;
        let roles_raw = required(X_USER_ROLES)?;
        let all_roles = split_csv(&roles_raw);
        let active_role = all_roles
            .first()
            .cloned()
            .ok_or_else(|| BvError::Policy("X-User-Roles must name at least one role".into()))?;
        let policy_version = required(X_POLICY_VERSION)?;
        let policy_key = required(X_POLICY_KEY)?;
        let request_id = required(X_REQUEST_ID)?;
        let trace_id = required(X_TRACE_ID)?;

        let max_hops = headers
            .get(X_MAX_HOPS)
            .map(|s| {
                s.parse::<u32>()
                    .map_err(|_| BvError::Policy(format!("invalid {X_MAX_HOPS}: {s}")))
            })
            .transpose()?;

        let denied_status = headers
            .get(X_DENIED_STATUS)
            .map(|s| {
                s.parse::<u16>()
                    .map_err(|_| BvError::Policy(format!("invalid {X_DENIED_STATUS}: {s}")))
            })
            .transpose()?;

        Ok(PolicyRequest {
            user_id,
            active_role,
            all_roles,
            policy_version,
            policy_key,
            request_id,
            trace_id,
            user_namespaces: headers.get(X_USER_NAMESPACES).map(split_csv),
            domain_scopes: headers.get(X_DOMAIN_SCOPES).map(split_csv),
            edge_allow: headers.get(X_EDGE_ALLOW).map(split_csv),
            max_hops,
            sensitivity_ceiling: headers.get(X_SENSITIVITY_CEILING).map(|s| s.to_string()),
            denied_status,
            snapshot_etag: headers.get(X_SNAPSHOT_ETAG).map(|s| s.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_headers() -> RawHeaders {
        RawHeaders::from_pairs([
            (X_USER_ID, "u-1"),
            (X_USER_ROLES, "engineer,viewer"),
            (X_POLICY_VERSION, "v1"),
            (X_POLICY_KEY, "sha256:abc"),
            (X_REQUEST_ID, "r-1"),
            (X_TRACE_ID, "t-1"),
        ])
    }

    #[test]
    fn parses_required_headers_case_insensitively() {
        let headers = RawHeaders::from_pairs([
            ("X-User-Id", "u-1"),
            ("X-USER-ROLES", "engineer"),
            ("x-policy-version", "v1"),
            ("X-Policy-Key", "sha256:abc"),
            ("X-Request-Id", "r-1"),
            ("X-Trace-Id", "t-1"),
        ]);
        let req = PolicyRequest::parse(&headers).unwrap();
        assert_eq!(req.active_role, "engineer");
    }

    #[test]
    fn missing_required_header_is_policy_error() {
        let headers = RawHeaders::from_pairs([(X_USER_ID, "u-1")]);
        let err = PolicyRequest::parse(&headers).unwrap_err();
        assert_eq!(err.code(), "policy_error");
    }

    #[test]
    fn first_role_token_is_active_role() {
        let req = PolicyRequest::parse(&base_headers()).unwrap();
        assert_eq!(req.active_role, "engineer");
        assert_eq!(req.all_roles, vec!["engineer".to_string(), "viewer".to_string()]);
    }

    #[test]
    fn optional_narrowing_headers_parse_csv_lists() {
        let headers = RawHeaders::from_pairs([
            (X_USER_ID, "u-1"),
            (X_USER_ROLES, "engineer"),
            (X_POLICY_VERSION, "v1"),
            (X_POLICY_KEY, "sha256:abc"),
            (X_REQUEST_ID, "r-1"),
            (X_TRACE_ID, "t-1"),
            (X_DOMAIN_SCOPES, "eng/*, hr/*"),
            (X_MAX_HOPS, "3"),
        ]);
        let req = PolicyRequest::parse(&headers).unwrap();
        assert_eq!(req.domain_scopes, Some(vec!["eng/*".to_string(), "hr/*".to_string()]));
        assert_eq!(req.max_hops, Some(3));
    }
}
