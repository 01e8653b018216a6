//! Shared error taxonomy (spec §7). All three services construct their
//! HTTP error envelopes from the same enum so the `code` strings and status
//! mapping are guaranteed identical, the Rust analogue of the original's
//! shared `core_http.errors` module.

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PreconditionSubkind {
    NoSnapshot,
    Missing,
    Mismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AclReason {
    RoleMissing,
    NamespaceMismatch,
    SensitivityExceeded,
    DomainOutOfScope,
    RequestedIdsOutOfScope,
    InvalidNode,
}

#[derive(Error, Debug)]
pub enum BvError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("policy error: {0}")]
    Policy(String),

    #[error("acl denied: {reason:?}")]
    AclDenied { reason: AclReason, status: u16 },

    #[error("domain mismatch: {0}")]
    DomainMismatch(String),

    #[error("precondition failed: {subkind:?}")]
    Precondition { subkind: PreconditionSubkind },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("bundle signature missing")]
    BundleSignatureMissing,

    #[error("bundle signature invalid")]
    BundleSignatureInvalid,

    #[error("manifest mismatch: {0}")]
    ManifestMismatch(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BvError {
    pub fn serialization(e: serde_json::Error) -> Self {
        BvError::Internal(format!("serialization error: {e}"))
    }

    /// Stable machine-readable code, independent of the status mapping.
    pub fn code(&self) -> &'static str {
        match self {
            BvError::Validation(_) => "validation_failed",
            BvError::Policy(_) => "policy_error",
            BvError::AclDenied { .. } => "acl_denied",
            BvError::DomainMismatch(_) => "domain_mismatch",
            BvError::Precondition { .. } => "precondition_failed",
            BvError::NotFound(_) => "not_found",
            BvError::UpstreamTimeout(_) => "upstream_timeout",
            BvError::StorageUnavailable(_) => "storage_unavailable",
            BvError::BundleSignatureMissing => "bundle_signature_missing",
            BvError::BundleSignatureInvalid => "bundle_signature_invalid",
            BvError::ManifestMismatch(_) => "manifest_mismatch",
            BvError::Internal(_) => "internal",
        }
    }

    /// Default HTTP status for this error kind. `AclDenied` carries its own
    /// status (the configurable `X-Denied-Status`, default 403).
    pub fn status(&self) -> u16 {
        match self {
            BvError::Validation(_) => 400,
            BvError::Policy(_) => 400,
            BvError::AclDenied { status, .. } => *status,
            BvError::DomainMismatch(_) => 403,
            BvError::Precondition { .. } => 412,
            BvError::NotFound(_) => 404,
            BvError::UpstreamTimeout(_) => 504,
            BvError::StorageUnavailable(_) => 503,
            BvError::BundleSignatureMissing | BvError::BundleSignatureInvalid => 422,
            BvError::ManifestMismatch(_) => 422,
            BvError::Internal(_) => 500,
        }
    }

    /// Build the `{error:{code,message,request_id,details?}}` envelope (§7).
    pub fn envelope(&self, request_id: &str) -> ErrorEnvelope {
        ErrorEnvelope {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
                request_id: request_id.to_string(),
                details: None,
            },
            request_id: request_id.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub request_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
    pub request_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_status_is_412() {
        let e = BvError::Precondition {
            subkind: PreconditionSubkind::NoSnapshot,
        };
        assert_eq!(e.status(), 412);
        assert_eq!(e.code(), "precondition_failed");
    }

    #[test]
    fn acl_denied_carries_configurable_status() {
        let e = BvError::AclDenied {
            reason: AclReason::DomainOutOfScope,
            status: 404,
        };
        assert_eq!(e.status(), 404);
    }
}
