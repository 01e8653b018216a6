//! Idempotency-key storage (spec.md §4.11 "Ordering guarantees", grounded
//! in `core_idem/__init__.py`): a 24h-TTL record keyed by the client's
//! `Idempotency-Key`, merged only when the stored `request_scope_fp`
//! matches what the new request would compute.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use bv_common::error::BvError;
use bv_common::fingerprint;

use crate::raw::RawCache;

pub const IDEM_TTL_SECS: u64 = 24 * 60 * 60;

/// Stable Redis key for a client-supplied `Idempotency-Key`, namespaced by
/// service (spec.md "idempotency for retries is provided by
/// `idem_redis_key(raw_key, service)`").
pub fn idem_redis_key(raw_key: &str, service: &str) -> String {
    let fp = bv_common::sha256_hex(raw_key.as_bytes());
    format!("idem:v1:{service}:{}", &fp[..20])
}

#[derive(Debug, Clone, Serialize)]
struct RequestScopeBasis<'a> {
    method: &'a str,
    path_template: &'a str,
    query: &'a str,
    body: &'a str,
    snapshot_etag: &'a str,
    policy_fp: &'a str,
}

/// `{method, path_template, canonical(query), canonical(body),
/// snapshot_etag, policy_fp}` (spec.md §4.11). `query`/`body` are expected
/// to already be canonical JSON strings (see `bv_common::canonical_json`).
pub fn request_scope_fp(
    method: &str,
    path_template: &str,
    canonical_query: &str,
    canonical_body: &str,
    snapshot_etag: &str,
    policy_fp: &str,
) -> String {
    let basis = RequestScopeBasis {
        method,
        path_template,
        query: canonical_query,
        body: canonical_body,
        snapshot_etag,
        policy_fp,
    };
    fingerprint(&basis).expect("request scope basis always serialises")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdemRecord {
    pub request_scope_fp: String,
    pub body: serde_json::Value,
}

pub struct IdemStore<C: RawCache> {
    cache: C,
}

impl<C: RawCache> IdemStore<C> {
    pub fn new(cache: C) -> Self {
        IdemStore { cache }
    }

    pub async fn get(&self, key: &str) -> Result<Option<IdemRecord>, BvError> {
        let Some(bytes) = self.cache.get(key).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_slice(&bytes).ok())
    }

    pub async fn set(&self, key: &str, record: &IdemRecord) -> Result<(), BvError> {
        let bytes = serde_json::to_vec(record).map_err(BvError::serialization)?;
        self.cache
            .setex(key, Duration::from_secs(IDEM_TTL_SECS), bytes)
            .await
    }

    /// Merge `patch` into the stored record only when its `request_scope_fp`
    /// matches `expected_scope_fp`; returns `false` (and logs nothing itself
    /// — callers log the conflict) on mismatch or absence.
    pub async fn merge(
        &self,
        key: &str,
        expected_scope_fp: &str,
        patch: serde_json::Value,
    ) -> Result<bool, BvError> {
        let Some(mut current) = self.get(key).await? else {
            return Ok(false);
        };
        if current.request_scope_fp != expected_scope_fp {
            return Ok(false);
        }
        if let (serde_json::Value::Object(cur_obj), serde_json::Value::Object(patch_obj)) =
            (&mut current.body, patch)
        {
            cur_obj.extend(patch_obj);
        }
        self.set(key, &current).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::MemoryCache;

    #[test]
    fn idem_redis_key_is_namespaced_and_stable() {
        let a = idem_redis_key("client-key-1", "gateway");
        let b = idem_redis_key("client-key-1", "gateway");
        assert_eq!(a, b);
        assert!(a.starts_with("idem:v1:gateway:"));
    }

    #[test]
    fn request_scope_fp_changes_with_snapshot_etag() {
        let a = request_scope_fp("POST", "/v2/ask", "", "{}", "snap-1", "pfp-1");
        let b = request_scope_fp("POST", "/v2/ask", "", "{}", "snap-2", "pfp-1");
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn merge_rejects_scope_mismatch() {
        let store = IdemStore::new(MemoryCache::new());
        let key = idem_redis_key("k1", "gateway");
        store
            .set(
                &key,
                &IdemRecord {
                    request_scope_fp: "fp-a".into(),
                    body: serde_json::json!({"status": "pending"}),
                },
            )
            .await
            .unwrap();
        let merged = store
            .merge(&key, "fp-b", serde_json::json!({"status": "done"}))
            .await
            .unwrap();
        assert!(!merged);
    }

    #[tokio::test]
    async fn merge_applies_patch_on_matching_scope() {
        let store = IdemStore::new(MemoryCache::new());
        let key = idem_redis_key("k2", "gateway");
        store
            .set(
                &key,
                &IdemRecord {
                    request_scope_fp: "fp-a".into(),
                    body: serde_json::json!({"status": "pending"}),
                },
            )
            .await
            .unwrap();
        let merged = store
            .merge(&key, "fp-a", serde_json::json!({"status": "done"}))
            .await
            .unwrap();
        assert!(merged);
        let record = store.get(&key).await.unwrap().unwrap();
        assert_eq!(record.body["status"], "done");
    }
}
