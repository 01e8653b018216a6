//! Two-key evidence cache (spec.md §7): `alias_key -> composite_key ->
//! body`. Composite is written first with TTL, alias written last with the
//! same TTL so a reader never observes an alias pointing at a
//! not-yet-written composite.
//!
//! Rules carried over verbatim from the spec: never cache errors (callers
//! only call `write` with a successfully computed bundle), skip writes
//! when the snapshot ETag is unknown, and treat any decode failure on read
//! as a plain miss rather than a propagated error.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use bv_common::error::BvError;
use bv_models::evidence::WhyDecisionEvidence;

use crate::keys::{alias_key, composite_key};
use crate::raw::RawCache;

/// Sentinel stored in place of a real bundle when a prior computation
/// determined "no evidence" for this exact composite key, so repeated
/// identical requests don't re-run the (expensive) collection path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum CacheEnvelope {
    Found { body: WhyDecisionEvidence },
    Absent,
}

pub enum CachedEvidence {
    Found(WhyDecisionEvidence),
    Absent,
}

pub struct EvidenceCache<C: RawCache> {
    cache: C,
    ttl: Duration,
}

impl<C: RawCache> EvidenceCache<C> {
    pub fn new(cache: C, ttl_secs: u64) -> Self {
        EvidenceCache {
            cache,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    pub async fn write(
        &self,
        anchor_id: &str,
        decision_id: &str,
        intent: &str,
        graph_scope: &str,
        snapshot_etag: &str,
        truncation_flag: bool,
        body: &WhyDecisionEvidence,
    ) -> Result<(), BvError> {
        if snapshot_etag.is_empty() {
            return Ok(());
        }
        let envelope = CacheEnvelope::Found { body: body.clone() };
        self.write_envelope(
            anchor_id,
            decision_id,
            intent,
            graph_scope,
            snapshot_etag,
            truncation_flag,
            envelope,
        )
        .await
    }

    pub async fn write_absent(
        &self,
        anchor_id: &str,
        decision_id: &str,
        intent: &str,
        graph_scope: &str,
        snapshot_etag: &str,
        truncation_flag: bool,
    ) -> Result<(), BvError> {
        if snapshot_etag.is_empty() {
            return Ok(());
        }
        self.write_envelope(
            anchor_id,
            decision_id,
            intent,
            graph_scope,
            snapshot_etag,
            truncation_flag,
            CacheEnvelope::Absent,
        )
        .await
    }

    async fn write_envelope(
        &self,
        anchor_id: &str,
        decision_id: &str,
        intent: &str,
        graph_scope: &str,
        snapshot_etag: &str,
        truncation_flag: bool,
        envelope: CacheEnvelope,
    ) -> Result<(), BvError> {
        let composite = composite_key(decision_id, intent, graph_scope, snapshot_etag, truncation_flag);
        let bytes = serde_json::to_vec(&envelope).map_err(BvError::serialization)?;
        self.cache.setex(&composite, self.ttl, bytes).await?;
        let alias = alias_key(anchor_id);
        self.cache
            .setex(&alias, self.ttl, composite.into_bytes())
            .await
    }

    /// Read: alias -> composite -> body. Any miss or decode error along the
    /// chain is a cache miss, never an error.
    pub async fn read(&self, anchor_id: &str) -> Option<CachedEvidence> {
        let alias = alias_key(anchor_id);
        let composite_bytes = self.cache.get(&alias).await.ok().flatten()?;
        let composite = String::from_utf8(composite_bytes).ok()?;
        let body_bytes = self.cache.get(&composite).await.ok().flatten()?;
        match serde_json::from_slice::<CacheEnvelope>(&body_bytes).ok()? {
            CacheEnvelope::Found { body } => Some(CachedEvidence::Found(body)),
            CacheEnvelope::Absent => Some(CachedEvidence::Absent),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::MemoryCache;
    use bv_models::evidence::WhyDecisionAnchor;

    fn evidence() -> WhyDecisionEvidence {
        WhyDecisionEvidence {
            anchor: WhyDecisionAnchor {
                id: "eng#d-1".into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips_through_both_keys() {
        let cache = EvidenceCache::new(MemoryCache::new(), 900);
        cache
            .write("eng#d-1", "eng#d-1", "why_decision", "eng/*", "snap-1", false, &evidence())
            .await
            .unwrap();
        let found = cache.read("eng#d-1").await;
        assert!(matches!(found, Some(CachedEvidence::Found(_))));
    }

    #[tokio::test]
    async fn skips_write_when_snapshot_etag_unknown() {
        let cache = EvidenceCache::new(MemoryCache::new(), 900);
        cache
            .write("eng#d-1", "eng#d-1", "why_decision", "eng/*", "", false, &evidence())
            .await
            .unwrap();
        assert!(cache.read("eng#d-1").await.is_none());
    }

    #[tokio::test]
    async fn negative_sentinel_round_trips_as_absent() {
        let cache = EvidenceCache::new(MemoryCache::new(), 900);
        cache
            .write_absent("eng#d-2", "eng#d-2", "why_decision", "eng/*", "snap-1", false)
            .await
            .unwrap();
        assert!(matches!(cache.read("eng#d-2").await, Some(CachedEvidence::Absent)));
    }

    #[tokio::test]
    async fn missing_alias_is_a_plain_miss() {
        let cache = EvidenceCache::new(MemoryCache::new(), 900);
        assert!(cache.read("eng#ghost").await.is_none());
    }
}
