//! Generic TTL+SWR JSON envelope (spec.md §4.4 "SWR: if remaining TTL <
//! 20% of full, schedule an asynchronous refresh without blocking the
//! hit"). Used by Memory's `resolve/text`/`expand_candidates` caches and
//! the Gateway's evidence cache call sites; the two-key evidence pattern
//! itself stays in `evidence.rs`, which predates this and has its own
//! (simpler, no-SWR) envelope.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use bv_common::error::BvError;

use crate::raw::RawCache;

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
enum Body<T> {
    Found { value: T },
    /// Negative-cache sentinel for resolver misses (spec §4.4 `{_neg:true}`).
    Negative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope<T> {
    body: Body<T>,
    written_at_epoch_ms: u64,
    ttl_secs: u64,
}

pub enum CacheHit<T> {
    Found(T),
    Negative,
}

/// Whether a hit's remaining TTL fraction has dropped below the SWR
/// threshold and a background refresh should be scheduled.
pub fn needs_refresh(written_at_epoch_ms: u64, ttl_secs: u64) -> bool {
    if ttl_secs == 0 {
        return false;
    }
    let age_ms = now_epoch_ms().saturating_sub(written_at_epoch_ms);
    let ttl_ms = ttl_secs * 1000;
    let remaining = ttl_ms.saturating_sub(age_ms) as f64 / ttl_ms as f64;
    remaining < 0.2
}

/// Read a JSON-encoded envelope. Returns `(hit, should_refresh)`; any decode
/// failure is treated as a plain miss, never a propagated error.
pub async fn read<C: RawCache, T: DeserializeOwned>(
    cache: &C,
    key: &str,
) -> Option<(CacheHit<T>, bool)> {
    let bytes = cache.get(key).await.ok().flatten()?;
    let envelope: Envelope<T> = serde_json::from_slice(&bytes).ok()?;
    let should_refresh = needs_refresh(envelope.written_at_epoch_ms, envelope.ttl_secs);
    let hit = match envelope.body {
        Body::Found { value } => CacheHit::Found(value),
        Body::Negative => CacheHit::Negative,
    };
    Some((hit, should_refresh))
}

async fn write_body<C: RawCache, T: Serialize>(
    cache: &C,
    key: &str,
    body: Body<T>,
    ttl_secs: u64,
) -> Result<(), BvError> {
    let envelope = Envelope {
        body,
        written_at_epoch_ms: now_epoch_ms(),
        ttl_secs,
    };
    let bytes = serde_json::to_vec(&envelope).map_err(BvError::serialization)?;
    cache.setex(key, Duration::from_secs(ttl_secs.max(1)), bytes).await
}

pub async fn write<C: RawCache, T: Serialize>(
    cache: &C,
    key: &str,
    value: &T,
    ttl_secs: u64,
) -> Result<(), BvError> {
    write_body(cache, key, Body::Found { value }, ttl_secs).await
}

pub async fn write_negative<C: RawCache>(cache: &C, key: &str, ttl_secs: u64) -> Result<(), BvError> {
    write_body::<C, ()>(cache, key, Body::Negative, ttl_secs).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::MemoryCache;

    #[tokio::test]
    async fn round_trips_found_value() {
        let cache = MemoryCache::new();
        write(&cache, "k", &vec!["a".to_string()], 900).await.unwrap();
        let (hit, refresh) = read::<_, Vec<String>>(&cache, "k").await.unwrap();
        assert!(matches!(hit, CacheHit::Found(v) if v == vec!["a".to_string()]));
        assert!(!refresh);
    }

    #[tokio::test]
    async fn negative_sentinel_round_trips() {
        let cache = MemoryCache::new();
        write_negative(&cache, "k", 900).await.unwrap();
        let (hit, _) = read::<_, serde_json::Value>(&cache, "k").await.unwrap();
        assert!(matches!(hit, CacheHit::Negative));
    }

    #[test]
    fn needs_refresh_below_twenty_percent_remaining() {
        let written = now_epoch_ms() - 850_000;
        assert!(needs_refresh(written, 900));
        let fresh = now_epoch_ms() - 10_000;
        assert!(!needs_refresh(fresh, 900));
    }
}
