//! Load-shed sampler (spec §5 "Concurrency/Resource Model"): a cheap probe
//! of Redis and Memory health, sampled rather than checked on every
//! request, used to flip `meta.load_shed` and let callers back off before
//! the Gateway itself starts queuing.

use std::time::Duration;

use bv_cache::RawCache;

use crate::memory_client::MemoryClient;

const PING_KEY: &str = "bv:gw:v1:loadshed:ping";

/// Probes the cache with a short-TTL round trip and Memory's `/healthz`.
/// Either one failing/erroring counts as shed pressure.
pub async fn should_load_shed(cache: &dyn RawCache, memory: &MemoryClient, timeout: Duration) -> bool {
    let cache_unhealthy = tokio::time::timeout(timeout, async {
        cache
            .setex(PING_KEY, Duration::from_secs(5), b"1".to_vec())
            .await
            .is_err()
    })
    .await
    .unwrap_or(true);

    let memory_unhealthy = memory.healthz_is_error(timeout).await;

    cache_unhealthy || memory_unhealthy
}

#[cfg(test)]
mod tests {
    use super::*;
    use bv_cache::MemoryCache;

    #[tokio::test]
    async fn healthy_cache_does_not_shed_on_its_own() {
        let cache = MemoryCache::new();
        let memory = MemoryClient::new("http://127.0.0.1:0");
        let shed = should_load_shed(&cache, &memory, Duration::from_millis(50)).await;
        assert!(shed, "unreachable memory endpoint should still report pressure");
    }
}
