//! Evidence caching, idempotency-key storage and the process-local
//! request-scoped LRU (spec.md §7).

pub mod evidence;
pub mod idem;
pub mod keys;
pub mod local_lru;
pub mod raw;
pub mod swr;

pub use evidence::{CachedEvidence, EvidenceCache};
pub use idem::{idem_redis_key, request_scope_fp, IdemRecord, IdemStore, IDEM_TTL_SECS};
pub use local_lru::LocalTtlCache;
pub use raw::{MemoryCache, RawCache, RedisCache};
pub use swr::{needs_refresh, CacheHit};
