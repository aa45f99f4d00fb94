//! Cached strategy: TTL-based (default 5 minutes), double-checked locking,
//! caches errors to prevent a thundering herd against a down backend, and
//! applies the same TTL to negative entries as to positive ones (§4.A, §5).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache;

use super::{Identity, IdentityMapper, Principal, ResolveError};

/// In-flight resolution marker, so concurrent callers resolving the same
/// cache-miss principal don't all hit the backend (double-checked locking).
type Inflight = Arc<tokio::sync::Mutex<()>>;

#[derive(Clone)]
#[allow(dead_code)]
enum CachedOutcome {
    Identity(Identity),
    /// The backend failed; cached so a thundering herd doesn't retry it on
    /// every request until the TTL expires.
    Error,
}

pub struct CachedMapper<M> {
    inner: M,
    cache: Cache<Principal, CachedOutcome>,
    inflight: dashmap::DashMap<Principal, Inflight>,
}

pub struct CacheStats {
    pub entry_count: u64,
}

impl<M: IdentityMapper> CachedMapper<M> {
    pub fn new(inner: M, ttl: Duration) -> Self {
        let cache = Cache::builder().time_to_live(ttl).build();
        Self { inner, cache, inflight: dashmap::DashMap::new() }
    }

    /// Explicit invalidation of a single principal's cache entry.
    pub fn invalidate(&self, principal: &Principal) {
        self.cache.invalidate(principal);
    }

    /// Explicit invalidation of the whole cache.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    pub fn stats(&self) -> CacheStats {
        self.cache.run_pending_tasks();
        CacheStats { entry_count: self.cache.entry_count() }
    }

    async fn resolve_uncached(&self, principal: &Principal) -> CachedOutcome {
        match self.inner.resolve(principal).await {
            Ok(identity) => CachedOutcome::Identity(identity),
            Err(_) => CachedOutcome::Error,
        }
    }
}

#[async_trait]
impl<M: IdentityMapper> IdentityMapper for CachedMapper<M> {
    async fn resolve(&self, principal: &Principal) -> Result<Identity, ResolveError> {
        if let Some(hit) = self.cache.get(principal) {
            return match hit {
                CachedOutcome::Identity(id) => Ok(id),
                CachedOutcome::Error => Err(ResolveError),
            };
        }

        // Double-checked locking: only one task resolves a given principal
        // at a time; everyone else waits on the same lock then re-checks
        // the cache, which will now be populated.
        let lock = self
            .inflight
            .entry(principal.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        if let Some(hit) = self.cache.get(principal) {
            return match hit {
                CachedOutcome::Identity(id) => Ok(id),
                CachedOutcome::Error => Err(ResolveError),
            };
        }

        let outcome = self.resolve_uncached(principal).await;
        self.cache.insert(principal.clone(), outcome.clone());
        self.inflight.remove(principal);

        match outcome {
            CachedOutcome::Identity(id) => Ok(id),
            CachedOutcome::Error => Err(ResolveError),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticMapper;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingMapper {
        calls: AtomicUsize,
        inner: StaticMapper,
    }

    #[async_trait]
    impl IdentityMapper for CountingMapper {
        async fn resolve(&self, principal: &Principal) -> Result<Identity, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.resolve(principal).await
        }
    }

    #[tokio::test]
    async fn second_lookup_is_cached() {
        let mapper = CachedMapper::new(
            CountingMapper { calls: AtomicUsize::new(0), inner: StaticMapper::nobody() },
            Duration::from_secs(60),
        );
        let p = Principal::new("x@y");
        mapper.resolve(&p).await.unwrap();
        mapper.resolve(&p).await.unwrap();
        mapper.cache.run_pending_tasks();
        assert_eq!(mapper.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let mapper = CachedMapper::new(
            CountingMapper { calls: AtomicUsize::new(0), inner: StaticMapper::nobody() },
            Duration::from_secs(60),
        );
        let p = Principal::new("x@y");
        mapper.resolve(&p).await.unwrap();
        mapper.invalidate(&p);
        mapper.resolve(&p).await.unwrap();
        assert_eq!(mapper.inner.calls.load(Ordering::SeqCst), 2);
    }
}
