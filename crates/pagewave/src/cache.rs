use core::{fmt, future::Future, hash::Hash, time::Duration};
use std::{collections::HashMap, time::Instant};

use parking_lot::Mutex;

use crate::RequestDeduplicator;

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    stored_at: Instant,
}

/// Caches the results of a remote lookup, such as chain metadata fetched over
/// RPC, keyed by `K`.
///
/// Misses go through a [`RequestDeduplicator`], so concurrent lookups of the
/// same missing key issue a single request. Only successful results are
/// stored; an error is returned to every waiter and the next lookup tries
/// again. With a time-to-live configured, entries older than the TTL are
/// treated as missing and evicted on access.
///
/// # Example
///
/// ```
/// use pagewave::MetadataCache;
///
/// # futures::executor::block_on(async {
/// let cache = MetadataCache::<&str, u32, String>::new();
///
/// let version = cache.get_or_fetch("runtime", || async { Ok(9_430) }).await;
/// assert_eq!(version, Ok(9_430));
///
/// // Served from the cache, the fetch is never called.
/// let version = cache
///     .get_or_fetch("runtime", || async { Err("unreachable".to_string()) })
///     .await;
/// assert_eq!(version, Ok(9_430));
/// # });
/// ```
pub struct MetadataCache<K, V, E> {
    ttl: Option<Duration>,
    entries: Mutex<HashMap<K, CacheEntry<V>>>,
    requests: RequestDeduplicator<K, Result<V, E>>,
}

impl<K, V, E> fmt::Debug for MetadataCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataCache")
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.lock().len())
            .field("requests", &self.requests)
            .finish()
    }
}

impl<K, V, E> Default for MetadataCache<K, V, E> {
    fn default() -> Self {
        Self {
            ttl: None,
            entries: Mutex::new(HashMap::new()),
            requests: RequestDeduplicator::default(),
        }
    }
}

impl<K, V, E> MetadataCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Creates a cache whose entries never expire.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache whose entries expire `ttl` after being stored.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    /// Configured time-to-live, or `None` if entries never expire.
    pub const fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Returns the cached value for `key` if present and fresh.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let entry = entries.get(key)?;
        if self.is_fresh(entry) {
            return Some(entry.value.clone());
        }
        entries.remove(key);
        None
    }

    /// Stores `value` under `key`, replacing any previous entry.
    pub fn insert(&self, key: K, value: V) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Returns the cached value for `key`, or fetches, stores and returns it.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `fetch`. Errors are never cached.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        #[cfg(feature = "tracing")]
        tracing::trace!("cache miss");

        let result = self.requests.run(key.clone(), fetch).await;
        if let Ok(value) = &result {
            self.insert(key, value.clone());
        }
        result
    }

    /// Removes the entry for `key`, returning its value if it was fresh.
    ///
    /// A request for `key` already in flight is not affected and will store
    /// its result when it completes.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        let entry = self.entries.lock().remove(key)?;
        self.is_fresh(&entry).then_some(entry.value)
    }

    /// Removes every stored entry. In-flight requests are not affected.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns `true` if no entry is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn is_fresh(&self, entry: &CacheEntry<V>) -> bool {
        self.ttl.is_none_or(|ttl| entry.stored_at.elapsed() < ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use portable_atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fetch_ok(
        calls: &Arc<AtomicUsize>,
        value: u64,
    ) -> impl Future<Output = Result<u64, String>> + Send + 'static {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(value)
        }
    }

    #[tokio::test]
    async fn serves_repeated_lookups_from_cache() {
        let cache = MetadataCache::<&str, u64, String>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let value = cache.get_or_fetch("spec_version", || fetch_ok(&calls, 1_002)).await;
            assert_eq!(value, Ok(1_002));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&"spec_version"), Some(1_002));
    }

    #[tokio::test]
    async fn concurrent_misses_issue_one_request() {
        let cache = MetadataCache::<u32, u64, String>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let results =
            join_all((0..4).map(|_| cache.get_or_fetch(7, || fetch_ok(&calls, 42)))).await;

        assert!(results.iter().all(|r| *r == Ok(42)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn errors_are_not_cached() {
        let cache = MetadataCache::<&str, u64, String>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        let err = cache
            .get_or_fetch("metadata", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err("connection reset".to_string())
            })
            .await;
        assert_eq!(err, Err("connection reset".to_string()));
        assert!(cache.is_empty());

        let ok = cache.get_or_fetch("metadata", || fetch_ok(&calls, 3)).await;
        assert_eq!(ok, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let cache = MetadataCache::<&str, u64, String>::with_ttl(Duration::from_millis(20));
        let calls = Arc::new(AtomicUsize::new(0));

        assert_eq!(cache.get_or_fetch("head", || fetch_ok(&calls, 1)).await, Ok(1));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get(&"head"), None);
        assert_eq!(cache.get_or_fetch("head", || fetch_ok(&calls, 2)).await, Ok(2));

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.ttl(), Some(Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn invalidate_and_clear_drop_entries() {
        let cache = MetadataCache::<u32, u64, String>::new();
        cache.insert(1, 10);
        cache.insert(2, 20);

        assert_eq!(cache.invalidate(&1), Some(10));
        assert_eq!(cache.invalidate(&1), None);
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());

        let calls = Arc::new(AtomicUsize::new(0));
        assert_eq!(cache.get_or_fetch(2, || fetch_ok(&calls, 21)).await, Ok(21));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
