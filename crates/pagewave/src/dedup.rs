use core::{fmt, future::Future, hash::Hash};
use std::collections::HashMap;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

/// Coalesces concurrent requests that share a key.
///
/// While a request for a key is in flight, further calls with the same key
/// await the same result instead of issuing a new request. Once the shared
/// request resolves its entry is dropped, so the next call starts fresh.
/// Results are not cached; see [`MetadataCache`](crate::MetadataCache) for
/// that.
///
/// Fallible requests are deduplicated by using a `Result` as `V`, which then
/// requires a cloneable error type.
pub struct RequestDeduplicator<K, V> {
    in_flight: Registry<K, V>,
}

impl<K, V> Default for RequestDeduplicator<K, V> {
    fn default() -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> fmt::Debug for RequestDeduplicator<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("in_flight", &self.in_flight.lock().len())
            .finish()
    }
}

type Registry<K, V> = Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>;

/// One caller's interest in an in-flight request.
///
/// Removes the registry entry once the request completes, or when the last
/// waiter gives up on it, so a dropped `run` future never leaves a stale entry
/// behind.
struct Waiter<'a, K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    registry: &'a Registry<K, V>,
    key: K,
    // Never polled, only used to identify the entry and count waiters.
    identity: Shared<BoxFuture<'static, V>>,
    pending: Shared<BoxFuture<'static, V>>,
    completed: bool,
}

impl<K, V> Drop for Waiter<'_, K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn drop(&mut self) {
        let mut in_flight = self.registry.lock();
        let Some(current) = in_flight.get(&self.key) else {
            return;
        };
        if !current.ptr_eq(&self.identity) {
            return;
        }
        // The registry, `identity` and an unfinished `pending` account for
        // three handles; anything above that is another waiter.
        let last_waiter = self.identity.strong_count().is_some_and(|count| count <= 3);
        if self.completed || last_waiter {
            #[cfg(feature = "tracing")]
            if !self.completed {
                tracing::trace!("last waiter dropped, forgetting in-flight request");
            }
            in_flight.remove(&self.key);
        }
    }
}

impl<K, V> RequestDeduplicator<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty deduplicator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the result of the in-flight request for `key`, starting one
    /// with `fetch` if there is none.
    ///
    /// `fetch` is only called when no request for `key` is in flight. It is
    /// called while the registry lock is held, so it must only build the
    /// future and must not call back into this deduplicator.
    ///
    /// Dropping the returned future before it resolves leaves the request
    /// running for the other waiters. When no waiter is left the entry is
    /// removed and the request itself is dropped.
    pub async fn run<F, Fut>(&self, key: K, fetch: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
    {
        let shared = {
            let mut in_flight = self.in_flight.lock();
            if let Some(shared) = in_flight.get(&key) {
                #[cfg(feature = "tracing")]
                tracing::trace!("joining in-flight request");
                shared.clone()
            } else {
                let shared = fetch().boxed().shared();
                in_flight.insert(key.clone(), shared.clone());
                shared
            }
        };

        let mut waiter = Waiter {
            registry: &self.in_flight,
            key,
            pending: shared.clone(),
            identity: shared,
            completed: false,
        };
        let value = (&mut waiter.pending).await;
        waiter.completed = true;
        value
    }

    /// Number of keys with a request currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Returns `true` if a request for `key` is currently in flight.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.in_flight.lock().contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use futures::future::join_all;
    use portable_atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counted_fetch(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl Future<Output = u32> + Send + 'static {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            value
        }
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_request() {
        let dedup = RequestDeduplicator::<&str, u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let results = join_all((0..5).map(|i| {
            let calls = &calls;
            dedup.run("balance", move || counted_fetch(calls, i))
        }))
        .await;

        assert_eq!(results, vec![0; 5]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_are_fetched_independently() {
        let dedup = RequestDeduplicator::<u8, u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            dedup.run(1, || counted_fetch(&calls, 10)),
            dedup.run(2, || counted_fetch(&calls, 20)),
        );

        assert_eq!((a, b), (10, 20));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn completed_requests_are_not_reused() {
        let dedup = RequestDeduplicator::<&str, u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        assert_eq!(dedup.run("nonce", || counted_fetch(&calls, 1)).await, 1);
        assert!(!dedup.is_in_flight(&"nonce"));
        assert_eq!(dedup.run("nonce", || counted_fetch(&calls, 2)).await, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    fn slow_fetch(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl Future<Output = u32> + Send + 'static {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            value
        }
    }

    #[tokio::test]
    async fn abandoned_requests_are_forgotten() {
        let dedup = RequestDeduplicator::<&str, u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            dedup.run("block", || slow_fetch(&calls, 1)),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(dedup.in_flight(), 0);
        assert_eq!(dedup.run("block", || counted_fetch(&calls, 2)).await, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropping_one_waiter_keeps_the_request_for_the_others() {
        let dedup = RequestDeduplicator::<&str, u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (abandoned, joined, shared_after_drop) = tokio::join!(
            tokio::time::timeout(
                Duration::from_millis(5),
                dedup.run("block", || slow_fetch(&calls, 1)),
            ),
            async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                dedup.run("block", || counted_fetch(&calls, 2)).await
            },
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                dedup.is_in_flight(&"block")
            },
        );

        assert!(abandoned.is_err());
        assert!(shared_after_drop);
        assert_eq!(joined, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn errors_are_shared_with_every_waiter() {
        let dedup = RequestDeduplicator::<&str, Result<u32, String>>::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let results = join_all((0..3).map(|_| {
            let calls = Arc::clone(&calls);
            dedup.run("era", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                Err::<u32, _>("rpc unavailable".to_string())
            })
        }))
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(
            results
                .iter()
                .all(|r| r.as_ref().unwrap_err() == "rpc unavailable")
        );
    }
}
