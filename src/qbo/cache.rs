//! Short-lived cache of client detail fetches.
//!
//! Concurrent requests for the same client share one in-flight fetch. The
//! in-flight entry is removed as soon as that fetch settles, whatever the
//! outcome; only successful results are kept, for `ttl`. A successful result
//! is cached before its in-flight entry goes away.

use super::record::ClientRecord;
use crate::errors::GatewayError;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const DETAIL_TTL: Duration = Duration::from_secs(60);

pub type DetailResult = Result<ClientRecord, Arc<GatewayError>>;
type PendingFetch = Shared<BoxFuture<'static, DetailResult>>;

struct CachedDetail {
    expires_at: Instant,
    value: ClientRecord,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<String, CachedDetail>>,
    inflight: Mutex<HashMap<String, PendingFetch>>,
}

#[derive(Clone)]
pub struct DetailCache {
    inner: Arc<Inner>,
    ttl: Duration,
}

impl Default for DetailCache {
    fn default() -> Self {
        Self::new(DETAIL_TTL)
    }
}

impl DetailCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner::default()),
            ttl,
        }
    }

    /// Cached detail for `client_id`, or the result of `fetch`, joining any fetch already in flight.
    pub async fn get_or_fetch<F, Fut>(&self, client_id: &str, fetch: F) -> DetailResult
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ClientRecord, GatewayError>> + Send + 'static,
    {
        if let Some(hit) = self.cached(client_id) {
            tracing::debug!(event = "detail_cache.hit", client_id);
            return Ok(hit);
        }

        let pending = {
            let mut inflight = self.inner.inflight.lock();
            match inflight.get(client_id) {
                Some(p) => {
                    tracing::debug!(event = "detail_cache.join", client_id);
                    p.clone()
                }
                None => {
                    // A fetch may have settled since the first lookup.
                    if let Some(hit) = self.cached(client_id) {
                        return Ok(hit);
                    }
                    let p = self.spawn_fetch(client_id.to_string(), fetch());
                    inflight.insert(client_id.to_string(), p.clone());
                    p
                }
            }
        };
        pending.await
    }

    fn spawn_fetch<Fut>(&self, client_id: String, fut: Fut) -> PendingFetch
    where
        Fut: Future<Output = Result<ClientRecord, GatewayError>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let ttl = self.ttl;
        async move {
            let result = fut.await.map_err(Arc::new);
            // Cache before clearing the in-flight slot so no caller misses both.
            match &result {
                Ok(value) => {
                    inner.entries.lock().insert(
                        client_id.clone(),
                        CachedDetail {
                            expires_at: Instant::now() + ttl,
                            value: value.clone(),
                        },
                    );
                }
                Err(e) => {
                    tracing::debug!(event = "detail_cache.fetch_failed", client_id = %client_id, error = %e);
                }
            }
            inner.inflight.lock().remove(&client_id);
            result
        }
        .boxed()
        .shared()
    }

    fn cached(&self, client_id: &str) -> Option<ClientRecord> {
        let mut entries = self.inner.entries.lock();
        match entries.get(client_id) {
            Some(hit) if hit.expires_at > Instant::now() => Some(hit.value.clone()),
            Some(_) => {
                entries.remove(client_id);
                None
            }
            None => None,
        }
    }

    /// Drop any cached detail for `client_id` (after a create or delete).
    pub fn invalidate(&self, client_id: &str) {
        self.inner.entries.lock().remove(client_id);
    }

    pub fn inflight_len(&self) -> usize {
        self.inner.inflight.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(id: &str) -> ClientRecord {
        ClientRecord::from(json!({"client_id": id, "has_credentials": true}))
    }

    /// Fetcher that counts calls and resolves after `delay`.
    fn fetcher(
        calls: &Arc<AtomicUsize>,
        id: &'static str,
        delay: Duration,
        fail: bool,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<ClientRecord, GatewayError>> {
        let calls = Arc::clone(calls);
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(delay).await;
                if fail {
                    Err(GatewayError::InvalidJson)
                } else {
                    Ok(record(id))
                }
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_fetches_are_coalesced() {
        let cache = DetailCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(200);

        let (a, b) = tokio::join!(
            cache.get_or_fetch("c1", fetcher(&calls, "c1", delay, false)),
            cache.get_or_fetch("c1", fetcher(&calls, "c1", delay, false)),
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.unwrap().client_id, "c1");
        assert_eq!(b.unwrap().client_id, "c1");
        assert_eq!(cache.inflight_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_until_ttl_expires() {
        let cache = DetailCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let fast = Duration::from_millis(1);

        cache.get_or_fetch("c1", fetcher(&calls, "c1", fast, false)).await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.get_or_fetch("c1", fetcher(&calls, "c1", fast, false)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        cache.get_or_fetch("c1", fetcher(&calls, "c1", fast, false)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_shared_but_not_cached() {
        let cache = DetailCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(50);

        let (a, b) = tokio::join!(
            cache.get_or_fetch("c1", fetcher(&calls, "c1", delay, true)),
            cache.get_or_fetch("c1", fetcher(&calls, "c1", delay, true)),
        );
        assert!(a.is_err() && b.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.inflight_len(), 0);

        let ok = cache.get_or_fetch("c1", fetcher(&calls, "c1", delay, false)).await;
        assert!(ok.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_clients_fetch_independently() {
        let cache = DetailCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(10);
        let (a, b) = tokio::join!(
            cache.get_or_fetch("c1", fetcher(&calls, "c1", delay, false)),
            cache.get_or_fetch("c2", fetcher(&calls, "c2", delay, false)),
        );
        assert_eq!(a.unwrap().client_id, "c1");
        assert_eq!(b.unwrap().client_id, "c2");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_refetch() {
        let cache = DetailCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let fast = Duration::from_millis(1);
        cache.get_or_fetch("c1", fetcher(&calls, "c1", fast, false)).await.unwrap();
        cache.invalidate("c1");
        cache.get_or_fetch("c1", fetcher(&calls, "c1", fast, false)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn callers_arriving_while_a_fetch_settles_do_not_refetch() {
        let cache = DetailCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let delay = Duration::from_millis(20);

        let tasks: Vec<_> = (0..200u64)
            .map(|i| {
                let cache = cache.clone();
                let fetch = fetcher(&calls, "c1", delay, false);
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_micros(i * 200)).await;
                    cache.get_or_fetch("c1", fetch).await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().client_id, "c1");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.inflight_len(), 0);
    }
}
