//! Fingerprint-keyed response cache
//!
//! TTL-bounded, LRU-evicted under entry and byte caps, and single-flight:
//! at most one producer runs per key, and every concurrent caller for that
//! key waits on the leader's latch and receives the identical result,
//! success or failure. Keys with a running producer are never evicted.
//!
//! Built on a concurrent map so reads of settled entries on one key never
//! block writers on another.

use crate::endpoints::TokenUsage;
use crate::error::{RouteError, RouteResult};
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// A cached successful query result.
#[derive(Debug, Clone, Serialize)]
pub struct CachedQuery {
    pub response: String,
    pub endpoint_used: String,
    pub completed_at: DateTime<Utc>,
    pub token_usage: TokenUsage,
}

/// How a caller's request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Served from a settled entry.
    Hit,
    /// This caller ran the producer.
    MissLeader,
    /// This caller waited on another caller's producer.
    Coalesced,
}

#[derive(Debug)]
struct StoredEntry {
    value: CachedQuery,
    bytes: usize,
    expires_at: Instant,
    last_used: AtomicU64,
}

type FlightResult = Option<Result<CachedQuery, RouteError>>;

#[derive(Clone)]
struct Flight {
    rx: watch::Receiver<FlightResult>,
}

/// Counters for the status tool.
#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

/// Serializable cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// The response cache.
pub struct ResponseCache {
    entries: DashMap<String, StoredEntry>,
    inflight: DashMap<String, Flight>,
    clock: AtomicU64,
    current_bytes: AtomicUsize,
    default_ttl: Duration,
    max_bytes: usize,
    max_entries: usize,
    counters: CacheCounters,
    metrics: Option<Arc<Metrics>>,
}

/// Removes the in-flight marker even when the leader's future is dropped
/// mid-produce, so abandoned flights cannot wedge a key.
struct FlightGuard<'a> {
    cache: &'a ResponseCache,
    key: &'a str,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.inflight.remove(self.key);
    }
}

impl ResponseCache {
    pub fn new(default_ttl: Duration, max_bytes: usize, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            clock: AtomicU64::new(0),
            current_bytes: AtomicUsize::new(0),
            default_ttl,
            max_bytes: max_bytes.max(1),
            max_entries: max_entries.max(1),
            counters: CacheCounters::default(),
            metrics: None,
        }
    }

    /// Like `new`, but hit/miss/coalesced/evicted events are also counted
    /// in the Prometheus registry.
    pub fn new_with_metrics(
        default_ttl: Duration,
        max_bytes: usize,
        max_entries: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        let mut cache = Self::new(default_ttl, max_bytes, max_entries);
        cache.metrics = Some(metrics);
        cache
    }

    fn note_event(&self, event: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_cache_event(event);
        }
    }

    /// Look up a settled entry. Expired entries are removed lazily here.
    pub fn get(&self, key: &str) -> Option<CachedQuery> {
        let expired = {
            match self.entries.get(key) {
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    self.note_event("miss");
                    return None;
                }
                Some(entry) => {
                    if Instant::now() < entry.expires_at {
                        let stamp = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
                        entry.last_used.store(stamp, Ordering::Relaxed);
                        self.counters.hits.fetch_add(1, Ordering::Relaxed);
                        self.note_event("hit");
                        return Some(entry.value.clone());
                    }
                    true
                }
            }
        };

        if expired {
            self.remove_entry(key);
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        self.note_event("miss");
        None
    }

    /// Insert a settled value with an explicit TTL.
    ///
    /// Only successful results are cacheable; failures travel through the
    /// single-flight latch but are never stored.
    pub fn put(&self, key: &str, value: CachedQuery, ttl: Duration) {
        let bytes = key.len() + value.response.len() + value.endpoint_used.len();
        let stamp = self.clock.fetch_add(1, Ordering::Relaxed) + 1;

        let previous = self.entries.insert(
            key.to_string(),
            StoredEntry {
                value,
                bytes,
                expires_at: Instant::now() + ttl,
                last_used: AtomicU64::new(stamp),
            },
        );
        if let Some(old) = previous {
            self.current_bytes.fetch_sub(old.bytes, Ordering::Relaxed);
        }
        self.current_bytes.fetch_add(bytes, Ordering::Relaxed);

        self.evict_over_caps();
    }

    pub fn invalidate(&self, key: &str) {
        self.remove_entry(key);
    }

    /// Single-flight lookup-or-produce.
    ///
    /// The first caller for a missing key becomes the leader and runs
    /// `producer`; concurrent callers wait on the leader's latch and get
    /// the same result. A cancelled leader cancels every waiter with the
    /// same error rather than promoting one of them.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        producer: F,
    ) -> (RouteResult<CachedQuery>, CacheOutcome)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RouteResult<CachedQuery>>,
    {
        loop {
            if let Some(value) = self.get(key) {
                return (Ok(value), CacheOutcome::Hit);
            }

            // Try to become the leader for this key.
            let tx = match self.inflight.entry(key.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(existing) => {
                    let mut rx = existing.get().rx.clone();
                    drop(existing);
                    self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                    self.note_event("coalesced");

                    loop {
                        let settled = rx.borrow().clone();
                        if let Some(result) = settled {
                            return (result, CacheOutcome::Coalesced);
                        }
                        if rx.changed().await.is_err() {
                            // Leader vanished without settling (dropped
                            // future). Retry from the top; someone has to
                            // become the new leader.
                            break;
                        }
                    }
                    continue;
                }
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let (tx, rx) = watch::channel(None);
                    slot.insert(Flight { rx });
                    tx
                }
            };

            // Leader path. The guard clears the in-flight marker even if
            // this future is dropped mid-produce.
            let guard = FlightGuard { cache: self, key };

            // A previous leader may have settled between our miss and the
            // flight install; serve its entry instead of re-producing.
            if let Some(value) = self.get(key) {
                let _ = tx.send(Some(Ok(value.clone())));
                drop(guard);
                return (Ok(value), CacheOutcome::Hit);
            }

            let result = producer().await;

            if let Ok(value) = &result {
                self.put(key, value.clone(), self.default_ttl);
            }

            let _ = tx.send(Some(result.clone()));
            drop(guard);

            return (result, CacheOutcome::MissLeader);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStatsSnapshot {
            entries: self.entries.len(),
            bytes: self.current_bytes.load(Ordering::Relaxed),
            hits,
            misses,
            coalesced: self.counters.coalesced.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    fn remove_entry(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.current_bytes.fetch_sub(entry.bytes, Ordering::Relaxed);
        }
    }

    /// LRU eviction down to the caps. Keys with a running producer are
    /// exempt.
    fn evict_over_caps(&self) {
        while self.entries.len() > self.max_entries
            || self.current_bytes.load(Ordering::Relaxed) > self.max_bytes
        {
            let victim = self
                .entries
                .iter()
                .filter(|kv| !self.inflight.contains_key(kv.key()))
                .min_by_key(|kv| kv.value().last_used.load(Ordering::Relaxed))
                .map(|kv| kv.key().clone());

            match victim {
                Some(key) => {
                    self.remove_entry(&key);
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    self.note_event("evicted");
                    tracing::debug!(key = %key, "Evicted least-recently-used cache entry");
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    fn value(response: &str) -> CachedQuery {
        CachedQuery {
            response: response.to_string(),
            endpoint_used: "local".to_string(),
            completed_at: Utc::now(),
            token_usage: TokenUsage::default(),
        }
    }

    fn cache() -> ResponseCache {
        ResponseCache::new(Duration::from_secs(60), 1024 * 1024, 64)
    }

    #[test]
    fn test_put_then_get_within_ttl() {
        let cache = cache();
        cache.put("k", value("v"), Duration::from_secs(60));
        let got = cache.get("k").expect("entry within ttl");
        assert_eq!(got.response, "v");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entry_is_a_miss_and_removed() {
        let cache = cache();
        cache.put("k", value("v"), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0, "expired entry must be removed lazily");
    }

    #[test]
    fn test_invalidate_removes_entry() {
        let cache = cache();
        cache.put("k", value("v"), Duration::from_secs(60));
        cache.invalidate("k");
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_entry_cap_evicts_least_recently_used() {
        let cache = ResponseCache::new(Duration::from_secs(60), 1024 * 1024, 3);
        cache.put("a", value("1"), Duration::from_secs(60));
        cache.put("b", value("2"), Duration::from_secs(60));
        cache.put("c", value("3"), Duration::from_secs(60));

        // Touch "a" so "b" is the least recently used.
        let _ = cache.get("a");
        cache.put("d", value("4"), Duration::from_secs(60));

        assert_eq!(cache.len(), 3);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none(), "LRU entry must be evicted");
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn test_byte_cap_evicts() {
        let big = "x".repeat(600);
        let cache = ResponseCache::new(Duration::from_secs(60), 1000, 64);
        cache.put("a", value(&big), Duration::from_secs(60));
        cache.put("b", value(&big), Duration::from_secs(60));

        assert_eq!(cache.len(), 1, "byte cap must force eviction");
        let stats = cache.stats();
        assert!(stats.bytes <= 1000);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test]
    async fn test_get_or_compute_leader_and_hit() {
        let cache = cache();
        let (result, outcome) = cache
            .get_or_compute("k", || async { Ok(value("computed")) })
            .await;
        assert_eq!(result.unwrap().response, "computed");
        assert_eq!(outcome, CacheOutcome::MissLeader);

        let (result, outcome) = cache
            .get_or_compute("k", || async {
                panic!("producer must not run on a hit")
            })
            .await;
        assert_eq!(result.unwrap().response, "computed");
        assert_eq!(outcome, CacheOutcome::Hit);
    }

    #[tokio::test]
    async fn test_single_flight_one_producer_many_waiters() {
        let cache = Arc::new(cache());
        let producer_runs = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let cache = cache.clone();
            let runs = producer_runs.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("shared", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(value("one"))
                    })
                    .await
            }));
        }

        let mut leaders = 0;
        for handle in handles {
            let (result, outcome) = handle.await.unwrap();
            assert_eq!(result.unwrap().response, "one");
            if outcome == CacheOutcome::MissLeader {
                leaders += 1;
            }
        }

        assert_eq!(producer_runs.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_producer_not_cached_waiters_share_error() {
        let cache = Arc::new(cache());
        let producer_runs = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            let runs = producer_runs.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("failing", || async move {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Err(RouteError::Cancelled)
                    })
                    .await
            }));
        }

        for handle in handles {
            let (result, _) = handle.await.unwrap();
            assert_eq!(result.unwrap_err().kind(), "cancelled");
        }

        assert_eq!(
            producer_runs.load(Ordering::SeqCst),
            1,
            "waiters share the leader's failure"
        );
        assert!(cache.is_empty(), "failures are never cached");
    }

    #[tokio::test]
    async fn test_failure_then_success_recomputes() {
        let cache = cache();
        let (result, _) = cache
            .get_or_compute("k", || async { Err(RouteError::Cancelled) })
            .await;
        assert!(result.is_err());

        let (result, outcome) = cache
            .get_or_compute("k", || async { Ok(value("second")) })
            .await;
        assert_eq!(result.unwrap().response, "second");
        assert_eq!(outcome, CacheOutcome::MissLeader);
    }

    #[tokio::test]
    async fn test_dropped_leader_unwedges_key() {
        let cache = Arc::new(cache());

        // A leader that never settles, dropped mid-produce.
        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute("k", || async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(value("never"))
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        leader.abort();
        let _ = leader.await;

        // A later caller must be able to take over the key.
        let (result, _) = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_compute("k", || async { Ok(value("recovered")) }),
        )
        .await
        .expect("key must not stay wedged");
        assert_eq!(result.unwrap().response, "recovered");
    }

    #[test]
    fn test_events_are_counted_in_metrics() {
        let metrics = Arc::new(crate::metrics::Metrics::new().unwrap());
        let cache = ResponseCache::new_with_metrics(
            Duration::from_secs(60),
            1024 * 1024,
            2,
            metrics.clone(),
        );

        cache.put("a", value("1"), Duration::from_secs(60));
        let _ = cache.get("a"); // hit
        let _ = cache.get("absent"); // miss
        cache.put("b", value("2"), Duration::from_secs(60));
        cache.put("c", value("3"), Duration::from_secs(60)); // evicts LRU

        let text = metrics.gather().unwrap();
        assert!(text.contains("switchyard_cache_events_total"));
        assert!(text.contains(r#"event="hit""#));
        assert!(text.contains(r#"event="miss""#));
        assert!(text.contains(r#"event="evicted""#));
    }

    #[test]
    fn test_stats_snapshot() {
        let cache = cache();
        cache.put("k", value("v"), Duration::from_secs(60));
        let _ = cache.get("k");
        let _ = cache.get("absent");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }
}
