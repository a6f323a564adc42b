//! Response Cache
//!
//! In-memory TTL cache for successful read responses.
//!
//! Entries are keyed by method, path and sorted query. Expiry is checked on
//! lookup; an optional background sweeper purges entries nobody asks for.
//!
//! Every invalidation bumps a generation counter. A read that missed the
//! cache stores its response with [`ResponseCache::put_if_unchanged`], so a
//! response fetched before an overlapping write completed is never stored.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::core::HttpMethod;
use crate::types::{ApiResponse, RequestDescriptor};

/// Identity of a cacheable request.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: HttpMethod,
    path: String,
    query: Vec<(String, String)>,
}

impl CacheKey {
    /// Build a key; the query is sorted so parameter order does not matter.
    pub fn new(method: HttpMethod, path: &str, query: &[(String, String)]) -> Self {
        let mut query = query.to_vec();
        query.sort();
        Self {
            method,
            path: normalize_path(path),
            query,
        }
    }

    /// Key for `request`, or `None` for methods that are never cached.
    pub fn for_request(request: &RequestDescriptor) -> Option<Self> {
        request
            .method()
            .is_read()
            .then(|| Self::new(request.method(), request.path(), request.query_params()))
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check whether this key reads `resource` or something beneath it.
    pub fn is_under(&self, resource: &str) -> bool {
        match self.path.strip_prefix(resource) {
            Some(rest) => rest.is_empty() || rest.starts_with('/') || resource == "/",
            None => false,
        }
    }
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Cached response snapshot.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub response: ApiResponse,
    pub created_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > ttl
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries dropped because they outlived the TTL.
    pub evictions: u64,
    /// Entries dropped by writes or explicit removal.
    pub invalidations: u64,
    pub entries: usize,
}

struct CacheInner {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    /// Bumped with `entries` locked, on every invalidation.
    generation: AtomicU64,
    stats: Mutex<CacheStats>,
}

/// TTL response cache.
///
/// Cloning yields a handle to the same cache.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

impl ResponseCache {
    /// Create an empty cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                ttl,
                entries: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
                stats: Mutex::new(CacheStats::default()),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Look up a response. Expired entries are removed and reported absent.
    pub fn get(&self, key: &CacheKey) -> Option<ApiResponse> {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock();

        let lookup = entries.get(key).map(|entry| {
            (!entry.is_expired(self.inner.ttl, now)).then(|| entry.response.clone())
        });

        let result = match lookup {
            Some(Some(mut response)) => {
                response.from_cache = true;
                Some(response)
            }
            Some(None) => {
                entries.remove(key);
                self.inner.stats.lock().evictions += 1;
                trace!(path = %key.path, "cache entry expired");
                None
            }
            None => None,
        };
        drop(entries);

        let mut stats = self.inner.stats.lock();
        if result.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }
        result
    }

    /// Current invalidation generation.
    ///
    /// Read it when a lookup misses and pass it to
    /// [`put_if_unchanged`](Self::put_if_unchanged) once the response arrives.
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Store a response, replacing any previous entry for `key`.
    pub fn put(&self, key: CacheKey, response: ApiResponse) {
        self.inner.entries.lock().insert(key, Self::entry(response));
    }

    /// Store a response unless an invalidation happened after `generation`
    /// was read. Returns whether the response was stored.
    pub fn put_if_unchanged(&self, key: CacheKey, response: ApiResponse, generation: u64) -> bool {
        let mut entries = self.inner.entries.lock();
        if self.inner.generation.load(Ordering::SeqCst) != generation {
            trace!(path = %key.path, "cache invalidated while fetching, not storing");
            return false;
        }
        entries.insert(key, Self::entry(response));
        true
    }

    fn entry(response: ApiResponse) -> CacheEntry {
        CacheEntry {
            response: ApiResponse {
                from_cache: false,
                ..response
            },
            created_at: Instant::now(),
        }
    }

    /// Remove one entry.
    pub fn remove(&self, key: &CacheKey) -> bool {
        let removed = {
            let mut entries = self.inner.entries.lock();
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            entries.remove(key).is_some()
        };
        if removed {
            self.inner.stats.lock().invalidations += 1;
        }
        removed
    }

    /// Drop every entry whose path is `resource` or lies beneath it.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_resource(&self, resource: &str) -> usize {
        let resource = normalize_path(resource);
        let mut entries = self.inner.entries.lock();
        // Bumped even when nothing matches: a read of `resource` may be in flight.
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let before = entries.len();
        entries.retain(|key, _| !key.is_under(&resource));
        let removed = before - entries.len();
        drop(entries);

        if removed > 0 {
            self.inner.stats.lock().invalidations += removed as u64;
            debug!(resource = %resource, removed, "invalidated cached reads");
        }
        removed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let removed = {
            let mut entries = self.inner.entries.lock();
            self.inner.generation.fetch_add(1, Ordering::SeqCst);
            let removed = entries.len();
            entries.clear();
            removed
        };
        self.inner.stats.lock().invalidations += removed as u64;
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.inner.ttl;
        let mut entries = self.inner.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(ttl, now));
        let removed = before - entries.len();
        drop(entries);

        if removed > 0 {
            self.inner.stats.lock().evictions += removed as u64;
            trace!(removed, "purged expired cache entries");
        }
        removed
    }

    /// Entries currently stored, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let entries = self.len();
        CacheStats {
            entries,
            ..self.inner.stats.lock().clone()
        }
    }

    /// Purge expired entries every `interval` until the cache is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(inner) => {
                        ResponseCache { inner }.purge_expired();
                    }
                    None => break,
                }
            }
            debug!("cache sweeper stopped");
        })
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.inner.ttl)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HttpResponse;

    fn response(body: &str) -> ApiResponse {
        HttpResponse::new(200, body).into()
    }

    fn key(path: &str) -> CacheKey {
        CacheKey::new(HttpMethod::Get, path, &[])
    }

    #[test]
    fn test_key_ignores_query_order() {
        let a = CacheKey::new(
            HttpMethod::Get,
            "/todos",
            &[("b".into(), "2".into()), ("a".into(), "1".into())],
        );
        let b = CacheKey::new(
            HttpMethod::Get,
            "/todos/",
            &[("a".into(), "1".into()), ("b".into(), "2".into())],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_only_for_reads() {
        assert!(CacheKey::for_request(&RequestDescriptor::get("/todos")).is_some());
        assert!(CacheKey::for_request(&RequestDescriptor::post("/todos")).is_none());
        assert!(CacheKey::for_request(&RequestDescriptor::delete("/todos/1")).is_none());
    }

    #[test]
    fn test_is_under() {
        assert!(key("/todos").is_under("/todos"));
        assert!(key("/todos/1").is_under("/todos"));
        assert!(!key("/todos-archive").is_under("/todos"));
        assert!(!key("/users").is_under("/todos"));
        assert!(key("/users").is_under("/"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_then_expiry() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.put(key("/todos"), response("[]"));

        let hit = cache.get(&key("/todos")).unwrap();
        assert!(hit.from_cache);
        assert_eq!(hit.body, "[]");

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.get(&key("/todos")).is_some());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(cache.get(&key("/todos")).is_none());
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_overwrites_and_restarts_age() {
        let cache = ResponseCache::new(Duration::from_secs(10));
        cache.put(key("/todos"), response("old"));
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.put(key("/todos"), response("new"));
        tokio::time::advance(Duration::from_secs(8)).await;

        assert_eq!(cache.get(&key("/todos")).unwrap().body, "new");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_resource() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.put(key("/todos"), response("list"));
        cache.put(key("/todos/1"), response("one"));
        cache.put(
            CacheKey::new(HttpMethod::Get, "/todos", &[("page".into(), "2".into())]),
            response("page 2"),
        );
        cache.put(key("/users"), response("users"));

        assert_eq!(cache.invalidate_resource("/todos"), 3);
        assert!(cache.get(&key("/todos")).is_none());
        assert!(cache.get(&key("/users")).is_some());
        assert_eq!(cache.stats().invalidations, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_and_sweeper() {
        let cache = ResponseCache::new(Duration::from_secs(5));
        cache.put(key("/a"), response("a"));
        tokio::time::advance(Duration::from_secs(3)).await;
        cache.put(key("/b"), response("b"));
        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);

        let sweeper = cache.spawn_sweeper(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(cache.is_empty());

        drop(cache);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(sweeper.is_finished());
    }

    #[tokio::test]
    async fn test_put_if_unchanged_skips_after_invalidation() {
        let cache = ResponseCache::new(Duration::from_secs(60));

        let before_write = cache.generation();
        assert_eq!(cache.invalidate_resource("/todos"), 0);
        assert!(!cache.put_if_unchanged(key("/todos"), response("stale"), before_write));
        assert!(cache.is_empty());

        let after_write = cache.generation();
        assert!(cache.put_if_unchanged(key("/todos"), response("fresh"), after_write));
        assert_eq!(cache.get(&key("/todos")).unwrap().body, "fresh");
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        cache.put(key("/a"), response("a"));
        cache.put(key("/b"), response("b"));

        assert!(cache.remove(&key("/a")));
        assert!(!cache.remove(&key("/a")));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().invalidations, 2);
    }
}
