//! Worker-side cache of raw HTTP responses using moka.
//!
//! Raw bytes are cached by URL so a tile unloaded on the coordinator and
//! requested again shortly after does not hit the network. Entries are
//! weighted by payload size and expire according to their own cache headers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use moka::future::Cache;
use moka::Expiry;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::fetch::{BoxFuture, FetchResponse, TileFetcher};
use super::FetchError;
use crate::tile::ExpiryData;

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseCacheConfig {
    /// Total payload bytes kept.
    pub max_bytes: u64,
    /// TTL for responses without cache headers, and upper bound for all.
    pub max_ttl: Duration,
}

impl Default for ResponseCacheConfig {
    fn default() -> Self {
        Self {
            max_bytes: 64 * 1024 * 1024,
            max_ttl: Duration::from_secs(300),
        }
    }
}

impl ResponseCacheConfig {
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_max_ttl(mut self, max_ttl: Duration) -> Self {
        self.max_ttl = max_ttl;
        self
    }
}

/// Whole seconds left of `ttl` after `elapsed`, rounded up so a live entry
/// never reports `max-age=0`.
fn remaining_max_age(ttl: Duration, elapsed: Duration) -> u64 {
    let remaining = ttl.saturating_sub(elapsed);
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}

#[derive(Debug, Clone)]
struct CachedResponse {
    data: Bytes,
    expiry: ExpiryData,
    stored_at: Instant,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<String, CachedResponse> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedResponse,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Point-in-time response cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: u64,
    pub weighted_bytes: u64,
}

/// Size-bounded, TTL-aware cache of raw responses.
pub struct ResponseCache {
    cache: Cache<String, CachedResponse>,
    max_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &ResponseCacheConfig) -> Self {
        let cache = Cache::builder()
            // Weight each entry by its payload size
            .weigher(|_key: &String, value: &CachedResponse| -> u32 {
                value.data.len().clamp(1, u32::MAX as usize) as u32
            })
            .max_capacity(config.max_bytes)
            .expire_after(PerEntryTtl)
            .build();

        Self {
            cache,
            max_ttl: config.max_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up `url`.
    ///
    /// The returned expiry is rewritten as a `max-age` for the remaining
    /// lifetime, so the coordinator does not restart the original TTL.
    pub async fn get(&self, url: &str) -> Option<FetchResponse> {
        match self.cache.get(url).await {
            Some(cached) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                let expiry = if cached.expiry.is_empty() {
                    ExpiryData::default()
                } else {
                    let max_age = remaining_max_age(cached.ttl, cached.stored_at.elapsed());
                    ExpiryData::new(Some(format!("max-age={max_age}")), None)
                };
                Some(FetchResponse::new(cached.data, expiry))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a response unless its headers forbid it or it is already stale.
    pub async fn insert(&self, url: &str, response: &FetchResponse) -> bool {
        let Some(ttl) = self.ttl_for(&response.expiry) else {
            trace!(url, "Response not cacheable");
            return false;
        };
        self.cache
            .insert(
                url.to_string(),
                CachedResponse {
                    data: response.data.clone(),
                    expiry: response.expiry.clone(),
                    stored_at: Instant::now(),
                    ttl,
                },
            )
            .await;
        true
    }

    pub async fn invalidate(&self, url: &str) {
        self.cache.invalidate(url).await;
    }

    pub fn stats(&self) -> ResponseCacheStats {
        ResponseCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
            weighted_bytes: self.cache.weighted_size(),
        }
    }

    /// Run moka's pending maintenance (eviction, expiry).
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    fn ttl_for(&self, expiry: &ExpiryData) -> Option<Duration> {
        if !expiry.is_cacheable() || expiry.cache_control().no_cache {
            return None;
        }
        let ttl = match expiry.time_to_live(Utc::now()) {
            Some(ttl) => ttl.to_std().ok()?,
            None => self.max_ttl,
        };
        if ttl.is_zero() {
            return None;
        }
        Some(ttl.min(self.max_ttl))
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("max_ttl", &self.max_ttl)
            .field("stats", &self.stats())
            .finish()
    }
}

/// [`TileFetcher`] decorator that consults a [`ResponseCache`] first.
pub struct CachingFetcher<F> {
    inner: F,
    cache: Arc<ResponseCache>,
}

impl<F: TileFetcher> CachingFetcher<F> {
    pub fn new(inner: F, cache: Arc<ResponseCache>) -> Self {
        Self { inner, cache }
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }
}

impl<F: TileFetcher> TileFetcher for CachingFetcher<F> {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, Result<FetchResponse, FetchError>> {
        Box::pin(async move {
            if let Some(hit) = self.cache.get(url).await {
                trace!(url, "Response cache hit");
                return Ok(hit);
            }
            let response = self.inner.fetch(url, cancel).await?;
            self.cache.insert(url, &response).await;
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryFetcher;

    fn cache() -> Arc<ResponseCache> {
        Arc::new(ResponseCache::new(&ResponseCacheConfig::default()))
    }

    #[tokio::test]
    async fn test_second_fetch_served_from_cache() {
        let fetcher = CachingFetcher::new(MemoryFetcher::synthetic(), cache());
        let first = fetcher.fetch("t/1/0/0", CancellationToken::new()).await.unwrap();
        let second = fetcher.fetch("t/1/0/0", CancellationToken::new()).await.unwrap();
        assert_eq!(first.data, second.data);
        assert_eq!(fetcher.inner().fetch_count(), 1);

        let stats = fetcher.cache().stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_no_store_bypasses_cache() {
        let inner = MemoryFetcher::synthetic()
            .with_expiry(ExpiryData::new(Some("no-store".into()), None));
        let fetcher = CachingFetcher::new(inner, cache());
        fetcher.fetch("t/1/0/0", CancellationToken::new()).await.unwrap();
        fetcher.fetch("t/1/0/0", CancellationToken::new()).await.unwrap();
        assert_eq!(fetcher.inner().fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_hit_reports_remaining_max_age() {
        let cache = cache();
        let response = FetchResponse::new(
            Bytes::from_static(b"abc"),
            ExpiryData::new(Some("max-age=120".into()), None),
        );
        assert!(cache.insert("u", &response).await);
        let hit = cache.get("u").await.unwrap();
        let max_age = hit.expiry.cache_control().max_age.unwrap();
        assert!(max_age <= 120 && max_age >= 119);
    }

    #[test]
    fn test_remaining_max_age_rounds_up() {
        let ttl = Duration::from_secs(10);
        assert_eq!(remaining_max_age(ttl, Duration::ZERO), 10);
        assert_eq!(remaining_max_age(ttl, Duration::from_millis(9_400)), 1);
        assert_eq!(remaining_max_age(ttl, Duration::from_millis(8_999)), 2);
        assert_eq!(remaining_max_age(ttl, Duration::from_secs(10)), 0);
        assert_eq!(remaining_max_age(ttl, Duration::from_secs(11)), 0);
    }

    #[tokio::test]
    async fn test_stale_response_not_cached() {
        let cache = cache();
        let response = FetchResponse::new(
            Bytes::from_static(b"abc"),
            ExpiryData::new(Some("max-age=0".into()), None),
        );
        assert!(!cache.insert("u", &response).await);
        assert!(cache.get("u").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = cache();
        cache.insert("u", &FetchResponse::new(Bytes::from_static(b"x"), ExpiryData::default())).await;
        cache.invalidate("u").await;
        assert!(cache.get("u").await.is_none());
    }
}
