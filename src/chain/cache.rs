//! Read-through TTL cache for chain responses
//!
//! Wraps any [`BlockchainApi`]. Successful responses are kept for a fixed
//! TTL keyed by operation and argument; errors are never cached. The cache
//! holds at most `max_entries` responses and evicts the least recently used
//! one when full. Concurrent misses on the same key may both reach the
//! backend, in which case the last writer wins.

use super::{BlockchainApi, Page};
use crate::Result;
use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Inserts between sweeps of expired entries
const SWEEP_EVERY: u64 = 64;
/// Longest time an entry may live
pub const MAX_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Hit and miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub capacity: usize,
}

pub struct CachedClient<C> {
    inner: C,
    ttl: Duration,
    entries: Arc<RwLock<LruCache<String, CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
}

impl<C: BlockchainApi> CachedClient<C> {
    /// `max_entries` of 0 is treated as 1; `ttl` is capped at [`MAX_TTL`]
    pub fn new(inner: C, ttl: Duration, max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            ttl: ttl.min(MAX_TTL),
            entries: Arc::new(RwLock::new(LruCache::new(capacity))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            inserts: AtomicU64::new(0),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: entries.len(),
            capacity: entries.cap().get(),
        }
    }

    /// Drop expired entries
    pub async fn clean_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), remaining = entries.len(), "Pruned chain cache");
        }
    }

    async fn cached<F>(&self, key: String, fetch: F) -> Result<Value>
    where
        F: Future<Output = Result<Value>>,
    {
        {
            // LRU lookups update recency, so even reads take the write lock
            let mut entries = self.entries.write().await;
            let now = Instant::now();
            let found = entries
                .get(&key)
                .map(|entry| (entry.expires_at > now).then(|| entry.value.clone()));
            match found {
                Some(Some(value)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(key = %key, "Chain cache hit");
                    return Ok(value);
                }
                Some(None) => {
                    entries.pop(&key);
                }
                None => {}
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = fetch.await?;

        {
            let mut entries = self.entries.write().await;
            let evicted = entries.push(
                key.clone(),
                CacheEntry {
                    value: value.clone(),
                    expires_at: Instant::now() + self.ttl,
                },
            );
            if let Some((old_key, _)) = evicted.filter(|(old_key, _)| *old_key != key) {
                tracing::trace!(key = %old_key, "Chain cache full, evicted least recently used");
            }
        }

        if self.inserts.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.clean_expired().await;
        }
        Ok(value)
    }
}

#[async_trait]
impl<C: BlockchainApi> BlockchainApi for CachedClient<C> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn get_address_info(&self, address: &str) -> Result<Value> {
        self.cached(
            format!("address:{}", address),
            self.inner.get_address_info(address),
        )
        .await
    }

    async fn get_transaction(&self, tx_id: &str) -> Result<Value> {
        self.cached(format!("tx:{}", tx_id), self.inner.get_transaction(tx_id))
            .await
    }

    async fn get_address_transactions(&self, address: &str, page: Page) -> Result<Value> {
        self.cached(
            format!("txs:{}:{}:{}", address, page.offset, page.limit),
            self.inner.get_address_transactions(address, page),
        )
        .await
    }

    async fn get_utxos(&self, address: &str) -> Result<Value> {
        self.cached(format!("utxos:{}", address), self.inner.get_utxos(address))
            .await
    }

    async fn get_token_info(&self, token_id: &str) -> Result<Value> {
        self.cached(format!("token:{}", token_id), self.inner.get_token_info(token_id))
            .await
    }

    async fn get_network_status(&self) -> Result<Value> {
        self.cached("network".to_string(), self.inner.get_network_status())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::mock::MockChain;
    use crate::Error;
    use serde_json::json;

    #[tokio::test]
    async fn test_second_read_is_served_from_cache() {
        let mock = MockChain::new().with_address("9abc", json!({"address": "9abc", "balance": 5}));
        let cached = CachedClient::new(mock, Duration::from_secs(60), 100);

        let first = cached.get_address_info("9abc").await.unwrap();
        let second = cached.get_address_info("9abc").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cached.inner().calls_for("address:9abc"), 1);

        let stats = cached.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let mock = MockChain::new()
            .with_address("9abc", json!({"address": "9abc"}))
            .fail_next("address:9abc", 1, || Error::RateLimited("slow down".into()));
        let cached = CachedClient::new(mock, Duration::from_secs(60), 100);

        assert!(cached.get_address_info("9abc").await.is_err());
        assert!(cached.get_address_info("9abc").await.is_ok());
        assert_eq!(cached.inner().calls_for("address:9abc"), 2);
    }

    #[tokio::test]
    async fn test_entries_expire() {
        let mock = MockChain::new().with_network(json!({"height": 1}));
        let cached = CachedClient::new(mock, Duration::from_millis(10), 100);

        cached.get_network_status().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        cached.get_network_status().await.unwrap();
        assert_eq!(cached.inner().calls_for("network"), 2);

        cached.clean_expired().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        cached.clean_expired().await;
        assert_eq!(cached.stats().await.entries, 0);
    }

    #[tokio::test]
    async fn test_pages_are_keyed_separately() {
        let mock = MockChain::new().with_page("9abc", json!({"items": [], "total": 0}));
        let cached = CachedClient::new(mock, Duration::from_secs(60), 100);

        cached
            .get_address_transactions("9abc", Page::new(0, 10))
            .await
            .unwrap();
        cached
            .get_address_transactions("9abc", Page::new(10, 10))
            .await
            .unwrap();
        assert_eq!(cached.inner().calls_for("txs:9abc"), 2);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let mut mock = MockChain::new();
        for i in 0..5 {
            mock = mock.with_token(&format!("t{}", i), json!({"id": i}));
        }
        let cached = CachedClient::new(mock, Duration::from_secs(300), 3);

        for i in 0..3 {
            cached.get_token_info(&format!("t{}", i)).await.unwrap();
        }
        // t0 becomes most recent, so t1 is evicted next
        cached.get_token_info("t0").await.unwrap();
        cached.get_token_info("t3").await.unwrap();
        cached.get_token_info("t4").await.unwrap();

        let stats = cached.stats().await;
        assert_eq!(stats.entries, 3);
        assert_eq!(stats.capacity, 3);

        cached.get_token_info("t0").await.unwrap();
        assert_eq!(cached.inner().calls_for("token:t0"), 1);
        cached.get_token_info("t1").await.unwrap();
        assert_eq!(cached.inner().calls_for("token:t1"), 2);
    }
}
