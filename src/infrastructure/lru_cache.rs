//! In-process range-result cache backed by an LRU map with per-entry expiry.

use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::errors::CacheError;
use crate::domain::repositories::kpi_cache::KpiCache;

const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Cache performance statistics
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

struct CachedEntry {
    value: String,
    expires_at: Instant,
}

struct Inner {
    entries: LruCache<String, CachedEntry>,
    stats: CacheStats,
}

pub struct LruKpiCache {
    inner: Mutex<Inner>,
}

impl LruKpiCache {
    /// A zero capacity falls back to the default of 1024 entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(DEFAULT_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.entries.is_empty()
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats.clone()
    }
}

impl Default for LruKpiCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY.get())
    }
}

#[async_trait]
impl KpiCache for LruKpiCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let lookup = inner
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now, entry.value.clone()));

        match lookup {
            Some((true, value)) => {
                inner.stats.hits += 1;
                debug!(
                    cache_key = key,
                    cache_hit_rate = format!("{:.2}%", inner.stats.hit_rate()),
                    "Cache hit"
                );
                Ok(Some(value))
            }
            Some((false, _)) => {
                inner.entries.pop(key);
                inner.stats.expirations += 1;
                inner.stats.misses += 1;
                debug!(cache_key = key, "Cache entry expired");
                Ok(None)
            }
            None => {
                inner.stats.misses += 1;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CacheError::Unavailable(format!("TTL out of range: {:?}", ttl)))?;

        let mut inner = self.inner.lock().await;
        inner
            .entries
            .put(key.to_string(), CachedEntry { value, expires_at });
        debug!(cache_key = key, cache_size = inner.entries.len(), "Cached range result");
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut inner = self.inner.lock().await;
        let doomed: Vec<String> = inner
            .entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            inner.entries.pop(key);
        }

        let removed = doomed.len() as u64;
        inner.stats.invalidations += removed;
        debug!(prefix, removed, "Invalidated cached ranges");
        Ok(removed)
    }
}
