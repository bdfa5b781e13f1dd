//! Counter/cache store seam and the in-process implementation.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Add `delta` to `field` of hash `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterIncrement {
    pub key: String,
    pub field: String,
    pub delta: i64,
}

impl CounterIncrement {
    pub fn new(key: impl Into<String>, field: impl Into<String>, delta: i64) -> Self {
        Self {
            key: key.into(),
            field: field.into(),
            delta,
        }
    }
}

/// An atomic hash-of-counters store with a small expiring response cache.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Apply every increment, atomically relative to other updates.
    async fn increment_batch(&self, increments: &[CounterIncrement]) -> Result<(), CounterError>;

    async fn get_all(&self, key: &str) -> Result<HashMap<String, i64>, CounterError>;

    async fn delete(&self, keys: &[String]) -> Result<(), CounterError>;

    async fn get_cached(&self, key: &str, field: &str) -> Result<Option<String>, CounterError>;

    /// Current generation of cache hash `key`. Every invalidation bumps it.
    async fn cache_generation(&self, key: &str) -> Result<u64, CounterError>;

    /// Store `value` under `field` of cache hash `key`, but only while the
    /// hash is still at `generation`. Returns whether the value was stored.
    /// The expiry is set when the hash is first created and is not extended
    /// by later writes.
    async fn set_cached(
        &self,
        key: &str,
        field: &str,
        value: String,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool, CounterError>;

    /// Drop cache hash `key` and bump its generation.
    async fn invalidate(&self, key: &str) -> Result<(), CounterError>;

    async fn ping(&self) -> Result<(), CounterError> {
        Ok(())
    }
}

struct CachedHash {
    fields: HashMap<String, String>,
    expires_at: Instant,
}

#[derive(Default)]
struct CacheState {
    hashes: HashMap<String, CachedHash>,
    /// Only ever incremented, never removed.
    generations: HashMap<String, u64>,
}

impl CacheState {
    fn generation(&self, key: &str) -> u64 {
        self.generations.get(key).copied().unwrap_or_default()
    }
}

/// In-process [`CounterStore`]. Counters do not survive restarts.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, HashMap<String, i64>>>,
    cache: Mutex<CacheState>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> CounterError {
    CounterError::Unavailable("lock poisoned".to_string())
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment_batch(&self, increments: &[CounterIncrement]) -> Result<(), CounterError> {
        let mut counters = self.counters.lock().map_err(poisoned)?;
        for inc in increments {
            *counters
                .entry(inc.key.clone())
                .or_default()
                .entry(inc.field.clone())
                .or_default() += inc.delta;
        }
        Ok(())
    }

    async fn get_all(&self, key: &str) -> Result<HashMap<String, i64>, CounterError> {
        let counters = self.counters.lock().map_err(poisoned)?;
        Ok(counters.get(key).cloned().unwrap_or_default())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), CounterError> {
        let mut counters = self.counters.lock().map_err(poisoned)?;
        let mut cache = self.cache.lock().map_err(poisoned)?;
        for key in keys {
            counters.remove(key);
            cache.hashes.remove(key);
        }
        Ok(())
    }

    async fn get_cached(&self, key: &str, field: &str) -> Result<Option<String>, CounterError> {
        let mut cache = self.cache.lock().map_err(poisoned)?;
        if cache
            .hashes
            .get(key)
            .is_some_and(|hash| hash.expires_at <= Instant::now())
        {
            cache.hashes.remove(key);
        }
        Ok(cache
            .hashes
            .get(key)
            .and_then(|hash| hash.fields.get(field).cloned()))
    }

    async fn cache_generation(&self, key: &str) -> Result<u64, CounterError> {
        let cache = self.cache.lock().map_err(poisoned)?;
        Ok(cache.generation(key))
    }

    async fn set_cached(
        &self,
        key: &str,
        field: &str,
        value: String,
        ttl: Duration,
        generation: u64,
    ) -> Result<bool, CounterError> {
        let mut cache = self.cache.lock().map_err(poisoned)?;
        if cache.generation(key) != generation {
            return Ok(false);
        }
        let now = Instant::now();
        let hash = cache.hashes.entry(key.to_string()).or_insert_with(|| CachedHash {
            fields: HashMap::new(),
            expires_at: now + ttl,
        });
        if hash.expires_at <= now {
            hash.fields.clear();
            hash.expires_at = now + ttl;
        }
        hash.fields.insert(field.to_string(), value);
        Ok(true)
    }

    async fn invalidate(&self, key: &str) -> Result<(), CounterError> {
        let mut cache = self.cache.lock().map_err(poisoned)?;
        cache.hashes.remove(key);
        *cache.generations.entry(key.to_string()).or_default() += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batch_increments_accumulate() {
        let store = MemoryCounterStore::new();
        store
            .increment_batch(&[
                CounterIncrement::new("k", "v1:Active", 1),
                CounterIncrement::new("k", "v1:Active", 1),
                CounterIncrement::new("other", "v0:Active", -1),
            ])
            .await
            .unwrap();
        let all = store.get_all("k").await.unwrap();
        assert_eq!(all["v1:Active"], 2);
        assert_eq!(store.get_all("other").await.unwrap()["v0:Active"], -1);
        assert!(store.get_all("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_removes_counters_and_cache() {
        let store = MemoryCounterStore::new();
        store
            .increment_batch(&[CounterIncrement::new("k", "f", 1)])
            .await
            .unwrap();
        store
            .set_cached("k", "url", "body".to_string(), Duration::from_secs(60), 0)
            .await
            .unwrap();
        store.delete(&["k".to_string()]).await.unwrap();
        assert!(store.get_all("k").await.unwrap().is_empty());
        assert_eq!(store.get_cached("k", "url").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cache_expires() {
        let store = MemoryCounterStore::new();
        store
            .set_cached("k", "url", "body".to_string(), Duration::from_secs(60), 0)
            .await
            .unwrap();
        assert_eq!(
            store.get_cached("k", "url").await.unwrap().as_deref(),
            Some("body")
        );

        store
            .set_cached("short", "url", "body".to_string(), Duration::ZERO, 0)
            .await
            .unwrap();
        assert_eq!(store.get_cached("short", "url").await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalidate_drops_cached_hash() {
        let store = MemoryCounterStore::new();
        store
            .set_cached("k", "a", "1".to_string(), Duration::from_secs(60), 0)
            .await
            .unwrap();
        store.invalidate("k").await.unwrap();
        assert_eq!(store.get_cached("k", "a").await.unwrap(), None);
        assert_eq!(store.cache_generation("k").await.unwrap(), 1);
        assert_eq!(store.cache_generation("other").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn write_from_before_invalidation_is_refused() {
        let store = MemoryCounterStore::new();
        let generation = store.cache_generation("k").await.unwrap();
        store.invalidate("k").await.unwrap();

        let stored = store
            .set_cached("k", "url", "stale".to_string(), Duration::from_secs(60), generation)
            .await
            .unwrap();
        assert!(!stored);
        assert_eq!(store.get_cached("k", "url").await.unwrap(), None);

        let current = store.cache_generation("k").await.unwrap();
        let stored = store
            .set_cached("k", "url", "fresh".to_string(), Duration::from_secs(60), current)
            .await
            .unwrap();
        assert!(stored);
        assert_eq!(
            store.get_cached("k", "url").await.unwrap().as_deref(),
            Some("fresh")
        );
    }
}
