//! TTL response cache.
//!
//! Memoises vendor responses under canonical keys so repeated scans within
//! a data kind's staleness window cost no API credits. Entries are evicted
//! lazily on read; `prune` is available for proactive cleanup.
//!
//! The whole cache sits behind a single mutex. `get_or_fetch` releases the
//! lock while the fetch is in flight, so two concurrent misses for the same
//! key will both fetch and the later write wins.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Credits charged for a fetch when the caller does not specify a cost.
pub const DEFAULT_FETCH_COST: u32 = 1;

// ---------------------------------------------------------------------------
// Key canonicalisation
// ---------------------------------------------------------------------------

/// Build a canonical cache key: `prefix:k1=v1&k2=v2...`.
///
/// Parameter names are sorted and values JSON-encoded, so the key does not
/// depend on the order parameters were supplied in. Non-object params are
/// encoded whole.
pub fn make_key<P: Serialize>(prefix: &str, params: &P) -> String {
    let value = serde_json::to_value(params).unwrap_or(Value::Null);
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            let query = pairs
                .into_iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join("&");
            format!("{prefix}:{query}")
        }
        Value::Null => format!("{prefix}:"),
        other => format!("{prefix}:{other}"),
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    value: Value,
    expires_at: Instant,
    hit_count: u64,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    hits: u64,
    misses: u64,
    credits_saved: u64,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub credits_saved: u64,
}

impl CacheStats {
    /// Cache hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// In-memory TTL cache of JSON values.
#[derive(Default)]
pub struct Cache {
    inner: Mutex<CacheInner>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value if present and unexpired.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) if entry.is_live(now) => Some(entry.value.clone()),
            Some(_) => {
                inner.entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a value for `ttl`.
    pub fn set(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
            hit_count: 0,
        };
        self.inner.lock().entries.insert(key.into(), entry);
    }

    /// Serve `key` from cache, or run `fetch` and cache its result.
    ///
    /// A hit adds `cost` to the credits-saved counter. Fetch errors are
    /// returned as-is and nothing is cached. A cached value that no longer
    /// deserialises as `T` is treated as a miss.
    pub async fn get_or_fetch<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        cost: u32,
        fetch: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.lookup_hit(key, cost) {
            match serde_json::from_value::<T>(value) {
                Ok(v) => {
                    debug!(cache_key = %key, cost, "Cache hit");
                    return Ok(v);
                }
                Err(e) => {
                    warn!(cache_key = %key, error = %e, "Cached value has wrong shape, refetching");
                    self.invalidate(key);
                }
            }
        }

        self.inner.lock().misses += 1;
        debug!(cache_key = %key, "Cache miss");

        let fetched = fetch().await?;
        let value = serde_json::to_value(&fetched)
            .with_context(|| format!("Failed to serialise cache value for {key}"))?;
        self.set(key, value, ttl);
        Ok(fetched)
    }

    /// Count a hit and return the live value, if any.
    fn lookup_hit(&self, key: &str, cost: u32) -> Option<Value> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let value = match inner.entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.hit_count += 1;
                entry.value.clone()
            }
            _ => return None,
        };
        inner.hits += 1;
        inner.credits_saved += u64::from(cost);
        Some(value)
    }

    /// Times an entry has been served from cache (None if absent or expired).
    pub fn hit_count(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        let inner = self.inner.lock();
        inner
            .entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.hit_count)
    }

    /// Remove a single key. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Remove every key the predicate matches. Returns the number removed.
    ///
    /// Pattern invalidation: pass a prefix test, a substring test or a
    /// compiled regex's `is_match`.
    pub fn invalidate_matching<F>(&self, mut matches: F) -> usize
    where
        F: FnMut(&str) -> bool,
    {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|k, _| !matches(k));
        before - inner.entries.len()
    }

    /// Drop all entries. Counters are kept.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Remove expired entries. Returns the number removed.
    pub fn prune(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, e| e.is_live(now));
        before - inner.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            hits: inner.hits,
            misses: inner.misses,
            credits_saved: inner.credits_saved,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
