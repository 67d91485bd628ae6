//! Response cache used by recovery and degradation.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::context::RequestContext;
use crate::error::BoxError;

/// Key/value store for previously successful responses.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, BoxError>;

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), BoxError>;
}

/// Deterministic cache key for a request: `resilience:<endpoint>:<sha256>`.
///
/// The digest covers the endpoint and the parameters serialized with sorted
/// keys, so equal requests map to equal keys regardless of insertion order.
pub fn cache_key(ctx: &RequestContext) -> String {
    let params = serde_json::to_string(&ctx.parameters).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(ctx.endpoint.as_bytes());
    hasher.update(b"\n");
    hasher.update(params.as_bytes());
    format!("resilience:{}:{}", ctx.endpoint, hex::encode(hasher.finalize()))
}

/// Read the cached response for `ctx`. Cache errors count as a miss.
pub async fn lookup(cache: &dyn ResponseCache, ctx: &RequestContext) -> Option<Value> {
    let key = cache_key(ctx);
    match cache.get(&key).await {
        Ok(hit) => {
            tracing::debug!(request_id = %ctx.request_id, hit = hit.is_some(), "Response cache lookup");
            hit
        }
        Err(e) => {
            tracing::warn!(request_id = %ctx.request_id, error = %e, "Response cache read failed, treating as miss");
            None
        }
    }
}

/// Minimum time between write-triggered sweeps of expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// In-process cache with per-entry expiry.
///
/// Expired entries are dropped when read, and swept on write at most once
/// per [`SWEEP_INTERVAL`], so keys that are never read again do not pile up.
#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, (Value, Instant)>,
    last_sweep: Mutex<Instant>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            last_sweep: Mutex::new(Instant::now()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, (_, expires)| *expires > now);
    }

    fn sweep_if_due(&self) {
        let now = Instant::now();
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if now.saturating_duration_since(*last) < SWEEP_INTERVAL {
                return;
            }
            *last = now;
        }

        let before = self.entries.len();
        self.purge_expired();
        tracing::debug!(
            removed = before.saturating_sub(self.entries.len()),
            remaining = self.entries.len(),
            "Swept expired cache entries"
        );
    }
}

#[async_trait]
impl ResponseCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, BoxError> {
        let now = Instant::now();
        let hit = match self.entries.get(key) {
            Some(entry) if entry.1 > now => Some(entry.0.clone()),
            Some(_) => None,
            None => return Ok(None),
        };
        if hit.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        Ok(hit)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), BoxError> {
        self.entries.insert(key.to_string(), (value, Instant::now() + ttl));
        self.sweep_if_due();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct BrokenCache;

    #[async_trait]
    impl ResponseCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<Value>, BoxError> {
            Err("cache unavailable".into())
        }

        async fn set(&self, _key: &str, _value: Value, _ttl: Duration) -> Result<(), BoxError> {
            Err("cache unavailable".into())
        }
    }

    #[test]
    fn test_cache_key_is_order_independent() {
        let a = RequestContext::new("/orders", "GET")
            .with_parameter("id", 1)
            .with_parameter("shop", "x");
        let b = RequestContext::new("/orders", "GET")
            .with_parameter("shop", "x")
            .with_parameter("id", 1);
        assert_eq!(cache_key(&a), cache_key(&b));
        assert!(cache_key(&a).starts_with("resilience:/orders:"));

        let c = RequestContext::new("/orders", "GET").with_parameter("id", 2);
        assert_ne!(cache_key(&a), cache_key(&c));
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        cache.set("k", json!({"v": 1}), Duration::from_secs(10)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"v": 1})));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_sweep_unread_expired_entries() {
        let cache = MemoryCache::new();
        for i in 0..10_000 {
            cache.set(&format!("k{i}"), json!(i), Duration::from_secs(1)).await.unwrap();
        }
        cache.set("long", json!("kept"), Duration::from_secs(7_200)).await.unwrap();
        assert_eq!(cache.len(), 10_001);

        tokio::time::advance(Duration::from_secs(3_600)).await;
        cache.set("fresh", json!(1), Duration::from_secs(60)).await.unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("long").await.unwrap(), Some(json!("kept")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeps_are_rate_limited() {
        let cache = MemoryCache::new();
        cache.set("a", json!(1), Duration::from_secs(1)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.set("b", json!(2), Duration::from_secs(600)).await.unwrap();
        // Expired but inside the sweep interval, so still stored until read.
        assert_eq!(cache.len(), 2);

        tokio::time::advance(SWEEP_INTERVAL).await;
        cache.set("c", json!(3), Duration::from_secs(600)).await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_broken_cache_is_a_miss() {
        let ctx = RequestContext::new("/orders", "GET");
        assert_eq!(lookup(&BrokenCache, &ctx).await, None);
    }
}
