// # Memory Cache
//
// In-memory implementation of SnapshotCache.
//
// ## Purpose
//
// Provides a simple, fast snapshot cache that doesn't persist across
// restarts. Useful for testing, single-process deployments, or embedding
// the dispatcher where an external key-value store isn't available.
//
// ## Expiry
//
// - Each entry carries its own deadline, set from the TTL passed to `set`
// - Expired entries are invisible to `get` immediately
// - Memory is reclaimed lazily by `purge_expired`

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::snapshot_cache::SnapshotCache;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory snapshot cache
///
/// Stores entries in a HashMap protected by a RwLock. Clones share the
/// same underlying map.
///
/// # Example
///
/// ```rust,no_run
/// use parcel_core::cache::MemoryCache;
/// use parcel_core::traits::SnapshotCache;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let cache = MemoryCache::new();
///
///     cache.set("EXPRESS_CACHE_ALI_ZTO_ZT1234567890", "{}".to_string(), Duration::from_secs(60)).await?;
///
///     let value = cache.get("EXPRESS_CACHE_ALI_ZTO_ZT1234567890").await?;
///     assert_eq!(value.as_deref(), Some("{}"));
///
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryCache {
    /// Create a new empty memory cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored entries (including expired ones not yet purged)
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Remove all entries
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Drop expired entries, returning how many were removed
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.is_live(now));
        before - guard.len()
    }
}

#[async_trait]
impl SnapshotCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let guard = self.inner.read().await;
        let now = Instant::now();
        Ok(guard
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), Error> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| Error::cache(format!("TTL {:?} out of range for {}", ttl, key)))?;

        let mut guard = self.inner.write().await;
        guard.insert(key.to_string(), CacheEntry { value, expires_at });
        Ok(())
    }
}
