//! Cache-aside helper.
//!
//! Values are stored as JSON strings. The cache is never allowed to break a
//! request: any store error on read or write is logged and the call falls
//! through to the source of truth.

use crate::backend::StoreHandle;
use crate::storage::ScanCursor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Cache-aside over a [`StoreHandle`].
#[derive(Debug, Clone)]
pub struct CacheAside {
    store: StoreHandle,
    default_ttl: Duration,
}

impl CacheAside {
    pub fn new(store: StoreHandle, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// Returns the cached value for `key`, or computes it with `fetch` and
    /// caches the result for `ttl` (the default TTL when `None`).
    ///
    /// Errors from `fetch` are returned as-is. A `null` result is not cached.
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, ttl: Option<Duration>, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.store.get(key.as_bytes()).await {
            Ok(Some(raw)) => match serde_json::from_slice::<T>(&raw) {
                Ok(value) => {
                    debug!(key = key, "Cache hit");
                    return Ok(value);
                }
                Err(e) => warn!(key = key, error = %e, "Discarding undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) if e.is_transport() => warn!(key = key, error = %e, "Cache read failed, falling through"),
            Err(e) => debug!(key = key, error = %e, "Cache key unusable, falling through"),
        }

        debug!(key = key, "Cache miss");
        let value = fetch().await?;

        match serde_json::to_vec(&value) {
            Ok(json) if json != b"null" => {
                let ttl = ttl.unwrap_or(self.default_ttl);
                if let Err(e) = self.store.set(key.to_string(), json, Some(ttl)).await {
                    warn!(key = key, error = %e, "Cache write failed");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(key = key, error = %e, "Value could not be encoded for caching"),
        }

        Ok(value)
    }

    /// Drops one cache entry. Returns `true` if it existed.
    pub async fn invalidate(&self, key: &str) -> bool {
        match self.store.delete(key.as_bytes()).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(key = key, error = %e, "Cache invalidation failed");
                false
            }
        }
    }

    /// Drops every entry whose key matches the glob `pattern`, paging
    /// through the key space. Returns the number removed.
    pub async fn invalidate_pattern(&self, pattern: &str) -> usize {
        let mut cursor = ScanCursor::start();
        let mut removed = 0;

        loop {
            let page = match self.store.scan_keys(pattern, &cursor).await {
                Ok(page) => page,
                Err(e) => {
                    warn!(pattern = pattern, error = %e, "Cache pattern invalidation failed");
                    return removed;
                }
            };

            for key in &page.keys {
                match self.store.delete(key).await {
                    Ok(true) => removed += 1,
                    Ok(false) => {}
                    Err(e) => warn!(error = %e, "Cache invalidation failed"),
                }
            }

            if page.cursor.is_done() {
                debug!(pattern = pattern, removed = removed, "Cache entries invalidated");
                return removed;
            }
            cursor = page.cursor;
        }
    }
}
