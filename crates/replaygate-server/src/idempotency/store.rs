//! Response cache for replaying completed idempotent requests.
//!
//! Entries are written once per key under that key's single-flight lock and
//! evicted purely by time: lazily on lookup, or in bulk by
//! [`ResponseCache::cleanup_expired`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use axum::http::{HeaderValue, StatusCode};
use bytes::Bytes;
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use super::key::CacheKey;

/// What gets replayed: status, payload, entity tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub body: Bytes,
    pub etag: Option<HeaderValue>,
}

/// A cached snapshot with its absolute expiry. `None` never expires.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub snapshot: ResponseSnapshot,
    pub expires_at: Option<Instant>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResponseCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// TTL-bounded map from [`CacheKey`] to captured response.
#[derive(Default)]
pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live entry for `key`, dropping it first if it has expired.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let now = Instant::now();

        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.clone());
            }
            drop(entry);
            // Only remove if still expired: a concurrent put may have replaced it.
            self.entries.remove_if(key, |_, e| e.is_expired(now));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Stores `snapshot` under `key` for `ttl`, overwriting any previous entry.
    /// A `ttl` past the clock's range keeps the entry until overwritten.
    pub fn put(&self, key: CacheKey, snapshot: ResponseSnapshot, ttl: Duration) {
        let entry = CacheEntry {
            snapshot,
            expires_at: Instant::now().checked_add(ttl),
        };
        self.entries.insert(key, entry);
    }

    /// Removes all expired entries. Returns the number removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> ResponseCacheStats {
        ResponseCacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
