//! Idempotent request deduplication with single-flight response replay.
//!
//! Mutating requests that carry an `Idempotency-Key` header are keyed on
//! (route, token, body digest). The first request for a key runs the handler
//! while holding the key's lock; concurrent duplicates wait on that lock and
//! replay the captured response instead of executing again. Successful
//! responses stay replayable for the cache TTL.
//!
//! The engine is plain state ([`IdempotencyEngine`]) plus an axum middleware
//! function ([`idempotency_middleware`]) mounted with
//! `axum::middleware::from_fn_with_state`.

pub mod error;
pub mod hasher;
pub mod key;
pub mod lock;
pub mod middleware;
pub mod store;

use std::sync::{Arc, Weak};
use std::time::Duration;

use axum::http::{HeaderName, Method};
use tokio::task::JoinHandle;

pub use error::{CLIENT_CLOSED_REQUEST, IdempotencyError, TokenError};
pub use hasher::{HashedBody, hash_body_prefix};
pub use key::{CacheKey, IdempotencyToken};
pub use lock::{Cancelled, KeyLockGuard, LockTable};
pub use middleware::idempotency_middleware;
pub use store::{CacheEntry, ResponseCache, ResponseCacheStats, ResponseSnapshot};

/// Response header reporting whether a reply was replayed (`hit`) or executed (`miss`).
pub static IDEMPOTENCY_CACHE_HEADER: HeaderName = HeaderName::from_static("idempotency-cache");

pub const DEFAULT_HEADER_NAME: &str = "Idempotency-Key";
pub const DEFAULT_MAX_KEY_LENGTH: usize = 128;
pub const DEFAULT_HASH_BUDGET_BYTES: usize = 512 * 1024;
pub const DEFAULT_MAX_CACHEABLE_BYTES: usize = 256 * 1024;
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(12 * 60 * 60);
pub const DEFAULT_LOCK_IDLE_TTL: Duration = Duration::from_secs(2 * 60);

/// Runtime knobs for the engine.
#[derive(Debug, Clone)]
pub struct IdempotencyOptions {
    pub header_name: HeaderName,
    /// Methods the engine intercepts; everything else passes straight through.
    pub methods: Vec<Method>,
    pub max_key_length: usize,
    pub hash_budget_bytes: usize,
    pub max_cacheable_bytes: usize,
    pub cache_ttl: Duration,
    pub lock_idle_ttl: Duration,
}

impl Default for IdempotencyOptions {
    fn default() -> Self {
        Self {
            header_name: HeaderName::from_static("idempotency-key"),
            methods: vec![Method::POST],
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            hash_budget_bytes: DEFAULT_HASH_BUDGET_BYTES,
            max_cacheable_bytes: DEFAULT_MAX_CACHEABLE_BYTES,
            cache_ttl: DEFAULT_CACHE_TTL,
            lock_idle_ttl: DEFAULT_LOCK_IDLE_TTL,
        }
    }
}

impl IdempotencyOptions {
    pub fn applies_to(&self, method: &Method) -> bool {
        self.methods.contains(method)
    }
}

/// Shared engine state: options, response cache, lock table.
pub struct IdempotencyEngine {
    options: IdempotencyOptions,
    cache: ResponseCache,
    locks: LockTable,
}

impl IdempotencyEngine {
    pub fn new(options: IdempotencyOptions) -> Self {
        let locks = LockTable::new(options.lock_idle_ttl);
        Self {
            options,
            cache: ResponseCache::new(),
            locks,
        }
    }

    pub fn options(&self) -> &IdempotencyOptions {
        &self.options
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    /// Runs one eviction pass over both maps. Returns (cache entries, lock entries) removed.
    pub fn sweep(&self) -> (usize, usize) {
        let responses = self.cache.cleanup_expired();
        let locks = self.locks.sweep_expired();
        crate::metrics::set_idempotency_cache_entries(self.cache.len());
        (responses, locks)
    }

    /// Spawns a periodic sweep task. The task exits once the engine is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    tracing::debug!("idempotency engine dropped, sweeper exiting");
                    break;
                };
                let (responses, locks) = engine.sweep();
                if responses > 0 || locks > 0 {
                    tracing::info!(responses, locks, "idempotency sweep removed expired entries");
                }
            }
        })
    }
}

impl Default for IdempotencyEngine {
    fn default() -> Self {
        Self::new(IdempotencyOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};
    use bytes::Bytes;
    use tokio_util::sync::CancellationToken;

    fn key() -> CacheKey {
        let token = IdempotencyToken::parse("3fa85f64-5717-4562-b3fc-2c963f66afa6", 128).unwrap();
        CacheKey::new("/api/v1/todos", &token, "aa")
    }

    #[test]
    fn default_options() {
        let options = IdempotencyOptions::default();
        assert_eq!(options.header_name.as_str(), "idempotency-key");
        assert!(options.applies_to(&Method::POST));
        assert!(!options.applies_to(&Method::PUT));
        assert_eq!(options.cache_ttl, Duration::from_secs(43_200));
        assert_eq!(options.lock_idle_ttl, Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_expired_entries() {
        let engine = Arc::new(IdempotencyEngine::new(IdempotencyOptions {
            cache_ttl: Duration::from_secs(5),
            lock_idle_ttl: Duration::from_secs(5),
            ..Default::default()
        }));

        engine.cache().put(
            key(),
            ResponseSnapshot {
                status: StatusCode::OK,
                body: Bytes::from_static(b"{}"),
                etag: Some(HeaderValue::from_static("W/\"1\"")),
            },
            engine.options().cache_ttl,
        );
        engine
            .locks()
            .acquire(&key(), &CancellationToken::new())
            .await
            .unwrap()
            .release();

        let handle = engine.spawn_sweeper(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        assert!(engine.cache().is_empty());
        assert!(engine.locks().is_empty());

        drop(engine);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(handle.await.is_ok());
    }
}
