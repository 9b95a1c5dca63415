//! Single-flight lock table.
//!
//! One async mutex per [`CacheKey`]. Entries carry their own idle expiry,
//! refreshed on every release, so hot keys keep their entry and cold keys are
//! reclaimed lazily. An entry is never reclaimed while someone holds or waits
//! on its mutex; losing an idle entry is harmless because a new one is created
//! on demand.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::key::CacheKey;

/// The wait for a key lock was abandoned because the request was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("lock wait cancelled")]
pub struct Cancelled;

struct LockEntry {
    mutex: Arc<Mutex<()>>,
    /// `None` when the idle TTL overflows the clock.
    expires_at: Option<Instant>,
}

impl LockEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }

    /// Held or awaited: a clone of the mutex `Arc` lives outside the table.
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.mutex) > 1
    }
}

/// Per-key mutual exclusion with lazily reclaimed entries.
pub struct LockTable {
    entries: DashMap<CacheKey, LockEntry>,
    idle_ttl: Duration,
    last_sweep: parking_lot::Mutex<Instant>,
}

impl LockTable {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            idle_ttl,
            last_sweep: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Waits for exclusive ownership of `key`.
    ///
    /// Creates the key's entry if absent. Returns [`Cancelled`] as soon as
    /// `cancel` fires, including when it was already cancelled on entry.
    pub async fn acquire(
        &self,
        key: &CacheKey,
        cancel: &CancellationToken,
    ) -> Result<KeyLockGuard<'_>, Cancelled> {
        self.maybe_sweep();

        let mutex = {
            let entry = self.entries.entry(key.clone()).or_insert_with(|| LockEntry {
                mutex: Arc::new(Mutex::new(())),
                expires_at: Instant::now().checked_add(self.idle_ttl),
            });
            Arc::clone(&entry.mutex)
        };

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Cancelled),
            permit = mutex.lock_owned() => permit,
        };

        Ok(KeyLockGuard {
            table: self,
            key: key.clone(),
            _permit: permit,
        })
    }

    /// Removes idle entries whose expiry has passed. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = !entry.is_expired(now) || entry.in_use();
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of lock entries currently in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn refresh(&self, key: &CacheKey) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.expires_at = Instant::now().checked_add(self.idle_ttl);
        }
    }

    /// Sweeps at most once per idle TTL; skips if another task is already sweeping.
    fn maybe_sweep(&self) {
        let now = Instant::now();
        let Some(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        if now.duration_since(*last) < self.idle_ttl {
            return;
        }
        *last = now;
        drop(last);

        let removed = self.sweep_expired();
        if removed > 0 {
            tracing::debug!(removed, "reclaimed idle idempotency locks");
        }
    }
}

/// Exclusive ownership of one key. Dropping it releases the lock and
/// refreshes the entry's expiry.
pub struct KeyLockGuard<'a> {
    table: &'a LockTable,
    key: CacheKey,
    _permit: OwnedMutexGuard<()>,
}

impl KeyLockGuard<'_> {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Releases the lock now rather than at end of scope.
    pub fn release(self) {}
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        // Refresh runs before `_permit` is dropped, i.e. while still held.
        self.table.refresh(&self.key);
    }
}
