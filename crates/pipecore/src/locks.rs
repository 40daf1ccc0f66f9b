//! Advisory distributed locks for idempotency.
//!
//! A lock is a key with a TTL in a shared store. Holding a lock means the
//! key exists; there is no holder identity. Locks never guard the
//! scheduler's own state.

use crate::{LockError, Options};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Store contract: `SET key val NX EX ttl` and `DEL key`.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Create `key` with expiry `ttl` unless it exists. True when created.
    async fn set_nx_ex(&self, key: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Delete `key`, returning the number of keys removed.
    async fn del(&self, key: &str) -> Result<u64, LockError>;
}

/// Expired entries are swept at most this often, or sooner once the map
/// doubles in size since the last sweep.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const SWEEP_MIN_ENTRIES: usize = 1024;

/// In-process lock store with TTL expiry.
///
/// Shared between in-process workers by cloning the `Arc` it lives in.
/// Expired keys are evicted opportunistically from `set_nx_ex`.
#[derive(Debug)]
pub struct MemoryLockStore {
    entries: DashMap<String, Instant>,
    created: Instant,
    sweep_interval: Duration,
    last_sweep_ms: AtomicU64,
    sweep_at: AtomicUsize,
}

impl Default for MemoryLockStore {
    fn default() -> Self {
        Self::with_sweep_interval(SWEEP_INTERVAL)
    }
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(sweep_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            created: Instant::now(),
            sweep_interval,
            last_sweep_ms: AtomicU64::new(0),
            sweep_at: AtomicUsize::new(SWEEP_MIN_ENTRIES),
        }
    }

    /// Whether `key` is currently held.
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|expires| *expires > Instant::now())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| *e.value() > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_at(Instant::now())
    }

    fn purge_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires| *expires > now);
        before.saturating_sub(self.entries.len())
    }

    // Must not run while an entry guard is held: retain takes every shard lock.
    fn sweep_if_due(&self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.created).as_millis() as u64;
        let last = self.last_sweep_ms.load(Ordering::Acquire);
        let crowded = self.entries.len() >= self.sweep_at.load(Ordering::Relaxed);
        if !crowded && elapsed.saturating_sub(last) < self.sweep_interval.as_millis() as u64 {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, elapsed, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let removed = self.purge_at(now);
        let live = self.entries.len();
        self.sweep_at
            .store((live * 2).max(SWEEP_MIN_ENTRIES), Ordering::Relaxed);
        if removed > 0 {
            tracing::debug!("Evicted {} expired locks, {} left", removed, live);
        }
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn set_nx_ex(&self, key: &str, ttl: Duration) -> Result<bool, LockError> {
        let now = Instant::now();
        self.sweep_if_due(now);
        // The entry guard holds the shard lock, so check-and-set is atomic.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut held) => {
                if *held.get() > now {
                    Ok(false)
                } else {
                    held.insert(now + ttl);
                    Ok(true)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now + ttl);
                Ok(true)
            }
        }
    }

    async fn del(&self, key: &str) -> Result<u64, LockError> {
        match self.entries.remove(key) {
            Some((_, expires)) if expires > Instant::now() => Ok(1),
            _ => Ok(0),
        }
    }
}

/// Lock operations on behalf of messages.
#[derive(Clone)]
pub struct LockCoordinator {
    store: Arc<dyn LockStore>,
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Coordinator over a private in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryLockStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    /// Try to take `key`. On success the key is recorded in `opt` so the
    /// failure paths can release it.
    pub async fn get_lock(
        &self,
        key: &str,
        ttl: Duration,
        opt: &mut Options,
    ) -> Result<bool, LockError> {
        let acquired = self.store.set_nx_ex(key, ttl).await?;
        if acquired {
            tracing::debug!("Acquired lock {} for {}s", key, ttl.as_secs());
            opt.push_lock(key);
        }
        Ok(acquired)
    }

    /// Unconditional delete. Deleting an absent key returns false.
    pub async fn delete_lock(&self, key: &str, task: &str) -> Result<bool, LockError> {
        let removed = self.store.del(key).await? > 0;
        if removed {
            tracing::warn!("「{}」 Delete Lock: {}", task, key);
        }
        Ok(removed)
    }

    /// Release and forget every lock recorded in `opt`. Store failures are
    /// logged; the key is dropped from `opt` either way and left to expire.
    pub async fn delete_all_locks(&self, opt: &mut Options, task: &str) -> usize {
        let mut released = 0;
        for key in opt.take_locks() {
            match self.delete_lock(&key, task).await {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(e) => tracing::error!("「{}」 failed to delete lock {}: {}", task, key, e),
            }
        }
        released
    }
}
