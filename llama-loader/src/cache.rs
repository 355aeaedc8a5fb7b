//! Keyed, reference-counted cache with single construction per key.
//!
//! [`ResourceCache`] hands out `Arc<V>` handles to resources that are costly to
//! build (loaded model weights, LoRA adapters). Lookups follow a
//! double-checked locking sequence:
//!
//! 1. lock the map, look the key up, mark it in-flight if absent, unlock
//! 2. run the factory with no lock held
//! 3. lock again, re-check for a live entry, insert only if none is present
//!
//! The map mutex is therefore held for map operations only, never while a
//! factory runs, so a slow model load does not block lookups of unrelated
//! keys and distinct keys construct in parallel. Requests for a key that is
//! already being built wait on that key's latch and then repeat the lookup,
//! which collapses N concurrent requests into one factory call.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What happens to an entry once no caller holds a handle to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimPolicy {
    /// The cache only keeps weak references: dropping the last handle
    /// destroys the resource immediately and the next request rebuilds it.
    Eager,
    /// The cache keeps the resource alive until [`ResourceCache::purge_unused`]
    /// or [`ResourceCache::clear`] is called.
    #[default]
    Deferred,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Requests served from an existing live entry.
    pub hits: u64,
    /// Requests that had to run the factory.
    pub misses: u64,
    /// Factory runs that produced a resource which was inserted.
    pub constructions: u64,
    /// Factory runs that returned an error or panicked.
    pub failures: u64,
    /// Times a request waited for another caller's construction.
    pub waits: u64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    constructions: AtomicU64,
    failures: AtomicU64,
    waits: AtomicU64,
}

impl CacheCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            constructions: self.constructions.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
        }
    }
}

/// One-shot gate that waiters block on while a key is being constructed.
#[derive(Debug, Default)]
struct LoadLatch {
    open: Mutex<bool>,
    signal: Condvar,
}

impl LoadLatch {
    fn wait(&self) {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = self
                .signal
                .wait(open)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn release(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.signal.notify_all();
    }
}

#[derive(Debug)]
enum Resident<V> {
    Strong(Arc<V>),
    Weak(Weak<V>),
}

impl<V> Resident<V> {
    fn new(value: &Arc<V>, policy: ReclaimPolicy) -> Self {
        match policy {
            ReclaimPolicy::Eager => Resident::Weak(Arc::downgrade(value)),
            ReclaimPolicy::Deferred => Resident::Strong(Arc::clone(value)),
        }
    }

    fn upgrade(&self) -> Option<Arc<V>> {
        match self {
            Resident::Strong(value) => Some(Arc::clone(value)),
            Resident::Weak(weak) => weak.upgrade(),
        }
    }

    /// Handles held outside the cache.
    fn outside_handles(&self) -> usize {
        match self {
            Resident::Strong(value) => Arc::strong_count(value) - 1,
            Resident::Weak(weak) => weak.strong_count(),
        }
    }
}

#[derive(Debug)]
enum Slot<V> {
    Ready(Resident<V>),
    Loading(Arc<LoadLatch>),
}

enum Lookup<V> {
    Hit(Arc<V>),
    Wait(Arc<LoadLatch>),
    Claimed(Arc<LoadLatch>),
}

/// Concurrency-safe, keyed cache of shared resources.
///
/// Keys describe construction parameters (for example a model path plus its
/// load options); two requests with equal keys always receive handles to the
/// same allocation while the entry is alive.
///
/// # Examples
///
/// ```
/// use llama_loader::{ReclaimPolicy, ResourceCache};
/// use std::sync::Arc;
///
/// let cache: ResourceCache<String, Vec<u8>> = ResourceCache::new(ReclaimPolicy::Deferred);
/// let first = cache
///     .get_or_create(&"weights".to_string(), |_| Ok::<_, std::io::Error>(vec![1, 2, 3]))
///     .unwrap();
/// let second = cache
///     .get_or_create(&"weights".to_string(), |_| Ok::<_, std::io::Error>(vec![9]))
///     .unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
/// ```
#[derive(Debug)]
pub struct ResourceCache<K, V> {
    entries: Mutex<HashMap<K, Slot<V>>>,
    policy: ReclaimPolicy,
    counters: CacheCounters,
}

impl<K, V> Default for ResourceCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new(ReclaimPolicy::default())
    }
}

impl<K, V> ResourceCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    pub fn new(policy: ReclaimPolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
            counters: CacheCounters::default(),
        }
    }

    pub fn policy(&self) -> ReclaimPolicy {
        self.policy
    }

    // No code panics while holding the map lock, so a poisoned map is still
    // consistent and safe to keep using.
    fn lock_entries(&self) -> MutexGuard<'_, HashMap<K, Slot<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the live entry for `key`, or build it with `factory`.
    ///
    /// The factory runs at most once per key across all concurrent callers
    /// (until the entry is reclaimed). If it fails, the error goes to this
    /// caller only, nothing is inserted, and any caller that was waiting on
    /// this construction repeats its lookup.
    pub fn get_or_create<F, E>(&self, key: &K, factory: F) -> Result<Arc<V>, E>
    where
        F: FnOnce(&K) -> Result<V, E>,
    {
        let latch = loop {
            match self.lookup_or_claim(key) {
                Lookup::Hit(value) => {
                    CacheCounters::bump(&self.counters.hits);
                    debug!("Resource cache hit for {:?}", key);
                    return Ok(value);
                }
                Lookup::Wait(latch) => {
                    CacheCounters::bump(&self.counters.waits);
                    debug!("Waiting for in-flight construction of {:?}", key);
                    latch.wait();
                }
                Lookup::Claimed(latch) => break latch,
            }
        };

        CacheCounters::bump(&self.counters.misses);
        let claim = Claim {
            cache: self,
            key,
            latch,
            settled: false,
        };

        let started = Instant::now();
        match factory(key) {
            Ok(value) => {
                let handle = claim.publish(Arc::new(value));
                info!("Constructed resource {:?} in {:?}", key, started.elapsed());
                Ok(handle)
            }
            Err(err) => {
                CacheCounters::bump(&self.counters.failures);
                warn!(
                    "Construction of {:?} failed after {:?}",
                    key,
                    started.elapsed()
                );
                drop(claim);
                Err(err)
            }
        }
    }

    fn lookup_or_claim(&self, key: &K) -> Lookup<V> {
        let mut entries = self.lock_entries();
        let found = match entries.get(key) {
            Some(Slot::Ready(resident)) => resident.upgrade().map(Lookup::Hit),
            Some(Slot::Loading(latch)) => Some(Lookup::Wait(Arc::clone(latch))),
            None => None,
        };
        if let Some(found) = found {
            return found;
        }

        // Absent, or a weak entry whose resource has already been dropped.
        let latch = Arc::new(LoadLatch::default());
        entries.insert(key.clone(), Slot::Loading(Arc::clone(&latch)));
        Lookup::Claimed(latch)
    }

    /// Return the live entry for `key` without constructing anything.
    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        match self.lock_entries().get(key) {
            Some(Slot::Ready(resident)) => resident.upgrade(),
            _ => None,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.lock_entries()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(resident) if resident.upgrade().is_some()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Handles to `key` currently held outside the cache.
    pub fn live_handles(&self, key: &K) -> usize {
        match self.lock_entries().get(key) {
            Some(Slot::Ready(resident)) => resident.outside_handles(),
            _ => 0,
        }
    }

    /// Drop entries that no caller holds a handle to. Returns how many were
    /// removed.
    pub fn purge_unused(&self) -> usize {
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|key, slot| match slot {
            Slot::Loading(_) => true,
            Slot::Ready(resident) => {
                let keep = resident.outside_handles() > 0;
                if !keep {
                    debug!("Reclaiming unused resource {:?}", key);
                }
                keep
            }
        });
        before - entries.len()
    }

    /// Forget every resident entry. Outstanding handles stay valid; in-flight
    /// constructions complete and insert normally.
    pub fn clear(&self) {
        self.lock_entries()
            .retain(|_, slot| matches!(slot, Slot::Loading(_)));
    }

    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot()
    }
}

/// In-flight marker owned by the caller running the factory.
///
/// Dropping an unsettled claim (factory error or panic) removes the marker
/// and wakes waiters so they retry instead of hanging.
struct Claim<'a, K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    cache: &'a ResourceCache<K, V>,
    key: &'a K,
    latch: Arc<LoadLatch>,
    settled: bool,
}

impl<K, V> Claim<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    fn publish(mut self, value: Arc<V>) -> Arc<V> {
        let handle = {
            let mut entries = self.cache.lock_entries();
            let existing = match entries.get(self.key) {
                Some(Slot::Ready(resident)) => resident.upgrade(),
                _ => None,
            };
            match existing {
                Some(winner) => {
                    debug!(
                        "Discarding redundant construction of {:?}, adopting existing entry",
                        self.key
                    );
                    winner
                }
                None => {
                    entries.insert(
                        self.key.clone(),
                        Slot::Ready(Resident::new(&value, self.cache.policy)),
                    );
                    CacheCounters::bump(&self.cache.counters.constructions);
                    value
                }
            }
        };
        self.settled = true;
        self.latch.release();
        handle
    }
}

impl<K, V> Drop for Claim<'_, K, V>
where
    K: Eq + Hash + Clone + Debug,
{
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if std::thread::panicking() {
            CacheCounters::bump(&self.cache.counters.failures);
        }
        {
            let mut entries = self.cache.lock_entries();
            let ours = matches!(
                entries.get(self.key),
                Some(Slot::Loading(latch)) if Arc::ptr_eq(latch, &self.latch)
            );
            if ours {
                entries.remove(self.key);
            }
        }
        self.latch.release();
    }
}
