//! Cache primitives backing the holder's derived views.
//!
//! [`CacheCell`] is a compute-once-then-publish memo for views that depend
//! only on this holder's own raw node sets. [`KeyedCache`] memoizes the
//! cross-holder views (keyed by context and exclusion parameters) and
//! supports idle-time eviction, since those entries depend on ancestor state
//! that changes without direct notice; correctness there is ensured by the
//! invalidation coordinator, eviction is purely resource reclamation.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A single invalidate-able memoized value.
pub struct CacheCell<T> {
    slot: parking_lot::Mutex<Option<T>>,
}

impl<T: Clone> CacheCell<T> {
    pub fn new() -> Self {
        Self {
            slot: parking_lot::Mutex::new(None),
        }
    }

    /// Return the cached value, computing and publishing it on a miss.
    /// The compute runs under the slot lock, so concurrent readers of the
    /// same slot observe either the old state or the fully computed one.
    pub fn get_or_compute(&self, compute: impl FnOnce() -> T) -> T {
        let mut slot = self.slot.lock();
        if let Some(value) = slot.as_ref() {
            return value.clone();
        }
        let value = compute();
        *slot = Some(value.clone());
        value
    }

    pub fn invalidate(&self) {
        *self.slot.lock() = None;
    }
}

impl<T: Clone> Default for CacheCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct TimedEntry<V> {
    value: V,
    last_access: Instant,
    generation: u64,
}

/// A keyed memo with idle-time eviction.
///
/// Entries carry the generation they were computed under. Invalidation
/// bumps the generation before clearing, so a fill that was in flight
/// across an invalidation is never served: its insert is skipped when the
/// generation moved, and a reader treats any entry stamped with an older
/// generation as a miss.
pub struct KeyedCache<K: Eq + Hash, V: Clone> {
    entries: DashMap<K, TimedEntry<V>>,
    generation: AtomicU64,
}

impl<K: Eq + Hash, V: Clone> KeyedCache<K, V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Return the entry for `key`, filling it on a miss.
    ///
    /// The fill runs outside any shard lock: resolution re-enters other
    /// holders' caches, so holding a shard across the compute could
    /// deadlock. Concurrent misses on the same key may compute redundantly;
    /// only fills from the current generation are published.
    pub fn get_or_compute(&self, key: K, compute: impl FnOnce() -> V) -> V {
        let generation = self.generation.load(Ordering::Acquire);
        if let Some(mut entry) = self.entries.get_mut(&key) {
            if entry.generation == generation {
                entry.last_access = Instant::now();
                return entry.value.clone();
            }
        }
        let value = compute();
        if self.generation.load(Ordering::Acquire) == generation {
            self.entries.insert(
                key,
                TimedEntry {
                    value: value.clone(),
                    last_access: Instant::now(),
                    generation,
                },
            );
        }
        value
    }

    pub fn invalidate_all(&self) {
        // Bump first: a concurrent fill that started before the bump must
        // not re-publish pre-invalidation state after the clear
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.entries.clear();
    }

    /// Evict entries not touched within `max_idle`. Returns how many were
    /// removed.
    pub fn prune_idle(&self, max_idle: Duration) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.last_access.elapsed() > max_idle {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Eq + Hash, V: Clone> Default for KeyedCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cell_computes_once() {
        let cell = CacheCell::new();
        let computes = AtomicUsize::new(0);
        let fill = || {
            computes.fetch_add(1, Ordering::SeqCst);
            42
        };

        assert_eq!(cell.get_or_compute(fill), 42);
        assert_eq!(cell.get_or_compute(fill), 42);
        assert_eq!(computes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cell_invalidate_forces_recompute() {
        let cell = CacheCell::new();
        assert_eq!(cell.get_or_compute(|| 1), 1);
        cell.invalidate();
        assert_eq!(cell.get_or_compute(|| 2), 2);
    }

    #[test]
    fn test_keyed_cache_fills_per_key() {
        let cache: KeyedCache<&str, usize> = KeyedCache::new();
        assert_eq!(cache.get_or_compute("a", || 1), 1);
        assert_eq!(cache.get_or_compute("b", || 2), 2);
        // Hit: the compute is not consulted
        assert_eq!(cache.get_or_compute("a", || 99), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_keyed_cache_prune_idle() {
        let cache: KeyedCache<&str, usize> = KeyedCache::new();
        cache.get_or_compute("a", || 1);
        cache.get_or_compute("b", || 2);

        // Nothing is idle yet
        assert_eq!(cache.prune_idle(Duration::from_secs(60)), 0);
        // Everything is idle under a zero bound
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.prune_idle(Duration::ZERO), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_keyed_cache_invalidate_all() {
        let cache: KeyedCache<&str, usize> = KeyedCache::new();
        cache.get_or_compute("a", || 1);
        cache.invalidate_all();
        assert_eq!(cache.get_or_compute("a", || 5), 5);
    }

    #[test]
    fn test_fill_racing_invalidation_is_not_published() {
        use std::sync::mpsc;
        use std::sync::Arc;

        let cache: Arc<KeyedCache<&'static str, &'static str>> = Arc::new(KeyedCache::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (invalidated_tx, invalidated_rx) = mpsc::channel();

        // Fill starts, then blocks until the invalidation has run
        let filler = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                cache.get_or_compute("k", || {
                    started_tx.send(()).unwrap();
                    invalidated_rx.recv().unwrap();
                    "stale"
                })
            })
        };

        started_rx.recv().unwrap();
        cache.invalidate_all();
        invalidated_tx.send(()).unwrap();

        // The in-flight fill still sees its own result
        assert_eq!(filler.join().unwrap(), "stale");
        // but it was not published: the next read recomputes
        assert_eq!(cache.get_or_compute("k", || "fresh"), "fresh");
        assert_eq!(cache.get_or_compute("k", || "later"), "fresh");
    }
}
