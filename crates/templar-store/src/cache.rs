//! Size-bounded in-memory cache

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// A cached value with its declared size
struct CacheEntry<V> {
    value: V,
    size: u64,
    /// Logical access time, larger is more recent
    last_accessed: u64,
}

struct CacheState<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    current_size: u64,
    clock: u64,
}

impl<K, V> CacheState<K, V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Capacity-limited key/value store where each entry declares its own size.
///
/// The summed size of resident entries never exceeds `max_size`. Admitting an
/// entry evicts least-recently-accessed entries first. All operations take an
/// internal lock, so callers never need their own.
pub struct SizeBoundedCache<K, V> {
    /// Maximum total size in bytes
    max_size: u64,
    state: Mutex<CacheState<K, V>>,
    disposed: AtomicBool,
}

impl<K, V> SizeBoundedCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Create a new cache
    pub fn new(max_size: u64) -> Self {
        Self {
            max_size,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                current_size: 0,
                clock: 0,
            }),
            disposed: AtomicBool::new(false),
        }
    }

    /// Get a cached value, marking it as recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();
        let now = state.tick();
        let entry = state.entries.get_mut(key)?;
        entry.last_accessed = now;
        Some(entry.value.clone())
    }

    /// Check if a key is cached without touching its recency
    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Insert or replace a value.
    ///
    /// Returns `false` without changing anything when `size` alone exceeds the
    /// limit or the cache has been disposed.
    pub fn set(&self, key: K, value: V, size: u64) -> bool {
        if self.is_disposed() {
            return false;
        }
        if size > self.max_size {
            debug!(
                key = ?key,
                size = size,
                max_size = self.max_size,
                "Entry larger than cache limit, not cached"
            );
            return false;
        }

        let mut state = self.state.lock();

        if let Some(old) = state.entries.remove(&key) {
            state.current_size = state.current_size.saturating_sub(old.size);
        }

        if state.current_size + size > self.max_size {
            let to_free = state.current_size + size - self.max_size;

            let mut by_access: Vec<(K, u64, u64)> = state
                .entries
                .iter()
                .map(|(k, e)| (k.clone(), e.last_accessed, e.size))
                .collect();
            by_access.sort_by_key(|(_, last_accessed, _)| *last_accessed);

            let mut freed = 0u64;
            for (victim, _, victim_size) in by_access {
                if freed >= to_free {
                    break;
                }
                warn!(key = ?victim, size = victim_size, "Evicting entry from cache (LRU)");
                state.entries.remove(&victim);
                state.current_size = state.current_size.saturating_sub(victim_size);
                freed += victim_size;
            }
        }

        let now = state.tick();
        state.current_size += size;
        state.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                size,
                last_accessed: now,
            },
        );

        debug!(key = ?key, size = size, total = state.current_size, "Added entry to cache");
        true
    }

    /// Remove a value, returning whether it was present
    pub fn remove(&self, key: &K) -> bool {
        let mut state = self.state.lock();
        match state.entries.remove(key) {
            Some(entry) => {
                state.current_size = state.current_size.saturating_sub(entry.size);
                debug!(key = ?key, "Removed entry from cache");
                true
            }
            None => false,
        }
    }

    /// Release every entry. Later calls do nothing.
    ///
    /// Returns `true` only for the call that performed the release.
    pub fn dispose(&self) -> bool {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let mut state = self.state.lock();
        let released = state.entries.len();
        state.entries.clear();
        state.current_size = 0;
        info!(entries = released, "Cache disposed");
        true
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Maximum total size in bytes
    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            total_size: state.current_size,
            max_size: self.max_size,
            entry_count: state.entries.len(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Current total size in bytes
    pub total_size: u64,
    /// Maximum cache size in bytes
    pub max_size: u64,
    /// Number of cached entries
    pub entry_count: usize,
}
