//! In-memory LRU image cache bounded by decoded byte size.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use sysinfo::System;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, decoded_size};
use crate::domain::ports::ImageCachePort;

/// Budget used when available system memory cannot be determined (64 MiB).
pub const FALLBACK_MEMORY_BUDGET: u64 = 64 * 1024 * 1024;

/// Default share of available memory given to the cache (one eighth).
pub const DEFAULT_MEMORY_FRACTION: u64 = 8;

/// Returns `1 / fraction` of the currently available system memory.
#[must_use]
pub fn system_memory_budget(fraction: u64) -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    let budget = system.available_memory() / fraction.max(1);
    if budget == 0 {
        FALLBACK_MEMORY_BUDGET
    } else {
        budget
    }
}

struct CacheEntry {
    image: Arc<image::DynamicImage>,
    size_bytes: u64,
}

struct WeightedLru {
    entries: LruCache<CacheKey, CacheEntry>,
    weight: u64,
}

/// In-memory LRU cache for decoded images.
///
/// Entries are weighted by their decoded byte size and the summed weight
/// never exceeds the configured capacity.
pub struct MemoryImageCache {
    inner: Mutex<WeightedLru>,
    capacity: u64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryImageCache {
    /// Creates a new cache holding at most `capacity` bytes of pixels.
    #[must_use]
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Mutex::new(WeightedLru {
                entries: LruCache::unbounded(),
                weight: 0,
            }),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Creates a cache sized to a fraction of available system memory.
    #[must_use]
    pub fn with_system_budget(fraction: u64) -> Self {
        Self::new(system_memory_budget(fraction))
    }

    /// Maximum summed weight in bytes.
    #[must_use]
    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Returns cache statistics.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };
        let (size, weight) = {
            let inner = self.inner.lock();
            (inner.entries.len(), inner.weight)
        };
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate,
            size,
            weight,
            capacity: self.capacity,
        }
    }

    /// Peeks at an image without promoting it in the LRU.
    #[must_use]
    pub fn peek(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        let inner = self.inner.lock();
        inner.entries.peek(key).map(|entry| entry.image.clone())
    }

    /// Returns true if `key` is resident, without promoting it.
    #[must_use]
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.inner.lock().entries.contains(key)
    }
}

/// Statistics about cache performance.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries evicted to make room.
    pub evictions: u64,
    /// Hit rate as a percentage.
    pub hit_rate: f64,
    /// Current number of cached images.
    pub size: usize,
    /// Summed decoded size of cached images in bytes.
    pub weight: u64,
    /// Maximum summed size in bytes.
    pub capacity: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cache: {} images, {}/{} bytes, {:.1}% hit rate ({} hits, {} misses, {} evictions)",
            self.size,
            self.weight,
            self.capacity,
            self.hit_rate,
            self.hits,
            self.misses,
            self.evictions
        )
    }
}

impl ImageCachePort for MemoryImageCache {
    fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>> {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get(key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache hit");
            Some(entry.image.clone())
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            trace!(key = %key, "Memory cache miss");
            None
        }
    }

    fn put(&self, key: CacheKey, image: Arc<image::DynamicImage>) -> bool {
        let size_bytes = decoded_size(&image);
        if size_bytes > self.capacity {
            debug!(
                key = %key,
                size = size_bytes,
                capacity = self.capacity,
                "Image larger than memory cache, not caching"
            );
            return false;
        }

        let mut inner = self.inner.lock();
        if let Some(old) = inner.entries.pop(&key) {
            inner.weight -= old.size_bytes;
        }

        while inner.weight + size_bytes > self.capacity {
            let Some((evicted, entry)) = inner.entries.pop_lru() else {
                break;
            };
            inner.weight -= entry.size_bytes;
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %evicted, size = entry.size_bytes, "Evicted image from memory cache");
        }

        debug!(key = %key, size = size_bytes, "Storing image in memory cache");
        inner.entries.put(key, CacheEntry { image, size_bytes });
        inner.weight += size_bytes;
        true
    }

    fn evict(&self, key: &CacheKey) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.pop(key) {
            inner.weight -= entry.size_bytes;
            debug!(key = %key, "Evicted image from memory cache");
        }
    }

    fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    fn weight(&self) -> u64 {
        self.inner.lock().weight
    }

    fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.weight = 0;
        debug!("Cleared memory image cache");
    }
}
