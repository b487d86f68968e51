//! RAM page cache with LRU eviction
//!
//! The in-memory working set in front of the persistent store. Rendered pages
//! are kept as shared images so a hit hands out the same allocation the worker
//! produced, and the least recently used pages are evicted once the byte
//! budget is exceeded.

use crate::fingerprint::CacheKey;
use image::RgbaImage;
use lru::LruCache;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of pages currently in cache
    pub entry_count: usize,

    /// Total memory used by cached pages (bytes)
    pub memory_used: usize,

    /// Maximum memory allowed (bytes)
    pub memory_limit: usize,

    pub hits: u64,
    pub misses: u64,

    /// Number of pages evicted due to memory pressure
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate memory utilization (0.0 to 1.0)
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_limit == 0 {
            0.0
        } else {
            self.memory_used as f64 / self.memory_limit as f64
        }
    }
}

pub(crate) fn image_bytes(image: &RgbaImage) -> usize {
    image.as_raw().len()
}

struct CacheState {
    pages: LruCache<CacheKey, Arc<RgbaImage>>,
    memory_used: usize,
    memory_limit: usize,
    stats: CacheStats,
}

impl CacheState {
    fn new(memory_limit: usize) -> Self {
        Self {
            pages: LruCache::unbounded(),
            memory_used: 0,
            memory_limit,
            stats: CacheStats { memory_limit, ..Default::default() },
        }
    }

    fn evict_to_fit(&mut self, required_size: usize) {
        while self.memory_used + required_size > self.memory_limit {
            let Some((_, image)) = self.pages.pop_lru() else {
                break;
            };
            self.memory_used = self.memory_used.saturating_sub(image_bytes(&image));
            self.stats.evictions += 1;
        }
    }

    fn sync_stats(&mut self) {
        self.stats.entry_count = self.pages.len();
        self.stats.memory_used = self.memory_used;
    }
}

/// RAM page cache with LRU eviction
///
/// Thread-safe in-memory cache for rendered pages. When the cache reaches
/// its memory limit, the least recently used pages are evicted automatically.
///
/// # Example
///
/// ```
/// use docview_cache::{CacheKey, RamImageCache};
/// use image::RgbaImage;
///
/// let cache = RamImageCache::with_mb_limit(64);
/// let key = CacheKey::derive("file:///book.djvu", 0, 800);
///
/// cache.put(key, RgbaImage::new(800, 1200));
/// assert!(cache.get(&key).is_some());
/// ```
pub struct RamImageCache {
    state: Mutex<CacheState>,
}

impl RamImageCache {
    /// Create a cache holding at most `memory_limit` bytes of pixels
    pub fn new(memory_limit: usize) -> Self {
        Self { state: Mutex::new(CacheState::new(memory_limit)) }
    }

    pub fn with_mb_limit(megabytes: usize) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a page, evicting least recently used pages to make room.
    ///
    /// A page larger than the whole budget is not kept. Returns the shared
    /// handle either way.
    pub fn put(&self, key: CacheKey, image: impl Into<Arc<RgbaImage>>) -> Arc<RgbaImage> {
        let image = image.into();
        let size = image_bytes(&image);
        let mut state = self.lock();

        if let Some(old) = state.pages.pop(&key) {
            state.memory_used = state.memory_used.saturating_sub(image_bytes(&old));
        }

        if size <= state.memory_limit {
            state.evict_to_fit(size);
            state.memory_used += size;
            state.pages.put(key, Arc::clone(&image));
        }

        state.sync_stats();
        image
    }

    /// Retrieve a page, marking it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<RgbaImage>> {
        let mut state = self.lock();

        match state.pages.get(key).cloned() {
            Some(image) => {
                state.stats.hits += 1;
                Some(image)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Check presence without touching LRU order or statistics
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().pages.contains(key)
    }

    pub fn remove(&self, key: &CacheKey) -> Option<Arc<RgbaImage>> {
        let mut state = self.lock();
        let removed = state.pages.pop(key);
        if let Some(image) = &removed {
            state.memory_used = state.memory_used.saturating_sub(image_bytes(image));
            state.sync_stats();
        }
        removed
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.pages.clear();
        state.memory_used = 0;
        state.sync_stats();
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    /// Update the memory limit, evicting pages if usage is now over it.
    pub fn set_memory_limit(&self, new_limit: usize) {
        let mut state = self.lock();
        state.memory_limit = new_limit;
        state.stats.memory_limit = new_limit;
        state.evict_to_fit(0);
        state.sync_stats();
    }

    pub fn memory_used(&self) -> usize {
        self.lock().memory_used
    }

    pub fn len(&self) -> usize {
        self.lock().pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RamImageCache {
    fn default() -> Self {
        Self::with_mb_limit(128)
    }
}
