//! Persistent, content-addressed page store.
//!
//! Every rendered page lives in its own file named after the hex form of its
//! [`CacheKey`], encoded as PNG so the pixels come back exactly as they were
//! written. Lookups go straight to the filesystem, which means a fresh store
//! pointed at an existing directory sees everything earlier sessions wrote.
//!
//! The store is unbounded unless a byte limit is configured, in which case the
//! least recently used entries are evicted to stay under it.

use crate::error::{CacheError, CacheResult};
use crate::fingerprint::CacheKey;
use image::{ImageFormat, RgbaImage};
use log::{debug, warn};
use lru::LruCache;
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;

/// Statistics for monitoring disk cache performance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskCacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries removed to stay under the byte limit
    pub evictions: u64,
    /// Entries known to the index
    pub entry_count: usize,
    /// Bytes used by indexed entries
    pub disk_used: usize,
}

impl DiskCacheStats {
    /// Calculate cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate disk utilization against `limit` (0.0 to 1.0)
    pub fn disk_utilization(&self, limit: usize) -> f64 {
        if limit == 0 {
            0.0
        } else {
            self.disk_used as f64 / limit as f64
        }
    }
}

struct DiskState {
    /// Known entries and their file sizes, least recently used first
    index: LruCache<CacheKey, usize>,
    disk_limit: Option<usize>,
    stats: DiskCacheStats,
}

impl DiskState {
    fn forget(&mut self, key: &CacheKey) -> Option<usize> {
        let size = self.index.pop(key);
        if let Some(size) = size {
            self.stats.disk_used = self.stats.disk_used.saturating_sub(size);
        }
        self.stats.entry_count = self.index.len();
        size
    }

    fn record(&mut self, key: CacheKey, size: usize) {
        if let Some(old) = self.index.put(key, size) {
            self.stats.disk_used = self.stats.disk_used.saturating_sub(old);
        }
        self.stats.disk_used += size;
        self.stats.entry_count = self.index.len();
    }

    /// Drop least recently used entries until `needed` more bytes fit.
    fn evict_until_space_available(&mut self, cache_dir: &Path, needed: usize) -> io::Result<()> {
        let Some(limit) = self.disk_limit else {
            return Ok(());
        };

        while self.stats.disk_used + needed > limit {
            let Some((key, size)) = self.index.pop_lru() else {
                break;
            };
            if let Err(e) = fs::remove_file(DiskImageCache::key_to_path(cache_dir, &key)) {
                if e.kind() != io::ErrorKind::NotFound {
                    self.index.put(key, size);
                    return Err(e);
                }
            }
            self.stats.disk_used = self.stats.disk_used.saturating_sub(size);
            self.stats.evictions += 1;
        }
        self.stats.entry_count = self.index.len();
        Ok(())
    }
}

/// Content-addressed PNG store for rendered pages.
///
/// Cheap to clone; clones share the same index and statistics.
#[derive(Clone)]
pub struct DiskImageCache {
    cache_dir: Arc<PathBuf>,
    state: Arc<Mutex<DiskState>>,
}

impl DiskImageCache {
    /// Open a store rooted at `cache_dir`, creating the directory if needed.
    ///
    /// `disk_limit` is in bytes; `None` keeps every entry.
    pub fn new<P: AsRef<Path>>(cache_dir: P, disk_limit: Option<usize>) -> CacheResult<Self> {
        let cache_dir = cache_dir.as_ref().to_path_buf();
        fs::create_dir_all(&cache_dir)?;

        let state = DiskState {
            index: LruCache::unbounded(),
            disk_limit,
            stats: DiskCacheStats::default(),
        };

        Ok(Self { cache_dir: Arc::new(cache_dir), state: Arc::new(Mutex::new(state)) })
    }

    /// Open an unbounded store.
    pub fn unbounded<P: AsRef<Path>>(cache_dir: P) -> CacheResult<Self> {
        Self::new(cache_dir, None)
    }

    pub fn with_mb_limit<P: AsRef<Path>>(cache_dir: P, megabytes: usize) -> CacheResult<Self> {
        Self::new(cache_dir, Some(megabytes * 1024 * 1024))
    }

    fn lock(&self) -> MutexGuard<'_, DiskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn key_to_path(cache_dir: &Path, key: &CacheKey) -> PathBuf {
        cache_dir.join(key.to_hex())
    }

    /// Path of the blob for `key`, whether or not it exists.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        Self::key_to_path(&self.cache_dir, key)
    }

    /// Store a page as PNG, replacing any previous blob under the same key.
    ///
    /// The blob is written to a temporary file in the cache directory and
    /// renamed into place, so readers never observe a partial file.
    pub fn put(&self, key: CacheKey, image: &RgbaImage) -> CacheResult<usize> {
        let mut encoded = Vec::new();
        image.write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)?;
        let size = encoded.len();

        {
            // The blob being replaced is not an eviction candidate and stays
            // indexed until the new one is in place.
            let mut state = self.lock();
            let previous = state.forget(&key);
            let evicted = state.evict_until_space_available(&self.cache_dir, size);
            if let Some(previous) = previous {
                state.record(key, previous);
            }
            evicted?;
        }

        let mut file = NamedTempFile::new_in(self.cache_dir.as_path())?;
        file.write_all(&encoded)?;
        file.persist(self.path_for(&key))?;

        self.lock().record(key, size);
        debug!("stored {key} ({size} bytes)");
        Ok(size)
    }

    /// Load a page.
    ///
    /// Returns `Ok(None)` when no blob exists. A blob that fails to decode is
    /// deleted and reported as an error.
    pub fn get(&self, key: &CacheKey) -> CacheResult<Option<RgbaImage>> {
        let path = self.path_for(key);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let mut state = self.lock();
                state.forget(key);
                state.stats.misses += 1;
                return Ok(None);
            }
            Err(e) => return Err(CacheError::Io(e)),
        };

        match image::load_from_memory_with_format(&bytes, ImageFormat::Png) {
            Ok(decoded) => {
                let mut state = self.lock();
                state.record(*key, bytes.len());
                state.stats.hits += 1;
                Ok(Some(decoded.to_rgba8()))
            }
            Err(e) => {
                warn!("discarding unreadable cache entry {}: {e}", path.display());
                if let Err(remove_err) = fs::remove_file(&path) {
                    debug!("could not remove {}: {remove_err}", path.display());
                }
                self.lock().forget(key);
                Err(CacheError::Image(e))
            }
        }
    }

    /// Whether a blob exists for `key`. Does not touch LRU order or statistics.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.path_for(key).is_file()
    }

    pub fn remove(&self, key: &CacheKey) -> CacheResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::Io(e)),
        }
        self.lock().forget(key);
        Ok(())
    }

    /// Remove every blob this store owns. Unrelated files are left alone.
    pub fn clear(&self) -> CacheResult<()> {
        for entry in fs::read_dir(self.cache_dir.as_path())? {
            let path = entry?.path();
            let owned = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(CacheKey::from_hex)
                .is_some();
            if owned {
                fs::remove_file(&path).ok();
            }
        }

        let mut state = self.lock();
        state.index.clear();
        state.stats.entry_count = 0;
        state.stats.disk_used = 0;
        Ok(())
    }

    /// Rebuild the index from the blobs already in the cache directory.
    ///
    /// Needed before a byte limit can account for entries written by earlier
    /// sessions. Returns the number of entries found.
    pub fn load_from_disk(&self) -> CacheResult<usize> {
        let mut found = Vec::new();
        for entry in fs::read_dir(self.cache_dir.as_path())? {
            let entry = entry?;
            let Some(key) = entry.file_name().to_str().and_then(CacheKey::from_hex) else {
                continue;
            };
            let size = entry.metadata()?.len() as usize;
            found.push((key, size));
        }

        let mut state = self.lock();
        state.index.clear();
        state.stats.disk_used = 0;
        for (key, size) in &found {
            state.record(*key, *size);
        }
        state.evict_until_space_available(&self.cache_dir, 0)?;
        Ok(found.len())
    }

    /// Change the byte limit, evicting entries if usage is now over it.
    pub fn set_disk_limit(&self, disk_limit: Option<usize>) -> CacheResult<()> {
        let mut state = self.lock();
        state.disk_limit = disk_limit;
        state.evict_until_space_available(&self.cache_dir, 0)?;
        Ok(())
    }

    pub fn disk_limit(&self) -> Option<usize> {
        self.lock().disk_limit
    }

    pub fn disk_used(&self) -> usize {
        self.lock().stats.disk_used
    }

    pub fn entry_count(&self) -> usize {
        self.lock().stats.entry_count
    }

    pub fn stats(&self) -> DiskCacheStats {
        self.lock().stats
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}
