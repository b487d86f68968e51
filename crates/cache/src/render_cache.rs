//! Two-level cache for rendered pages.
//!
//! Lookups try the RAM working set first and fall back to the persistent
//! store, promoting disk hits into RAM. Writes go to both levels.

use crate::config::CacheConfig;
use crate::disk::{DiskCacheStats, DiskImageCache};
use crate::error::CacheResult;
use crate::fingerprint::CacheKey;
use crate::ram::{CacheStats, RamImageCache};
use image::RgbaImage;
use log::{debug, info};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderCacheStats {
    pub ram: CacheStats,
    /// `None` when the cache is RAM-only
    pub disk: Option<DiskCacheStats>,
}

/// Rendered-page cache keyed by (document, page, width).
pub struct RenderCache {
    ram: RamImageCache,
    disk: Option<DiskImageCache>,
}

impl RenderCache {
    /// Build the cache described by `config`, creating the store directory
    /// when persistence is enabled.
    pub fn new(config: &CacheConfig) -> CacheResult<Self> {
        let ram = RamImageCache::new(config.ram_cache_size);
        if !config.persistent {
            return Ok(Self { ram, disk: None });
        }

        let disk = DiskImageCache::new(&config.disk_cache_dir, config.disk_cache_limit)?;
        if config.disk_cache_limit.is_some() {
            let found = disk.load_from_disk()?;
            debug!("indexed {found} cached page(s) in {}", disk.cache_dir().display());
        }
        info!(
            "render cache: {} MB RAM, store at {}",
            config.ram_cache_mb(),
            disk.cache_dir().display()
        );

        Ok(Self { ram, disk: Some(disk) })
    }

    /// RAM-only cache holding at most `memory_limit` bytes.
    pub fn in_memory(memory_limit: usize) -> Self {
        Self { ram: RamImageCache::new(memory_limit), disk: None }
    }

    pub fn with_disk(memory_limit: usize, disk: DiskImageCache) -> Self {
        Self { ram: RamImageCache::new(memory_limit), disk: Some(disk) }
    }

    pub fn key(document: &str, page: usize, width: u32) -> CacheKey {
        CacheKey::derive(document, page, width)
    }

    /// Look up a rendered page.
    pub fn get(
        &self,
        document: &str,
        page: usize,
        width: u32,
    ) -> CacheResult<Option<Arc<RgbaImage>>> {
        let key = Self::key(document, page, width);

        if let Some(image) = self.ram.get(&key) {
            return Ok(Some(image));
        }

        let Some(disk) = &self.disk else {
            return Ok(None);
        };
        match disk.get(&key)? {
            Some(image) => {
                debug!("promoting page {page} at {width}px from disk");
                Ok(Some(self.ram.put(key, image)))
            }
            None => Ok(None),
        }
    }

    /// Store a rendered page.
    ///
    /// The RAM level is always updated; a failure writing the persistent
    /// level is returned to the caller.
    pub fn put(
        &self,
        document: &str,
        page: usize,
        width: u32,
        image: Arc<RgbaImage>,
    ) -> CacheResult<()> {
        let key = Self::key(document, page, width);
        let image = self.ram.put(key, image);

        if let Some(disk) = &self.disk {
            disk.put(key, &image)?;
        }
        Ok(())
    }

    pub fn contains(&self, document: &str, page: usize, width: u32) -> bool {
        let key = Self::key(document, page, width);
        self.ram.contains(&key) || self.disk.as_ref().is_some_and(|disk| disk.contains(&key))
    }

    /// Drop everything from both levels.
    pub fn clear(&self) -> CacheResult<()> {
        self.ram.clear();
        if let Some(disk) = &self.disk {
            disk.clear()?;
        }
        Ok(())
    }

    pub fn disk(&self) -> Option<&DiskImageCache> {
        self.disk.as_ref()
    }

    pub fn stats(&self) -> RenderCacheStats {
        RenderCacheStats { ram: self.ram.stats(), disk: self.disk.as_ref().map(DiskImageCache::stats) }
    }
}
