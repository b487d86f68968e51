//! Docview Cache Library
//!
//! Rendered-page cache: an LRU RAM working set in front of a content-addressed
//! PNG store on disk, keyed by an MD5 fingerprint of (document, page, width).

pub mod config;
pub mod disk;
pub mod error;
pub mod fingerprint;
pub mod ram;
pub mod render_cache;

pub use config::{CacheConfig, ConfigError};
pub use disk::{DiskCacheStats, DiskImageCache};
pub use error::{CacheError, CacheResult};
pub use fingerprint::CacheKey;
pub use ram::{CacheStats, RamImageCache};
pub use render_cache::{RenderCache, RenderCacheStats};
