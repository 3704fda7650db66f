//! Cache of extracted tiles.
//!
//! Extraction (region read, JPEG decode of every covering stored tile and
//! resampling) dominates tile latency, so its output is cached. Post-process
//! and custom transform stages run after the cache, which lets a transform
//! change take effect on the very next request without any invalidation.
//!
//! # Cache Key
//!
//! - Slide generation (bumped every time a slide is installed)
//! - Viewer level, column and row
//! - Tile size
//!
//! # Size-Based Eviction
//!
//! The cache tracks the total size of cached pixel buffers in bytes and
//! evicts least-recently-used entries when the capacity is exceeded.

use std::num::NonZeroUsize;
use std::sync::Arc;

use image::RgbImage;
use lru::LruCache;
use tokio::sync::RwLock;

/// Default cache capacity: 256MB (about 340 tiles of 512x512)
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 256 * 1024 * 1024;

/// Upper bound on entry count, to bound LRU bookkeeping
const DEFAULT_MAX_ENTRIES: NonZeroUsize = match NonZeroUsize::new(10_000) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

// =============================================================================
// Cache Key
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCacheKey {
    pub generation: u64,
    pub viewer_level: u32,
    pub col: u32,
    pub row: u32,
    pub tile_size: u32,
}

impl TileCacheKey {
    pub fn new(generation: u64, viewer_level: u32, col: u32, row: u32, tile_size: u32) -> Self {
        Self {
            generation,
            viewer_level,
            col,
            row,
            tile_size,
        }
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// LRU cache of extracted tiles with size-based capacity.
pub struct TileCache {
    cache: RwLock<LruCache<TileCacheKey, Arc<RgbImage>>>,

    /// Maximum total size in bytes
    max_size: usize,

    /// Current total size in bytes
    current_size: RwLock<usize>,
}

fn entry_size(tile: &RgbImage) -> usize {
    tile.as_raw().len()
}

impl TileCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `max_size` bytes of pixels.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    pub fn with_capacity_and_entries(max_size: usize, max_entries: NonZeroUsize) -> Self {
        Self {
            cache: RwLock::new(LruCache::new(max_entries)),
            max_size,
            current_size: RwLock::new(0),
        }
    }

    /// Look up a tile, marking it recently used.
    pub async fn get(&self, key: &TileCacheKey) -> Option<Arc<RgbImage>> {
        let mut cache = self.cache.write().await;
        cache.get(key).cloned()
    }

    pub async fn contains(&self, key: &TileCacheKey) -> bool {
        let cache = self.cache.read().await;
        cache.contains(key)
    }

    /// Store a tile, evicting least-recently-used entries while over capacity.
    pub async fn put(&self, key: TileCacheKey, tile: Arc<RgbImage>) {
        let tile_size = entry_size(&tile);
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;

        if let Some(old) = cache.peek(&key) {
            *current_size = current_size.saturating_sub(entry_size(old));
        }

        // `push` hands back either the replaced value (already accounted
        // for above) or an entry dropped for the count bound
        if let Some((evicted_key, evicted)) = cache.push(key, tile) {
            if evicted_key != key {
                *current_size = current_size.saturating_sub(entry_size(&evicted));
            }
        }
        *current_size += tile_size;

        while *current_size > self.max_size {
            match cache.pop_lru() {
                Some((_, evicted)) => {
                    *current_size = current_size.saturating_sub(entry_size(&evicted));
                }
                None => break,
            }
        }
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        let mut current_size = self.current_size.write().await;
        cache.clear();
        *current_size = 0;
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Current total size of cached tiles in bytes.
    pub async fn size(&self) -> usize {
        *self.current_size.read().await
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}
