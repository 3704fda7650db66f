//! Tile Service for orchestrating tile generation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           TileService                            │
//! │  get_tile()                                                      │
//! │  1. Current slide      4. Reload custom transform                │
//! │  2. Map viewer tile    5. Post-process pipeline + JPEG encode    │
//! │  3. Extract (cached)                                             │
//! │        │                    │                     │              │
//! │        ▼                    ▼                     ▼              │
//! │  ┌────────────┐   ┌───────────────────┐   ┌───────────────────┐  │
//! │  │ TileCache  │   │ TransformRegistry │   │ PostProcessPipeline│ │
//! │  └────────────┘   └───────────────────┘   └───────────────────┘  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The whole request is bounded by the configured tile timeout.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::TileError;
use crate::script::TransformRegistry;
use crate::slide::{LoadedSlide, Slide, SlideSession};

use super::cache::{TileCache, TileCacheKey};
use super::extractor::extract_tile;
use super::mapper::map_tile;
use super::pipeline::PostProcessPipeline;

/// Default tile edge in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 512;

/// Default per-request time limit.
pub const DEFAULT_TILE_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Tile Request / Response
// =============================================================================

/// A viewer tile request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRequest {
    pub viewer_level: u32,
    pub col: u32,
    pub row: u32,
    pub tile_size: u32,
}

impl TileRequest {
    pub fn new(viewer_level: u32, col: u32, row: u32) -> Self {
        Self::with_size(viewer_level, col, row, DEFAULT_TILE_SIZE)
    }

    pub fn with_size(viewer_level: u32, col: u32, row: u32, tile_size: u32) -> Self {
        Self {
            viewer_level,
            col,
            row,
            tile_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TileResponse {
    /// Encoded JPEG
    pub data: Bytes,

    /// Whether extraction was skipped thanks to the cache
    pub cache_hit: bool,

    /// Native level the pixels came from
    pub native_level: usize,
}

// =============================================================================
// Tile Service
// =============================================================================

/// Service producing encoded tiles for the current slide.
pub struct TileService {
    session: Arc<SlideSession>,
    registry: Arc<TransformRegistry>,
    pipeline: PostProcessPipeline,
    cache: TileCache,
    timeout: Duration,
}

impl TileService {
    pub fn new(
        session: Arc<SlideSession>,
        registry: Arc<TransformRegistry>,
        pipeline: PostProcessPipeline,
        cache: TileCache,
    ) -> Self {
        Self {
            session,
            registry,
            pipeline,
            cache,
            timeout: DEFAULT_TILE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session(&self) -> &Arc<SlideSession> {
        &self.session
    }

    pub fn registry(&self) -> &Arc<TransformRegistry> {
        &self.registry
    }

    /// Make `slide` the current slide and drop every cached tile.
    pub async fn install_slide(
        &self,
        filename: impl Into<String>,
        slide: Arc<dyn Slide>,
    ) -> Arc<LoadedSlide> {
        let loaded = self.session.install(filename, slide).await;
        self.cache.clear().await;
        loaded
    }

    /// Produce the encoded tile for a viewer request.
    ///
    /// # Errors
    ///
    /// - [`TileError::NoSlideLoaded`] before any upload or load
    /// - [`TileError::LevelOutOfRange`] when the mapped level is not in the slide
    /// - [`TileError::Timeout`] when the request exceeds the tile timeout
    /// - any extraction, transform or encoding failure
    ///
    /// The timeout abandons the request but cannot stop a transform that is
    /// already running on the blocking pool. That work finishes in the
    /// background, bounded by the script engine's operation limit, and its
    /// result is dropped.
    pub async fn get_tile(&self, request: TileRequest) -> Result<TileResponse, TileError> {
        tokio::time::timeout(self.timeout, self.render(request))
            .await
            .map_err(|_| TileError::Timeout {
                seconds: self.timeout.as_secs(),
            })?
    }

    async fn render(&self, request: TileRequest) -> Result<TileResponse, TileError> {
        let loaded = self
            .session
            .current()
            .await
            .ok_or(TileError::NoSlideLoaded)?;

        let mapping = map_tile(
            loaded.slide.level_dimensions(),
            request.viewer_level,
            request.col,
            request.row,
            request.tile_size,
        )?;
        let native_level = mapping.region.native_level;

        let key = TileCacheKey::new(
            loaded.generation,
            request.viewer_level,
            request.col,
            request.row,
            request.tile_size,
        );

        let (extracted, cache_hit) = match self.cache.get(&key).await {
            Some(tile) => (tile, true),
            None => {
                let tile = Arc::new(
                    extract_tile(loaded.slide.as_ref(), &mapping.region, request.tile_size).await?,
                );
                self.cache.put(key, Arc::clone(&tile)).await;
                (tile, false)
            }
        };

        let transform = self.registry.reload().await?;

        let pipeline = self.pipeline.clone();
        let tile = Arc::unwrap_or_clone(extracted);
        let data = tokio::task::spawn_blocking(move || {
            pipeline.run(tile, native_level, transform.as_deref())
        })
        .await
        .map_err(|e| TileError::Worker {
            message: e.to_string(),
        })??;

        debug!(
            slide = %loaded.filename,
            level = request.viewer_level,
            col = request.col,
            row = request.row,
            native_level,
            adjust = mapping.adjust_ratio,
            cache_hit,
            bytes = data.len(),
            "Served tile"
        );

        Ok(TileResponse {
            data,
            cache_hit,
            native_level,
        })
    }
}
