//! The process-wide current slide.
//!
//! Upload and load replace the current slide; tile, overlay and job requests
//! read it. Readers clone the `Arc` under the read lock, so a request keeps
//! working against the slide it started with even if a load lands midway.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use super::reader::Slide;

/// A slide installed as the current one.
pub struct LoadedSlide {
    pub filename: String,

    /// Bumped on every install; keys cached tiles so a replaced slide's
    /// tiles are never served for its successor.
    pub generation: u64,

    pub slide: Arc<dyn Slide>,
}

impl std::fmt::Debug for LoadedSlide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedSlide")
            .field("filename", &self.filename)
            .field("generation", &self.generation)
            .field("levels", &self.slide.level_count())
            .finish()
    }
}

/// Holder of the current slide.
#[derive(Default)]
pub struct SlideSession {
    current: RwLock<Option<Arc<LoadedSlide>>>,
    generation: AtomicU64,
}

impl SlideSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current slide, if any.
    pub async fn current(&self) -> Option<Arc<LoadedSlide>> {
        self.current.read().await.clone()
    }

    /// Replace the current slide.
    pub async fn install(
        &self,
        filename: impl Into<String>,
        slide: Arc<dyn Slide>,
    ) -> Arc<LoadedSlide> {
        let loaded = Arc::new(LoadedSlide {
            filename: filename.into(),
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
            slide,
        });

        *self.current.write().await = Some(Arc::clone(&loaded));

        info!(
            filename = %loaded.filename,
            generation = loaded.generation,
            levels = loaded.slide.level_count(),
            "Current slide replaced"
        );
        loaded
    }
}
