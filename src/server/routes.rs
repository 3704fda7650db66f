//! Router configuration for the WSI workbench.
//!
//! This module defines the HTTP routes and applies middleware for CORS,
//! upload size limits and request tracing.
//!
//! # Route Structure
//!
//! ```text
//! /health                              - Health check
//! /upload                              - Upload a slide (POST, multipart)
//! /load/{filename}                     - Load an uploaded slide
//! /slide/{level}/{col}_{row}.jpeg      - Tile endpoint
//! /update-script                       - Replace the custom transform (POST)
//! /list-files                          - List uploaded files
//! /api/segmentation                    - Nuclei overlays
//! /run-preprocess                      - Start nuclei detection (POST)
//! /get-progress, /get-result           - Poll nuclei detection
//! ```
//!
//! # Example
//!
//! ```ignore
//! use wsi_workbench::server::{create_router, AppState, RouterConfig};
//!
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["http://localhost:3000".to_string()]);
//! let router = create_router(app_state, config);
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:5588").await?;
//! axum::serve(listener, router).await?;
//! ```

use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    health_handler, list_files_handler, load_handler, progress_handler, result_handler,
    run_preprocess_handler, segmentation_handler, tile_handler, update_script_handler,
    upload_handler, AppState,
};

/// Default upload limit: 8 GiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 8 * 1024 * 1024 * 1024;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,

    /// Largest accepted upload body in bytes
    pub max_upload_bytes: u64,
}

impl RouterConfig {
    /// Create a new router configuration.
    ///
    /// By default:
    /// - CORS allows any origin
    /// - Tracing is enabled
    /// - Uploads are limited to 8 GiB
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            enable_tracing: true,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    /// Set specific allowed CORS origins.
    ///
    /// Pass an empty vec to disallow all cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    /// Enable or disable request tracing.
    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    pub fn with_max_upload_bytes(mut self, bytes: u64) -> Self {
        self.max_upload_bytes = bytes;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router.
///
/// # Arguments
///
/// * `app_state` - Shared services
/// * `config` - Router configuration
pub fn create_router(app_state: AppState, config: RouterConfig) -> Router {
    let cors = build_cors_layer(&config);

    // The multipart stream enforces its own limit; the body limit only has
    // to let a maximum-size upload plus multipart framing through.
    let body_limit = usize::try_from(config.max_upload_bytes.saturating_add(64 * 1024))
        .unwrap_or(usize::MAX);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/load/{filename}", get(load_handler))
        .route("/slide/{level}/{tile}", get(tile_handler))
        .route("/update-script", post(update_script_handler))
        .route("/list-files", get(list_files_handler))
        .route("/api/segmentation", get(segmentation_handler))
        .route("/run-preprocess", post(run_preprocess_handler))
        .route("/get-progress", get(progress_handler))
        .route("/get-result", get(result_handler))
        .with_state(app_state)
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

/// Build the CORS layer based on configuration.
fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed_origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed_origins)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
