//! HTTP server layer for the WSI workbench.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │   /upload  /load  /slide  /update-script  /api/segmentation ... │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (requests, error mapping)│  │ (router, CORS, tracing)     │  │
//! │  └──────────────────────────┘  └─────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, list_files_handler, load_handler, progress_handler, result_handler,
    run_preprocess_handler, segmentation_handler, tile_handler, update_script_handler,
    upload_handler, ApiError, AppState, ErrorResponse, HealthResponse, SlideLoadedResponse,
};
pub use routes::{create_router, RouterConfig, DEFAULT_MAX_UPLOAD_BYTES};
