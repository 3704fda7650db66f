//! WSI Workbench - A deep-zoom tile server for Whole Slide Images.
//!
//! This binary starts the HTTP server and configures all components.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_workbench::{
    config::Config,
    jobs::{JobRunner, JobTracker},
    overlay::SegmentationStore,
    script::TransformRegistry,
    server::{create_router, AppState, RouterConfig},
    slide::SlideSession,
    tile::{IdentityPostProcess, JpegTileEncoder, PostProcessPipeline, TileCache, TileService},
    upload::SlideStore,
};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    info!("WSI Workbench v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Upload directory: {}", config.upload_dir.display());
    info!("  Transform script: {}", config.script_path.display());
    info!(
        "  Tiles: {}px, JPEG quality {}, {}s timeout, {}MB cache",
        config.tile_size,
        config.jpeg_quality,
        config.tile_timeout_secs,
        config.cache_tiles / (1024 * 1024)
    );

    let slides = SlideStore::new(&config.upload_dir, config.max_upload_bytes);
    if let Err(e) = slides.ensure_dir().await {
        error!("Failed to create upload directory: {}", e);
        return ExitCode::FAILURE;
    }

    match slides.list_files().await {
        Ok(files) => info!("  Found {} file(s) in the upload directory", files.len()),
        Err(e) => warn!("  Could not list the upload directory: {}", e),
    }

    let app_state = build_app_state(&config, slides);
    let router = create_router(app_state, build_router_config(&config));

    let addr = config.bind_address();

    info!("");
    info!("────────────────────────────────────────────────────────────────");
    info!("  Server listening on: http://{}", addr);
    info!("");
    info!("  Try these endpoints:");
    info!("    curl http://{}/health", addr);
    info!("    curl http://{}/list-files", addr);
    info!("    curl -F file=@slide.svs http://{}/upload", addr);
    info!("────────────────────────────────────────────────────────────────");
    info!("");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", addr, e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = axum::serve(listener, router).await {
        error!("Server error: {}", e);
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_workbench=debug,tower_http=debug,script=debug"
    } else {
        "wsi_workbench=info,tower_http=info,script=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wire the services together.
fn build_app_state(config: &Config, slides: SlideStore) -> AppState {
    let session = Arc::new(SlideSession::new());
    let registry = Arc::new(TransformRegistry::new(
        &config.script_path,
        config.script_max_operations,
    ));
    let pipeline = PostProcessPipeline::new(
        Arc::new(IdentityPostProcess),
        JpegTileEncoder::new(config.jpeg_quality),
    );

    let tile_service = TileService::new(
        session,
        registry,
        pipeline,
        TileCache::with_capacity(config.cache_tiles),
    )
    .with_timeout(config.tile_timeout());

    let overlays = Arc::new(SegmentationStore::new(
        &config.upload_dir,
        config.contour_limit,
    ));
    let jobs = JobRunner::new(Arc::new(JobTracker::new()), Arc::clone(&overlays));

    AppState::new(tile_service, slides, overlays, jobs).with_tile_size(config.tile_size)
}

/// Build RouterConfig from the application Config.
fn build_router_config(config: &Config) -> RouterConfig {
    let mut router_config = RouterConfig::new()
        .with_max_upload_bytes(config.max_upload_bytes)
        .with_tracing(!config.no_tracing);

    if let Some(ref origins) = config.cors_origins {
        router_config = router_config.with_cors_origins(origins.clone());
    }

    router_config
}
