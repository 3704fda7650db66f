//! Configuration management for the WSI workbench.
//!
//! This module provides a configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `WSI_` prefix
//! - Sensible defaults for every setting
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use wsi_workbench::config::Config;
//!
//! let config = Config::parse();
//! println!("Listening on {}", config.bind_address());
//! ```
//!
//! # Environment Variables
//!
//! - `WSI_HOST` - Server bind address (default: 127.0.0.1)
//! - `WSI_PORT` - Server port (default: 5588)
//! - `WSI_UPLOAD_DIR` - Directory for uploaded slides and segmentation results
//! - `WSI_SCRIPT_PATH` - Custom transform script (default: scripts/process_tile.rhai)
//! - `WSI_TILE_SIZE` - Tile edge in pixels (default: 512)
//! - `WSI_JPEG_QUALITY` - JPEG quality (default: 70)
//! - `WSI_TILE_TIMEOUT_SECS` - Per-tile time limit (default: 30)
//! - `WSI_SCRIPT_MAX_OPERATIONS` - Script operation limit per call
//! - `WSI_CACHE_TILES` - Extracted tile cache size in bytes (default: 256MB)
//! - `WSI_CONTOUR_LIMIT` - Contours returned per overlay query (default: 10000)
//! - `WSI_MAX_UPLOAD_BYTES` - Upload size limit (default: 8GB)
//! - `WSI_CORS_ORIGINS` - Allowed CORS origins, comma-separated (default: any)

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::overlay::DEFAULT_CONTOUR_LIMIT;
use crate::server::DEFAULT_MAX_UPLOAD_BYTES;
use crate::tile::{
    DEFAULT_JPEG_QUALITY, DEFAULT_TILE_CACHE_CAPACITY, DEFAULT_TILE_SIZE, DEFAULT_TILE_TIMEOUT,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default server host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port.
pub const DEFAULT_PORT: u16 = 5588;

/// Default directory for uploads.
pub const DEFAULT_UPLOAD_DIR: &str = "uploaded_wsi";

/// Default custom transform location.
pub const DEFAULT_SCRIPT_PATH: &str = "scripts/process_tile.rhai";

/// Default script operation limit per `process_tile` call.
pub const DEFAULT_SCRIPT_MAX_OPERATIONS: u64 = 50_000_000;

/// Largest accepted tile size.
pub const MAX_TILE_SIZE: u32 = 4096;

// =============================================================================
// CLI Arguments
// =============================================================================

/// WSI Workbench - A deep-zoom tile server for Whole Slide Images.
///
/// Serves viewer tiles from uploaded slides through a hot-reloadable
/// post-processing transform, with nuclei segmentation overlays.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-workbench")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Host address to bind the server to.
    #[arg(long, default_value = DEFAULT_HOST, env = "WSI_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "WSI_PORT")]
    pub port: u16,

    // =========================================================================
    // Storage Configuration
    // =========================================================================
    /// Directory holding uploaded slides and their segmentation results.
    #[arg(long, default_value = DEFAULT_UPLOAD_DIR, env = "WSI_UPLOAD_DIR")]
    pub upload_dir: PathBuf,

    /// Largest accepted upload in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES, env = "WSI_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: u64,

    // =========================================================================
    // Tile Configuration
    // =========================================================================
    /// Edge of served tiles in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE, env = "WSI_TILE_SIZE")]
    pub tile_size: u32,

    /// JPEG quality for tile encoding (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "WSI_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    /// Time limit for a single tile request, in seconds.
    #[arg(long, default_value_t = DEFAULT_TILE_TIMEOUT.as_secs(), env = "WSI_TILE_TIMEOUT_SECS")]
    pub tile_timeout_secs: u64,

    /// Size of the extracted tile cache in bytes.
    #[arg(long, default_value_t = DEFAULT_TILE_CACHE_CAPACITY, env = "WSI_CACHE_TILES")]
    pub cache_tiles: usize,

    // =========================================================================
    // Transform Configuration
    // =========================================================================
    /// Custom transform script, re-read on every tile request.
    #[arg(long, default_value = DEFAULT_SCRIPT_PATH, env = "WSI_SCRIPT_PATH")]
    pub script_path: PathBuf,

    /// Operation limit for a single script call.
    #[arg(
        long,
        default_value_t = DEFAULT_SCRIPT_MAX_OPERATIONS,
        env = "WSI_SCRIPT_MAX_OPERATIONS"
    )]
    pub script_max_operations: u64,

    // =========================================================================
    // Overlay Configuration
    // =========================================================================
    /// Maximum number of contours returned by a segmentation query.
    #[arg(long, default_value_t = DEFAULT_CONTOUR_LIMIT, env = "WSI_CONTOUR_LIMIT")]
    pub contour_limit: usize,

    // =========================================================================
    // CORS Configuration
    // =========================================================================
    /// Allowed CORS origins (comma-separated).
    ///
    /// If not specified, allows any origin.
    #[arg(long, env = "WSI_CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Option<Vec<String>>,

    // =========================================================================
    // Logging Configuration
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Disable request tracing.
    #[arg(long, default_value_t = false)]
    pub no_tracing: bool,
}

impl Config {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.tile_size == 0 || self.tile_size > MAX_TILE_SIZE {
            return Err(format!("tile_size must be between 1 and {}", MAX_TILE_SIZE));
        }

        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        if self.tile_timeout_secs == 0 {
            return Err("tile_timeout_secs must be greater than 0".to_string());
        }
        if self.cache_tiles == 0 {
            return Err("cache_tiles must be greater than 0".to_string());
        }
        if self.contour_limit == 0 {
            return Err("contour_limit must be greater than 0".to_string());
        }
        if self.script_max_operations == 0 {
            return Err("script_max_operations must be greater than 0".to_string());
        }

        if self.upload_dir.as_os_str().is_empty() {
            return Err("upload_dir must not be empty. Set --upload-dir or WSI_UPLOAD_DIR".to_string());
        }

        Ok(())
    }

    /// Get the server bind address as "host:port".
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tile_timeout(&self) -> Duration {
        Duration::from_secs(self.tile_timeout_secs)
    }
}

// =============================================================================
// Tests
// =============================================================================
