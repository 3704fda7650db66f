//! HTTP request handlers for the WSI workbench API.
//!
//! # Endpoints
//!
//! - `POST /upload` - Upload a slide and make it current
//! - `GET /load/{filename}` - Make a previously uploaded slide current
//! - `GET /slide/{level}/{col}_{row}.jpeg` - Serve a viewer tile
//! - `POST /update-script` - Replace the custom tile transform
//! - `GET /list-files` - List the upload directory
//! - `GET /api/segmentation` - Nuclei overlay for a slide
//! - `POST /run-preprocess`, `GET /get-progress`, `GET /get-result` - Nuclei detection job
//! - `GET /health` - Health check endpoint

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{JobError, OverlayError, ScriptError, TileError, UploadError};
use crate::jobs::{DetectionParams, JobRunner, JobSnapshot, JobState};
use crate::overlay::{Overlay, OverlayType, SegmentationStore};
use crate::slide::{open_local_slide, LoadedSlide};
use crate::tile::{TileRequest, TileService, DEFAULT_TILE_SIZE};
use crate::upload::{FileEntry, PendingUpload, SlideStore};

// =============================================================================
// Application State
// =============================================================================

/// Shared application state, passed to all handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub tile_service: Arc<TileService>,
    pub slides: Arc<SlideStore>,
    pub overlays: Arc<SegmentationStore>,
    pub jobs: Arc<JobRunner>,

    /// Edge of served tiles in pixels
    pub tile_size: u32,
}

impl AppState {
    pub fn new(
        tile_service: TileService,
        slides: SlideStore,
        overlays: Arc<SegmentationStore>,
        jobs: JobRunner,
    ) -> Self {
        Self {
            tile_service: Arc::new(tile_service),
            slides: Arc::new(slides),
            overlays,
            jobs: Arc::new(jobs),
            tile_size: DEFAULT_TILE_SIZE,
        }
    }

    pub fn with_tile_size(mut self, tile_size: u32) -> Self {
        self.tile_size = tile_size;
        self
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Body of `POST /update-script`.
#[derive(Debug, Deserialize)]
pub struct UpdateScriptRequest {
    #[serde(default)]
    pub script: Option<String>,
}

/// Query parameters of `GET /api/segmentation`.
#[derive(Debug, Deserialize)]
pub struct SegmentationQuery {
    /// `centroid` (default) or `contour`
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    /// Slide to query; the current slide when absent
    #[serde(default)]
    pub slide: Option<String>,
}

/// Body of `POST /run-preprocess`.
#[derive(Debug, Default, Deserialize)]
pub struct PreprocessRequest {
    #[serde(default)]
    pub params: Option<DetectionParams>,
}

/// Parse a `{col}_{row}.jpeg` tile name.
fn parse_tile_name(name: &str) -> Option<(u32, u32)> {
    let stem = name.strip_suffix(".jpeg")?;
    let (col, row) = stem.split_once('_')?;
    Some((col.parse().ok()?, row.parse().ok()?))
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "not_found", "no_slide_loaded")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    /// HTTP status code (included for convenience)
    pub status: u16,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Response of upload and load: the slide that is now current.
#[derive(Debug, Serialize)]
pub struct SlideLoadedResponse {
    pub message: String,
    pub filename: String,

    /// `[width, height]` of every level, level 0 first
    pub dimensions: Vec<[u32; 2]>,
}

impl SlideLoadedResponse {
    fn new(message: &str, loaded: &LoadedSlide) -> Self {
        Self {
            message: message.to_string(),
            filename: loaded.filename.clone(),
            dimensions: loaded
                .slide
                .level_dimensions()
                .iter()
                .map(|&(w, h)| [w, h])
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FilesResponse {
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Serialize)]
pub struct PreprocessStartedResponse {
    pub message: String,
    pub job: u64,
}

#[derive(Debug, Serialize)]
pub struct PreprocessResultResponse {
    pub message: String,
    pub number_of_nuclei: usize,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Any error a handler can return.
#[derive(Debug)]
pub enum ApiError {
    Tile(TileError),
    Upload(UploadError),
    Overlay(OverlayError),
    Job(JobError),
    Script(ScriptError),
    BadRequest(String),
    NotFound(String),
}

impl From<TileError> for ApiError {
    fn from(err: TileError) -> Self {
        ApiError::Tile(err)
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        ApiError::Upload(err)
    }
}

impl From<OverlayError> for ApiError {
    fn from(err: OverlayError) -> Self {
        ApiError::Overlay(err)
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        ApiError::Job(err)
    }
}

impl From<ScriptError> for ApiError {
    fn from(err: ScriptError) -> Self {
        ApiError::Script(err)
    }
}

fn tile_error_parts(err: &TileError) -> (StatusCode, &'static str, String) {
    match err {
        TileError::NoSlideLoaded => (StatusCode::BAD_REQUEST, "no_slide_loaded", err.to_string()),
        TileError::LevelOutOfRange { .. } => {
            (StatusCode::NOT_FOUND, "level_out_of_range", err.to_string())
        }
        TileError::InvalidTileSize(_) => {
            (StatusCode::BAD_REQUEST, "invalid_tile_size", err.to_string())
        }
        TileError::Script(ScriptError::Transform(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "transform_error",
            err.to_string(),
        ),
        // Load failures surface with the same prefix as runtime failures
        TileError::Script(script_err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "transform_error",
            ScriptError::Transform(script_err.to_string()).to_string(),
        ),
        TileError::Timeout { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "timeout", err.to_string()),
        TileError::Slide(_)
        | TileError::PostProcess { .. }
        | TileError::EncodeError { .. }
        | TileError::Worker { .. } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "processing_error",
            err.to_string(),
        ),
    }
}

fn upload_error_parts(err: &UploadError) -> (StatusCode, &'static str, String) {
    let (status, error_type) = match err {
        UploadError::NoFilePart
        | UploadError::NoSelectedFile
        | UploadError::FileTypeNotAllowed
        | UploadError::Multipart(_) => (StatusCode::BAD_REQUEST, "invalid_upload"),
        UploadError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "upload_too_large"),
        UploadError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        UploadError::Open(_) => (StatusCode::INTERNAL_SERVER_ERROR, "load_error"),
        UploadError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
    };
    (status, error_type, err.to_string())
}

fn overlay_error_parts(err: &OverlayError) -> (StatusCode, &'static str, String) {
    let (status, error_type) = match err {
        OverlayError::InvalidType(_) => (StatusCode::BAD_REQUEST, "invalid_type"),
        OverlayError::NoSlide => (StatusCode::BAD_REQUEST, "no_slide_loaded"),
        OverlayError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        OverlayError::Read(_) => (StatusCode::INTERNAL_SERVER_ERROR, "segmentation_error"),
    };
    (status, error_type, err.to_string())
}

fn job_error_parts(err: &JobError) -> (StatusCode, &'static str, String) {
    let (status, error_type) = match err {
        JobError::NoSlideLoaded => (StatusCode::BAD_REQUEST, "no_slide_loaded"),
        JobError::AlreadyRunning => (StatusCode::CONFLICT, "job_running"),
        JobError::Failed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "job_failed"),
    };
    (status, error_type, err.to_string())
}

/// Convert ApiError to HTTP response.
///
/// This implementation logs errors based on their severity:
/// - 5xx errors are logged at ERROR level
/// - 404s are logged at DEBUG level (common and expected)
/// - other 4xx errors are logged at WARN level
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            ApiError::Tile(e) => tile_error_parts(e),
            ApiError::Upload(e) => upload_error_parts(e),
            ApiError::Overlay(e) => overlay_error_parts(e),
            ApiError::Job(e) => job_error_parts(e),
            ApiError::Script(e) => (StatusCode::INTERNAL_SERVER_ERROR, "script_error", e.to_string()),
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "invalid_request", message.clone())
            }
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message.clone()),
        };

        if status.is_server_error() {
            error!(
                error_type = error_type,
                status = status.as_u16(),
                "Server error: {}",
                message
            );
        } else if status == StatusCode::NOT_FOUND {
            debug!(
                error_type = error_type,
                status = status.as_u16(),
                "Resource not found: {}",
                message
            );
        } else {
            warn!(
                error_type = error_type,
                status = status.as_u16(),
                "Client error: {}",
                message
            );
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle slide uploads.
///
/// # Endpoint
///
/// `POST /upload` with a multipart body whose `file` field carries the slide.
///
/// The file is stored under its sanitised name, opened, and becomes the
/// current slide.
///
/// # Response
///
/// - `200 OK`: `{"message", "filename", "dimensions"}`
/// - `400 Bad Request`: `No file part`, `No selected file`, `File type not allowed`
/// - `413 Payload Too Large`: over the upload limit
/// - `500 Internal Server Error`: the stored file could not be opened as a slide
pub async fn upload_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SlideLoadedResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| UploadError::Multipart(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let client_name = field.file_name().unwrap_or_default().to_string();
        let pending = state.slides.begin_upload(&client_name).await?;
        let (filename, path) = receive_upload(field, pending).await?;

        let slide = open_local_slide(&path).await.map_err(UploadError::from)?;
        let loaded = state.tile_service.install_slide(filename, slide).await;

        return Ok(Json(SlideLoadedResponse::new(
            "File uploaded and processed successfully",
            &loaded,
        )));
    }

    Err(UploadError::NoFilePart.into())
}

async fn receive_upload(
    mut field: axum::extract::multipart::Field<'_>,
    mut pending: PendingUpload,
) -> Result<(String, std::path::PathBuf), UploadError> {
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                pending.abort().await;
                return Err(UploadError::Multipart(e.to_string()));
            }
        };
        if let Err(e) = pending.write_chunk(&chunk).await {
            pending.abort().await;
            return Err(e);
        }
    }
    pending.finish().await
}

/// Handle loading a previously uploaded slide.
///
/// # Endpoint
///
/// `GET /load/{filename}`
///
/// # Response
///
/// - `200 OK`: `{"message", "filename", "dimensions"}`
/// - `404 Not Found`: no such file in the upload directory
/// - `500 Internal Server Error`: the file could not be opened as a slide
pub async fn load_handler(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<SlideLoadedResponse>, ApiError> {
    let (filename, slide) = state.slides.open(&filename).await?;
    let loaded = state.tile_service.install_slide(filename, slide).await;
    Ok(Json(SlideLoadedResponse::new(
        "Slide loaded successfully",
        &loaded,
    )))
}

/// Handle viewer tile requests.
///
/// # Endpoint
///
/// `GET /slide/{level}/{col}_{row}.jpeg`
///
/// `level` is a deep-zoom level, 0 being the coarsest.
///
/// # Response
///
/// - `200 OK`: JPEG tile with `Content-Type: image/jpeg`
/// - `400 Bad Request`: no slide loaded
/// - `404 Not Found`: malformed tile name or level outside the slide
/// - `500 Internal Server Error`: extraction, transform or encoding failure
///
/// # Headers
///
/// - `Cache-Control: no-store`, since the transform may change at any time
/// - `X-Tile-Cache-Hit: true|false`
pub async fn tile_handler(
    State(state): State<AppState>,
    Path((level, tile)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let level: u32 = level
        .parse()
        .map_err(|_| ApiError::NotFound(format!("Invalid level: {}", level)))?;
    let (col, row) = parse_tile_name(&tile)
        .ok_or_else(|| ApiError::NotFound(format!("Invalid tile name: {}", tile)))?;

    let request = TileRequest::with_size(level, col, row, state.tile_size);
    let tile = state.tile_service.get_tile(request).await?;

    let mut response = Body::from(tile.data).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/jpeg"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        "x-tile-cache-hit",
        HeaderValue::from_static(if tile.cache_hit { "true" } else { "false" }),
    );
    Ok(response)
}

/// Handle custom transform updates.
///
/// # Endpoint
///
/// `POST /update-script` with JSON body `{"script": "<source>"}`
///
/// The script is stored and takes effect on the next tile request. It is
/// not validated here; a broken script makes tile requests fail until fixed.
///
/// # Response
///
/// - `200 OK`: `{"message": "Script updated successfully"}`
/// - `400 Bad Request`: missing or empty script
pub async fn update_script_handler(
    State(state): State<AppState>,
    body: Result<Json<UpdateScriptRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let script = body
        .ok()
        .and_then(|Json(body)| body.script)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No script content provided".to_string()))?;

    state
        .tile_service
        .registry()
        .update_script(&script)
        .await?;

    Ok(Json(MessageResponse::new("Script updated successfully")))
}

/// Handle upload directory listings.
///
/// # Endpoint
///
/// `GET /list-files`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "files": [
///     {"filename": "CMU-1.svs", "size": 177552579, "size_kb": 173391.2, "modified": "Mon Oct  5 14:03:09 2026"}
///   ]
/// }
/// ```
pub async fn list_files_handler(
    State(state): State<AppState>,
) -> Result<Json<FilesResponse>, ApiError> {
    let files = state.slides.list_files().await?;
    Ok(Json(FilesResponse { files }))
}

/// Handle segmentation overlay queries.
///
/// # Endpoint
///
/// `GET /api/segmentation?type={centroid|contour}&slide={filename}`
///
/// `type` defaults to `centroid`; `slide` defaults to the current slide.
///
/// # Response
///
/// - `200 OK`: `{"type": "...", "data": [...]}`
/// - `400 Bad Request`: invalid type, or no slide named and none loaded
/// - `404 Not Found`: the slide has no segmentation results
/// - `500 Internal Server Error`: the results could not be read
pub async fn segmentation_handler(
    State(state): State<AppState>,
    Query(query): Query<SegmentationQuery>,
) -> Result<Json<Overlay>, ApiError> {
    let kind: OverlayType = query.kind.as_deref().unwrap_or("centroid").parse()?;

    let slide = match query.slide {
        Some(slide) if !slide.is_empty() => slide,
        _ => state
            .tile_service
            .session()
            .current()
            .await
            .map(|loaded| loaded.filename.clone())
            .ok_or(OverlayError::NoSlide)?,
    };

    let overlay = state.overlays.query(&slide, kind).await?;
    Ok(Json(overlay))
}

/// Handle preprocessing start requests.
///
/// # Endpoint
///
/// `POST /run-preprocess` with optional JSON body
/// `{"params": {"level": 2, "blur_sigma": 1.0, "min_area": 4, "max_area": 5000}}`
///
/// # Response
///
/// - `200 OK`: `{"message": "Preprocess started", "job": <id>}`
/// - `400 Bad Request`: no slide loaded, or malformed parameters
/// - `409 Conflict`: a job is already running
pub async fn run_preprocess_handler(
    State(state): State<AppState>,
    body: Result<Json<PreprocessRequest>, JsonRejection>,
) -> Result<Json<PreprocessStartedResponse>, ApiError> {
    let request = match body {
        Ok(Json(request)) => request,
        // No JSON body at all means default parameters
        Err(JsonRejection::MissingJsonContentType(_)) => PreprocessRequest::default(),
        Err(rejection) => return Err(ApiError::BadRequest(rejection.body_text())),
    };

    let loaded = state
        .tile_service
        .session()
        .current()
        .await
        .ok_or(JobError::NoSlideLoaded)?;

    let job = state
        .jobs
        .start(loaded, request.params.unwrap_or_default())?;

    Ok(Json(PreprocessStartedResponse {
        message: "Preprocess started".to_string(),
        job,
    }))
}

/// Handle job progress polling.
///
/// # Endpoint
///
/// `GET /get-progress`
///
/// # Response
///
/// `200 OK`: `{"id": 1, "state": "running", "progress": 42, "slide": "CMU-1.svs"}`
pub async fn progress_handler(State(state): State<AppState>) -> Json<JobSnapshot> {
    Json(state.jobs.tracker().snapshot())
}

/// Handle job result polling.
///
/// # Endpoint
///
/// `GET /get-result`
///
/// # Response
///
/// - `200 OK`: `{"message", "number_of_nuclei"}`
/// - `202 Accepted`: `{"message": "Processing not complete yet"}`
/// - `500 Internal Server Error`: the job failed
pub async fn result_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    match state.jobs.tracker().state() {
        JobState::Succeeded { count } => Ok(Json(PreprocessResultResponse {
            message: "Run preprocess finished successfully".to_string(),
            number_of_nuclei: count,
        })
        .into_response()),
        JobState::Pending | JobState::Running { .. } => Ok((
            StatusCode::ACCEPTED,
            Json(MessageResponse::new("Processing not complete yet")),
        )
            .into_response()),
        JobState::Failed { message } => Err(JobError::Failed(message).into()),
    }
}

/// Handle health check requests.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response
///
/// `200 OK` with JSON body:
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0"
/// }
/// ```
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
