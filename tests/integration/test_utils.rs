//! Test utilities for integration tests.
//!
//! Provides a builder for real pyramidal TIFF files with JPEG tiles, a
//! fully wired router over temporary directories, and request helpers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use tower::ServiceExt;

use wsi_workbench::jobs::{JobRunner, JobTracker};
use wsi_workbench::overlay::SegmentationStore;
use wsi_workbench::script::TransformRegistry;
use wsi_workbench::server::{create_router, AppState, RouterConfig};
use wsi_workbench::slide::SlideSession;
use wsi_workbench::tile::{
    IdentityPostProcess, JpegTileEncoder, PostProcessPipeline, TileCache, TileService,
};
use wsi_workbench::upload::SlideStore;

// =============================================================================
// Test Slides
// =============================================================================

/// Colour of every pixel of [`uniform_slide`].
pub const BACKGROUND: [u8; 3] = [200, 120, 60];

/// Level sizes shared by the test slides.
pub const TEST_LEVELS: [(u32, u32); 3] = [(2048, 1536), (1024, 768), (512, 384)];

/// Number of dark spots in [`spotty_slide`].
pub const SPOT_COUNT: usize = 48;

/// Pitch of the spot grid, in pixels of the coarsest level.
const SPOT_PITCH: u32 = 64;

/// Three-level pyramid filled with [`BACKGROUND`].
pub fn uniform_slide() -> Vec<u8> {
    PyramidTiffBuilder::new(256)
        .with_levels(&TEST_LEVELS)
        .with_pixels(|_, _, _| BACKGROUND)
        .build()
}

/// Three-level pyramid with a grid of dark square spots on a light field.
///
/// On the coarsest level the spots are 8x8 squares every 64 pixels, giving
/// [`SPOT_COUNT`] spots on a 512x384 image.
pub fn spotty_slide() -> Vec<u8> {
    let coarsest = TEST_LEVELS.len() - 1;
    PyramidTiffBuilder::new(256)
        .with_levels(&TEST_LEVELS)
        .with_pixels(move |level, x, y| {
            let shift = (coarsest - level) as u32;
            let (cx, cy) = (x >> shift, y >> shift);
            let in_spot = |v: u32| (SPOT_PITCH / 2..SPOT_PITCH / 2 + 8).contains(&(v % SPOT_PITCH));
            if in_spot(cx) && in_spot(cy) {
                [40, 20, 60]
            } else {
                [235, 225, 230]
            }
        })
        .build()
}

/// Write `bytes` into `dir` under `name`.
pub fn write_slide(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

// =============================================================================
// JPEG Helpers
// =============================================================================

/// Encode an RGB image as a complete baseline JPEG.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder.encode_image(img).unwrap();
    buf
}

/// Check that data looks like a complete JPEG (SOI ... EOI).
pub fn is_valid_jpeg(data: &[u8]) -> bool {
    data.len() >= 4 && data.starts_with(&[0xFF, 0xD8]) && data.ends_with(&[0xFF, 0xD9])
}

pub fn decode_jpeg(data: &[u8]) -> RgbImage {
    image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .unwrap()
        .to_rgb8()
}

/// True when every channel of `actual` is within `tolerance` of `expected`.
pub fn close_to(actual: &Rgb<u8>, expected: [u8; 3], tolerance: u8) -> bool {
    actual
        .0
        .iter()
        .zip(expected)
        .all(|(a, e)| a.abs_diff(e) <= tolerance)
}

// =============================================================================
// TIFF Builder
// =============================================================================

const TYPE_ASCII: u16 = 2;
const TYPE_SHORT: u16 = 3;
const TYPE_LONG: u16 = 4;

/// Byte order of a built file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// One tiled level of a built pyramid.
#[derive(Debug, Clone, Copy)]
struct LevelSpec {
    width: u32,
    height: u32,
    compression: u16,
}

enum EntryValue {
    Short(u16),
    Long(u32),
    /// Value stored elsewhere in the file
    Offset(u32),
}

struct Entry {
    tag: u16,
    field_type: u16,
    count: u32,
    value: EntryValue,
}

impl Entry {
    fn short(tag: u16, value: u16) -> Self {
        Entry {
            tag,
            field_type: TYPE_SHORT,
            count: 1,
            value: EntryValue::Short(value),
        }
    }

    fn long(tag: u16, value: u32) -> Self {
        Entry {
            tag,
            field_type: TYPE_LONG,
            count: 1,
            value: EntryValue::Long(value),
        }
    }
}

type PixelFn = Box<dyn Fn(usize, u32, u32) -> [u8; 3]>;

/// Builds classic TIFF files with one tiled JPEG IFD per pyramid level.
///
/// Each tile is a complete JPEG stream. IFDs follow their own tile data and
/// are chained through their next-IFD offsets, level 0 first.
pub struct PyramidTiffBuilder {
    endian: Endian,
    tile_size: u32,
    quality: u8,
    levels: Vec<LevelSpec>,
    description: Option<String>,
    strip_image: Option<(u32, u32)>,
    pixels: PixelFn,
}

impl PyramidTiffBuilder {
    pub fn new(tile_size: u32) -> Self {
        Self {
            endian: Endian::Little,
            tile_size,
            quality: 95,
            levels: Vec::new(),
            description: None,
            strip_image: None,
            pixels: Box::new(|_, _, _| [128, 128, 128]),
        }
    }

    pub fn with_endian(mut self, endian: Endian) -> Self {
        self.endian = endian;
        self
    }

    /// Add JPEG-compressed levels, largest first.
    pub fn with_levels(mut self, dims: &[(u32, u32)]) -> Self {
        self.levels.extend(dims.iter().map(|&(width, height)| LevelSpec {
            width,
            height,
            compression: 7,
        }));
        self
    }

    /// Override the compression tag written for every level.
    pub fn with_compression(mut self, compression: u16) -> Self {
        for level in &mut self.levels {
            level.compression = compression;
        }
        self
    }

    /// ImageDescription of the first IFD.
    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Append an uncompressed, stripped IFD after the pyramid, the way
    /// scanners store label and macro images.
    pub fn with_strip_image(mut self, width: u32, height: u32) -> Self {
        self.strip_image = Some((width, height));
        self
    }

    /// Pixel source: `(level, x, y)` in that level's pixel coordinates.
    pub fn with_pixels(mut self, pixels: impl Fn(usize, u32, u32) -> [u8; 3] + 'static) -> Self {
        self.pixels = Box::new(pixels);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut w = TiffWriter::new(self.endian);
        let mut next_link = w.header();

        for (index, level) in self.levels.iter().enumerate() {
            let tiles_x = level.width.div_ceil(self.tile_size);
            let tiles_y = level.height.div_ceil(self.tile_size);

            let mut offsets = Vec::new();
            let mut counts = Vec::new();
            for ty in 0..tiles_y {
                for tx in 0..tiles_x {
                    let tile = RgbImage::from_fn(self.tile_size, self.tile_size, |x, y| {
                        Rgb((self.pixels)(
                            index,
                            tx * self.tile_size + x,
                            ty * self.tile_size + y,
                        ))
                    });
                    let jpeg = encode_jpeg(&tile, self.quality);
                    offsets.push(w.len());
                    counts.push(jpeg.len() as u32);
                    w.bytes(&jpeg);
                }
            }

            let mut entries = vec![
                Entry::long(256, level.width),
                Entry::long(257, level.height),
                Entry::short(258, 8),
                Entry::short(259, level.compression),
                Entry::short(262, 6),
                Entry::short(277, 3),
                Entry::short(322, self.tile_size as u16),
                Entry::short(323, self.tile_size as u16),
                w.long_array(324, &offsets),
                w.long_array(325, &counts),
            ];
            if index == 0 {
                if let Some(ref description) = self.description {
                    entries.push(w.ascii(270, description));
                }
            }

            next_link = w.ifd(next_link, entries);
        }

        if let Some((width, height)) = self.strip_image {
            let data = vec![255u8; (width * height * 3) as usize];
            let offset = w.len();
            w.bytes(&data);
            let entries = vec![
                Entry::long(256, width),
                Entry::long(257, height),
                Entry::short(258, 8),
                Entry::short(259, 1),
                Entry::short(262, 2),
                Entry::long(273, offset),
                Entry::short(277, 3),
                Entry::long(278, height),
                Entry::long(279, data.len() as u32),
            ];
            w.ifd(next_link, entries);
        }

        w.finish()
    }
}

struct TiffWriter {
    endian: Endian,
    out: Vec<u8>,
}

impl TiffWriter {
    fn new(endian: Endian) -> Self {
        Self {
            endian,
            out: Vec::new(),
        }
    }

    fn len(&self) -> u32 {
        self.out.len() as u32
    }

    fn bytes(&mut self, data: &[u8]) {
        self.out.extend_from_slice(data);
    }

    fn u16(&mut self, value: u16) {
        match self.endian {
            Endian::Little => self.out.extend_from_slice(&value.to_le_bytes()),
            Endian::Big => self.out.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn u32(&mut self, value: u32) {
        match self.endian {
            Endian::Little => self.out.extend_from_slice(&value.to_le_bytes()),
            Endian::Big => self.out.extend_from_slice(&value.to_be_bytes()),
        }
    }

    fn patch_u32(&mut self, at: usize, value: u32) {
        let bytes = match self.endian {
            Endian::Little => value.to_le_bytes(),
            Endian::Big => value.to_be_bytes(),
        };
        self.out[at..at + 4].copy_from_slice(&bytes);
    }

    fn align(&mut self) {
        if self.out.len() % 2 == 1 {
            self.out.push(0);
        }
    }

    /// Write the header; returns the position of the first-IFD offset.
    fn header(&mut self) -> usize {
        match self.endian {
            Endian::Little => self.bytes(b"II"),
            Endian::Big => self.bytes(b"MM"),
        }
        self.u16(42);
        let link = self.out.len();
        self.u32(0);
        link
    }

    fn long_array(&mut self, tag: u16, values: &[u32]) -> Entry {
        if values.len() == 1 {
            return Entry::long(tag, values[0]);
        }
        self.align();
        let offset = self.len();
        for &value in values {
            self.u32(value);
        }
        Entry {
            tag,
            field_type: TYPE_LONG,
            count: values.len() as u32,
            value: EntryValue::Offset(offset),
        }
    }

    fn ascii(&mut self, tag: u16, text: &str) -> Entry {
        self.align();
        let offset = self.len();
        self.bytes(text.as_bytes());
        self.out.push(0);
        Entry {
            tag,
            field_type: TYPE_ASCII,
            count: text.len() as u32 + 1,
            value: EntryValue::Offset(offset),
        }
    }

    /// Write an IFD, link it from `link`, and return its own next-IFD slot.
    fn ifd(&mut self, link: usize, mut entries: Vec<Entry>) -> usize {
        entries.sort_by_key(|e| e.tag);

        self.align();
        let position = self.len();
        self.patch_u32(link, position);

        self.u16(entries.len() as u16);
        for entry in &entries {
            self.u16(entry.tag);
            self.u16(entry.field_type);
            self.u32(entry.count);
            match entry.value {
                EntryValue::Short(v) => {
                    self.u16(v);
                    self.u16(0);
                }
                EntryValue::Long(v) | EntryValue::Offset(v) => self.u32(v),
            }
        }

        let next = self.out.len();
        self.u32(0);
        next
    }

    fn finish(self) -> Vec<u8> {
        self.out
    }
}

// =============================================================================
// Application Harness
// =============================================================================

/// A router wired to real services over a temporary directory.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub upload_dir: PathBuf,
    pub script_path: PathBuf,
    _root: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_upload_limit(64 * 1024 * 1024)
    }

    pub fn with_upload_limit(max_upload_bytes: u64) -> Self {
        let root = tempfile::tempdir().unwrap();
        let upload_dir = root.path().join("uploads");
        std::fs::create_dir_all(&upload_dir).unwrap();
        let script_path = root.path().join("scripts").join("process_tile.rhai");

        let tile_service = TileService::new(
            Arc::new(SlideSession::new()),
            Arc::new(TransformRegistry::new(&script_path, 10_000_000)),
            PostProcessPipeline::new(Arc::new(IdentityPostProcess), JpegTileEncoder::new(90)),
            TileCache::with_capacity(64 * 1024 * 1024),
        );
        let overlays = Arc::new(SegmentationStore::new(&upload_dir, 10_000));
        let jobs = JobRunner::new(Arc::new(JobTracker::new()), Arc::clone(&overlays));
        let state = AppState::new(
            tile_service,
            SlideStore::new(&upload_dir, max_upload_bytes),
            overlays,
            jobs,
        );

        let config = RouterConfig::new()
            .with_tracing(false)
            .with_max_upload_bytes(max_upload_bytes);
        let router = create_router(state.clone(), config);

        Self {
            router,
            state,
            upload_dir,
            script_path,
            _root: root,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Place a slide in the upload directory and load it.
    pub async fn load_slide(&self, name: &str, bytes: &[u8]) -> serde_json::Value {
        write_slide(&self.upload_dir, name, bytes);
        let response = self.get(&format!("/load/{}", name)).await;
        assert_eq!(response.status(), 200);
        json_body(response).await
    }
}

// =============================================================================
// Request and Response Helpers
// =============================================================================

pub const BOUNDARY: &str = "wsi-workbench-test-boundary";

/// A `multipart/form-data` body with a single file field.
pub fn multipart_body(field: &str, filename: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
            field, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn upload_request(field: &str, filename: &str, data: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(field, filename, data)))
        .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
