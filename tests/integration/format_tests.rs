//! Format-specific integration tests.
//!
//! Tests verify:
//! - Little-endian and big-endian pyramids open with every level
//! - Aperio slides are recognised from their ImageDescription
//! - Non-pyramid IFDs are skipped
//! - Unsupported compression and malformed files are rejected
//! - Region reads stitch tiles and pad past the level edge

use wsi_workbench::error::{SlideError, TiffError};
use wsi_workbench::format::SlideFormat;
use wsi_workbench::slide::{open_local_slide, Slide};

use super::test_utils::{
    close_to, spotty_slide, write_slide, Endian, PyramidTiffBuilder, BACKGROUND, TEST_LEVELS,
};

const SPOT: [u8; 3] = [40, 20, 60];
const FIELD: [u8; 3] = [235, 225, 230];

async fn open_bytes(bytes: &[u8]) -> Result<std::sync::Arc<dyn Slide>, SlideError> {
    let dir = tempfile::tempdir().unwrap();
    let path = write_slide(dir.path(), "slide.tif", bytes);
    open_local_slide(&path).await
}

fn uniform_builder() -> PyramidTiffBuilder {
    PyramidTiffBuilder::new(256)
        .with_levels(&TEST_LEVELS)
        .with_pixels(|_, _, _| BACKGROUND)
}

// =============================================================================
// Byte Order
// =============================================================================

#[tokio::test]
async fn test_little_endian_pyramid() {
    let data = uniform_builder().build();
    assert_eq!(&data[..2], b"II");

    let slide = open_bytes(&data).await.unwrap();
    assert_eq!(slide.format(), SlideFormat::GenericTiff);
    assert_eq!(slide.level_dimensions(), &TEST_LEVELS[..]);
    assert_eq!(slide.dimensions(), Some((2048, 1536)));
}

#[tokio::test]
async fn test_big_endian_pyramid() {
    let data = uniform_builder().with_endian(Endian::Big).build();
    assert_eq!(&data[..2], b"MM");

    let slide = open_bytes(&data).await.unwrap();
    assert_eq!(slide.level_count(), 3);

    let region = slide.read_region(1, (0, 0), (64, 64)).await.unwrap();
    assert!(close_to(region.get_pixel(32, 32), BACKGROUND, 8));
}

// =============================================================================
// Format Detection
// =============================================================================

#[tokio::test]
async fn test_aperio_description_detected() {
    let data = uniform_builder()
        .with_description("Aperio Image Library v12.0.5\r\n2048x1536 [0,0 2048x1536] (256x256) JPEG/RGB Q=95|AppMag = 20|MPP = 0.499")
        .build();

    let slide = open_bytes(&data).await.unwrap();
    assert_eq!(slide.format(), SlideFormat::AperioSvs);
}

#[tokio::test]
async fn test_other_description_is_generic() {
    let data = uniform_builder().with_description("scanner export").build();

    let slide = open_bytes(&data).await.unwrap();
    assert_eq!(slide.format(), SlideFormat::GenericTiff);
}

#[tokio::test]
async fn test_stripped_ifd_is_not_a_level() {
    let data = uniform_builder().with_strip_image(300, 200).build();

    let slide = open_bytes(&data).await.unwrap();
    assert_eq!(slide.level_count(), 3);
    assert_eq!(slide.level_dimensions(), &TEST_LEVELS[..]);
}

// =============================================================================
// Rejected Files
// =============================================================================

#[tokio::test]
async fn test_lzw_pyramid_rejected() {
    let data = uniform_builder().with_compression(5).build();

    let err = open_bytes(&data).await.err().unwrap();
    assert!(
        matches!(err, SlideError::Tiff(TiffError::UnsupportedCompression(ref name)) if name == "LZW"),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_not_a_tiff_rejected() {
    assert!(open_bytes(b"%PDF-1.7 definitely not a slide").await.is_err());
}

#[tokio::test]
async fn test_truncated_file_rejected() {
    let data = uniform_builder().build();
    let truncated = &data[..64];

    assert!(open_bytes(truncated).await.is_err());
}

#[tokio::test]
async fn test_only_stripped_image_has_no_levels() {
    let data = PyramidTiffBuilder::new(256).with_strip_image(64, 64).build();

    let err = open_bytes(&data).await.err().unwrap();
    assert!(matches!(err, SlideError::Tiff(TiffError::NoPyramidLevels)));
}

// =============================================================================
// Region Reads
// =============================================================================

#[tokio::test]
async fn test_region_reads_spots_at_every_level() {
    let slide = open_bytes(&spotty_slide()).await.unwrap();

    // The first spot covers 32..40 on the coarsest level.
    for level in 0..3 {
        let scale = 1u64 << (2 - level);
        let region = slide
            .read_region(level, (128, 128), (8 * scale as u32, 8 * scale as u32))
            .await
            .unwrap();
        let mid = 4 * scale as u32;
        assert!(
            close_to(region.get_pixel(mid, mid), SPOT, 24),
            "level {level}: {:?}",
            region.get_pixel(mid, mid)
        );
    }
}

#[tokio::test]
async fn test_region_spanning_tiles() {
    let slide = open_bytes(&spotty_slide()).await.unwrap();

    // Level 1 tiles are 256 wide; this region straddles the first seam.
    let region = slide.read_region(1, (400, 0), (200, 20)).await.unwrap();
    assert_eq!(region.dimensions(), (200, 20));
    assert!(close_to(region.get_pixel(10, 10), FIELD, 16));
    assert!(close_to(region.get_pixel(150, 10), FIELD, 16));
}

#[tokio::test]
async fn test_region_past_edge_is_black() {
    let slide = open_bytes(&spotty_slide()).await.unwrap();

    // Coarsest level is 512 wide; columns from 512 on lie outside.
    let region = slide.read_region(2, (4 * 500, 0), (32, 8)).await.unwrap();
    assert!(close_to(region.get_pixel(2, 4), FIELD, 16));
    assert_eq!(region.get_pixel(20, 4).0, [0, 0, 0]);
}

#[tokio::test]
async fn test_region_origin_outside_level() {
    let slide = open_bytes(&spotty_slide()).await.unwrap();

    let err = slide.read_region(0, (4096, 0), (16, 16)).await.unwrap_err();
    assert!(matches!(err, SlideError::RegionOutOfBounds { level: 0, .. }));
}
