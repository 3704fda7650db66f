//! Segmentation overlays.
//!
//! Nuclei centroids and contours are stored per slide by
//! [`SegmentationStore`] and served to the viewer as overlays.

mod store;

pub use store::{
    Overlay, OverlayData, OverlayType, Point, SegmentationSet, SegmentationStore,
    DEFAULT_CONTOUR_LIMIT, SEGMENTATION_SUFFIX,
};
