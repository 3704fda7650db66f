//! Segmentation results stored next to their slide.
//!
//! A slide `CMU-1.svs` has its results in `CMU-1.svs.seg.json`:
//!
//! ```json
//! {"SegmentationNode": {"centroids": [[x, y], ...], "contours": [[[x, y], ...], ...]}}
//! ```
//!
//! Coordinates are level-0 pixels.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::OverlayError;
use crate::upload::secure_filename;

/// Default cap on contours returned per query.
pub const DEFAULT_CONTOUR_LIMIT: usize = 10_000;

/// Suffix of the segmentation file stored next to each slide.
pub const SEGMENTATION_SUFFIX: &str = ".seg.json";

pub type Point = [f64; 2];

/// Kind of overlay a query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayType {
    Centroid,
    Contour,
}

impl FromStr for OverlayType {
    type Err = OverlayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "centroid" => Ok(Self::Centroid),
            "contour" => Ok(Self::Contour),
            other => Err(OverlayError::InvalidType(other.to_string())),
        }
    }
}

/// Nuclei found on one slide.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentationSet {
    #[serde(default)]
    pub centroids: Vec<Point>,

    #[serde(default)]
    pub contours: Vec<Vec<Point>>,
}

#[derive(Serialize, Deserialize)]
struct SegmentationFile {
    #[serde(rename = "SegmentationNode")]
    node: SegmentationSet,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OverlayData {
    Centroids(Vec<Point>),
    Contours(Vec<Vec<Point>>),
}

impl OverlayData {
    pub fn len(&self) -> usize {
        match self {
            Self::Centroids(c) => c.len(),
            Self::Contours(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Query answer, serialised as `{"type": ..., "data": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    #[serde(rename = "type")]
    pub kind: OverlayType,
    pub data: OverlayData,
}

/// Segmentation files under the upload directory.
#[derive(Debug, Clone)]
pub struct SegmentationStore {
    dir: PathBuf,
    contour_limit: usize,
}

impl SegmentationStore {
    pub fn new(dir: impl Into<PathBuf>, contour_limit: usize) -> Self {
        Self {
            dir: dir.into(),
            contour_limit,
        }
    }

    pub fn contour_limit(&self) -> usize {
        self.contour_limit
    }

    /// Where results for `slide` live.
    pub fn path_for(&self, slide: &str) -> Result<PathBuf, OverlayError> {
        let name = secure_filename(slide);
        if name.is_empty() {
            return Err(OverlayError::NoSlide);
        }
        Ok(self.dir.join(format!("{}{}", name, SEGMENTATION_SUFFIX)))
    }

    /// Overlay of `kind` for `slide`.
    ///
    /// Centroids are returned in full; contours are capped at the
    /// configured limit, first entries first.
    ///
    /// # Errors
    ///
    /// - [`OverlayError::NotFound`] when the slide has no segmentation file
    /// - [`OverlayError::Read`] when the file cannot be read or parsed
    pub async fn query(&self, slide: &str, kind: OverlayType) -> Result<Overlay, OverlayError> {
        let path = self.path_for(slide)?;
        let set = read_set(&path).await?;

        let data = match kind {
            OverlayType::Centroid => OverlayData::Centroids(set.centroids),
            OverlayType::Contour => {
                let mut contours = set.contours;
                contours.truncate(self.contour_limit);
                OverlayData::Contours(contours)
            }
        };

        debug!(slide = %slide, kind = ?kind, count = data.len(), "Segmentation query");
        Ok(Overlay { kind, data })
    }

    /// Store results for `slide`, replacing earlier ones.
    pub async fn write(&self, slide: &str, set: &SegmentationSet) -> Result<PathBuf, OverlayError> {
        let path = self.path_for(slide)?;
        let file = SegmentationFile { node: set.clone() };
        let json = serde_json::to_vec(&file).map_err(|e| OverlayError::Read(e.to_string()))?;

        let tmp_path = crate::io::temp_sibling(&path);
        let io_err = |e: std::io::Error| OverlayError::Read(format!("{}: {}", path.display(), e));
        tokio::fs::write(&tmp_path, &json).await.map_err(io_err)?;
        tokio::fs::rename(&tmp_path, &path).await.map_err(io_err)?;

        info!(
            slide = %slide,
            centroids = set.centroids.len(),
            contours = set.contours.len(),
            "Segmentation stored"
        );
        Ok(path)
    }
}

async fn read_set(path: &Path) -> Result<SegmentationSet, OverlayError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(OverlayError::NotFound(path.display().to_string()));
        }
        Err(e) => return Err(OverlayError::Read(format!("{}: {}", path.display(), e))),
    };

    let parsed = tokio::task::spawn_blocking(move || {
        serde_json::from_slice::<SegmentationFile>(&bytes).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| OverlayError::Read(e.to_string()))?;

    parsed
        .map(|file| file.node)
        .map_err(|e| OverlayError::Read(format!("{}: {}", path.display(), e)))
}
