//! Classical nuclei detection on one pyramid level.
//!
//! Hematoxylin-stained nuclei are the darkest structures on an H&E slide, so
//! a global Otsu threshold on the smoothed grayscale image separates them
//! from stroma and background:
//!
//! 1. grayscale, Gaussian blur
//! 2. Otsu threshold, dark pixels are foreground
//! 3. 8-connected components, filtered by area
//! 4. centroid per component, outer border per component (Suzuki-Abe)

use image::{imageops, GrayImage, Luma, RgbImage};
use imageproc::contours::{find_contours, BorderType, Contour};
use imageproc::contrast::otsu_level;
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::Deserialize;

use crate::overlay::{Point, SegmentationSet};

/// Tunables for a detection run, all optional in the request body.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
    /// Native level to analyse; the coarsest when absent
    pub level: Option<usize>,

    /// Gaussian sigma applied before thresholding; 0 disables smoothing
    pub blur_sigma: f32,

    /// Component area bounds, in pixels of the analysed level
    pub min_area: u32,
    pub max_area: u32,
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            level: None,
            blur_sigma: 1.0,
            min_area: 4,
            max_area: 5_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Component {
    area: u64,
    sum_x: u64,
    sum_y: u64,
}

/// Detect nuclei in `img`. Coordinates are pixels of `img`.
///
/// `progress` receives values in `0..=100` as stages complete.
pub fn detect_nuclei(
    img: &RgbImage,
    params: &DetectionParams,
    progress: &dyn Fn(u8),
) -> SegmentationSet {
    let gray = imageops::grayscale(img);
    let smoothed = if params.blur_sigma > 0.0 {
        imageproc::filter::gaussian_blur_f32(&gray, params.blur_sigma)
    } else {
        gray
    };
    progress(20);

    let level = otsu_level(&smoothed);
    let foreground = GrayImage::from_fn(smoothed.width(), smoothed.height(), |x, y| {
        if smoothed.get_pixel(x, y)[0] <= level {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    progress(40);

    let labels = connected_components(&foreground, Connectivity::Eight, Luma([0u8]));
    let mut components: Vec<Component> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let label = label[0] as usize;
        if label == 0 {
            continue;
        }
        if components.len() <= label {
            components.resize(label + 1, Component::default());
        }
        let c = &mut components[label];
        c.area += 1;
        c.sum_x += x as u64;
        c.sum_y += y as u64;
    }
    progress(60);

    let min_area = params.min_area as u64;
    let max_area = params.max_area as u64;
    let keep: Vec<bool> = components
        .iter()
        .map(|c| c.area > 0 && c.area >= min_area && c.area <= max_area)
        .collect();

    let centroids: Vec<Point> = components
        .iter()
        .zip(&keep)
        .filter(|(_, kept)| **kept)
        .map(|(c, _)| {
            [
                c.sum_x as f64 / c.area as f64,
                c.sum_y as f64 / c.area as f64,
            ]
        })
        .collect();

    let kept_mask = GrayImage::from_fn(labels.width(), labels.height(), |x, y| {
        let label = labels.get_pixel(x, y)[0] as usize;
        if label != 0 && keep[label] {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    progress(80);

    let contours: Vec<Vec<Point>> = find_contours::<u32>(&kept_mask)
        .into_iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .map(contour_points)
        .collect();
    progress(100);

    SegmentationSet {
        centroids,
        contours,
    }
}

fn contour_points(contour: Contour<u32>) -> Vec<Point> {
    contour
        .points
        .into_iter()
        .map(|p| [f64::from(p.x), f64::from(p.y)])
        .collect()
}

/// Scale every coordinate by `(sx, sy)`, e.g. to level-0 pixels.
pub fn scale_set(set: &mut SegmentationSet, sx: f64, sy: f64) {
    for c in &mut set.centroids {
        c[0] *= sx;
        c[1] *= sy;
    }
    for contour in &mut set.contours {
        for p in contour {
            p[0] *= sx;
            p[1] *= sy;
        }
    }
}
