//! Pupil segmentation: glint removal, contrast stretch, binarization,
//! speckle removal and dominant-component selection.

use image::{GrayImage, Luma};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::distance_transform::Norm;
use imageproc::morphology::open;
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::glint::{remove_glint, GlintConfig};
use crate::rescale::robust_rescale;

/// Binarization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentationMethod {
    /// Inverse Otsu threshold: dark pixels become foreground.
    #[default]
    Otsu,
    /// 1-D k-means on whitened intensities; the darkest cluster is the pupil.
    KMeans,
}

/// Segmentation parameters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    pub method: SegmentationMethod,
    /// Lower contrast-stretch percentile in [0, 100].
    pub percent_min: f64,
    /// Upper contrast-stretch percentile in [0, 100].
    pub percent_max: f64,
    /// Disk diameter (pixels) of the morphological opening.
    pub open_diameter: u8,
    /// Cluster count for [`SegmentationMethod::KMeans`].
    pub kmeans_clusters: usize,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            method: SegmentationMethod::Otsu,
            percent_min: 5.0,
            percent_max: 50.0,
            open_diameter: 5,
            kmeans_clusters: 4,
        }
    }
}

/// Segmentation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentError {
    /// The ROI has zero width or height.
    EmptyRoi,
    /// No foreground survived the opening.
    EmptyMask,
}

impl std::fmt::Display for SegmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyRoi => write!(f, "empty region of interest"),
            Self::EmptyMask => write!(f, "segmentation mask is empty after opening"),
        }
    }
}

impl std::error::Error for SegmentError {}

/// Single-component binary pupil mask (255 = pupil), same shape as the ROI.
#[derive(Debug, Clone)]
pub struct PupilMask {
    pub mask: GrayImage,
    /// Foreground pixel count.
    pub area_px: usize,
}

impl SegmentationMethod {
    /// Raw foreground mask (255 = pupil candidate) of a contrast-stretched ROI.
    pub fn binarize(self, roi: &GrayImage, clusters: usize) -> GrayImage {
        match self {
            Self::Otsu => {
                let level = otsu_level(roi);
                threshold(roi, level, ThresholdType::BinaryInverted)
            }
            Self::KMeans => kmeans_darkest_cluster(roi, clusters.max(1)),
        }
    }
}

/// Segment the pupil in a raw (unnormalized) ROI.
pub fn segment_pupil(
    roi: &GrayImage,
    config: &SegmentationConfig,
    glint: &GlintConfig,
) -> Result<PupilMask, SegmentError> {
    if roi.width() == 0 || roi.height() == 0 {
        return Err(SegmentError::EmptyRoi);
    }
    let cleaned = remove_glint(roi, glint);
    let stretched = robust_rescale(&cleaned, (config.percent_min, config.percent_max));
    let blobs = config
        .method
        .binarize(&stretched, config.kmeans_clusters);

    let radius = config.open_diameter / 2;
    let opened = if radius > 0 {
        open(&blobs, Norm::L2, radius)
    } else {
        blobs
    };
    select_largest_component(&opened)
}

/// Keep only the 4-connected foreground component with the largest area.
///
/// Ties go to the component encountered first in raster order.
pub fn select_largest_component(mask: &GrayImage) -> Result<PupilMask, SegmentError> {
    let labels = connected_components(mask, Connectivity::Four, Luma([0u8]));

    let mut areas: Vec<usize> = Vec::new();
    let mut order: Vec<u32> = Vec::new();
    for label in labels.as_raw().iter().copied().filter(|&l| l != 0) {
        let slot = label as usize;
        if slot >= areas.len() {
            areas.resize(slot + 1, 0);
        }
        if areas[slot] == 0 {
            order.push(label);
        }
        areas[slot] += 1;
    }

    let mut best: Option<(u32, usize)> = None;
    for &label in &order {
        let area = areas[label as usize];
        if best.map_or(true, |(_, a)| area > a) {
            best = Some((label, area));
        }
    }
    let Some((pupil_label, area_px)) = best else {
        return Err(SegmentError::EmptyMask);
    };

    let (w, h) = mask.dimensions();
    let out = GrayImage::from_fn(w, h, |x, y| {
        Luma([if labels.get_pixel(x, y)[0] == pupil_label {
            255
        } else {
            0
        }])
    });
    Ok(PupilMask { mask: out, area_px })
}

/// Indicator mask of the lowest-centroid cluster of 1-D k-means.
fn kmeans_darkest_cluster(img: &GrayImage, k: usize) -> GrayImage {
    let data = whiten(img.as_raw());
    let centroids = kmeans_1d(&data, k);
    let pupil = centroids
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut out = img.clone();
    for (v, &x) in out.iter_mut().zip(&data) {
        *v = if nearest_centroid(&centroids, x) == pupil {
            255
        } else {
            0
        };
    }
    out
}

/// Divide by the standard deviation (left as-is when the spread is zero).
fn whiten(raw: &[u8]) -> Vec<f64> {
    let n = raw.len().max(1) as f64;
    let mean = raw.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = raw.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    let sd = var.sqrt();
    let scale = if sd > 1e-12 { 1.0 / sd } else { 1.0 };
    raw.iter().map(|&v| v as f64 * scale).collect()
}

/// Lloyd's algorithm on scalars, seeded at evenly spaced quantiles.
fn kmeans_1d(data: &[f64], k: usize) -> Vec<f64> {
    const MAX_ITERS: usize = 100;
    if data.is_empty() {
        return vec![0.0; k];
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mut centroids: Vec<f64> = (0..k)
        .map(|i| {
            let q = (i as f64 + 0.5) / k as f64;
            sorted[((sorted.len() - 1) as f64 * q).round() as usize]
        })
        .collect();

    for _ in 0..MAX_ITERS {
        let mut sums = vec![0.0; k];
        let mut counts = vec![0usize; k];
        for &x in data {
            let c = nearest_centroid(&centroids, x);
            sums[c] += x;
            counts[c] += 1;
        }
        let mut moved = false;
        for c in 0..k {
            // Empty clusters keep their previous centroid.
            if counts[c] == 0 {
                continue;
            }
            let next = sums[c] / counts[c] as f64;
            if (next - centroids[c]).abs() > 1e-9 {
                moved = true;
            }
            centroids[c] = next;
        }
        if !moved {
            break;
        }
    }
    centroids
}

fn nearest_centroid(centroids: &[f64], x: f64) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, &c) in centroids.iter().enumerate() {
        let d = (x - c).abs();
        if d < best_d {
            best = i;
            best_d = d;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{draw_pupil_roi, fill_rect};

    fn area(mask: &GrayImage) -> usize {
        mask.as_raw().iter().filter(|&&v| v != 0).count()
    }

    #[test]
    fn largest_component_wins_regardless_of_label_order() {
        // Small blob first in raster order, large blob second.
        let mut small_first = GrayImage::new(60, 40);
        fill_rect(&mut small_first, 2, 2, 6, 6, 255);
        fill_rect(&mut small_first, 20, 10, 50, 35, 255);
        let sel = select_largest_component(&small_first).expect("non-empty");
        assert_eq!(sel.area_px, 30 * 25);
        assert_eq!(sel.mask.get_pixel(30, 20)[0], 255);
        assert_eq!(sel.mask.get_pixel(3, 3)[0], 0);

        // Large blob first, small blob second.
        let mut large_first = GrayImage::new(60, 40);
        fill_rect(&mut large_first, 0, 0, 30, 25, 255);
        fill_rect(&mut large_first, 45, 30, 50, 35, 255);
        let sel = select_largest_component(&large_first).expect("non-empty");
        assert_eq!(sel.area_px, 30 * 25);
        assert_eq!(sel.mask.get_pixel(47, 32)[0], 0);
    }

    #[test]
    fn equal_areas_pick_first_in_raster_order() {
        let mut mask = GrayImage::new(40, 20);
        fill_rect(&mut mask, 2, 2, 8, 8, 255);
        fill_rect(&mut mask, 20, 10, 26, 16, 255);
        let sel = select_largest_component(&mask).expect("non-empty");
        assert_eq!(sel.mask.get_pixel(4, 4)[0], 255);
        assert_eq!(sel.mask.get_pixel(22, 12)[0], 0);
    }

    #[test]
    fn empty_mask_is_an_error() {
        let mask = GrayImage::new(10, 10);
        assert_eq!(
            select_largest_component(&mask).unwrap_err(),
            SegmentError::EmptyMask
        );
    }

    #[test]
    fn both_methods_recover_a_dark_disk() {
        let roi = draw_pupil_roi(64, 64, [32.0, 30.0], 12.0);
        let disk_area = std::f64::consts::PI * 144.0;
        for method in [SegmentationMethod::Otsu, SegmentationMethod::KMeans] {
            let cfg = SegmentationConfig {
                method,
                ..SegmentationConfig::default()
            };
            let seg = segment_pupil(&roi, &cfg, &GlintConfig::default()).expect("segments");
            assert_eq!(seg.mask.dimensions(), roi.dimensions());
            assert_eq!(seg.area_px, area(&seg.mask));
            let rel = (seg.area_px as f64 - disk_area).abs() / disk_area;
            assert!(rel < 0.1, "{:?}: area {} vs {}", method, seg.area_px, disk_area);
            assert_eq!(seg.mask.get_pixel(32, 30)[0], 255);
        }
    }

    #[test]
    fn flat_iris_with_a_glint_still_segments() {
        let mut roi = GrayImage::from_fn(60, 60, |x, y| {
            let (dx, dy) = (x as f64 - 30.0, y as f64 - 30.0);
            Luma([if dx * dx + dy * dy <= 144.0 { 20 } else { 150 }])
        });
        fill_rect(&mut roi, 45, 10, 48, 13, 255);
        let seg = segment_pupil(&roi, &SegmentationConfig::default(), &GlintConfig::default())
            .expect("segments");
        let disk_area = std::f64::consts::PI * 144.0;
        let rel = (seg.area_px as f64 - disk_area).abs() / disk_area;
        assert!(rel < 0.1, "area {} vs {}", seg.area_px, disk_area);
        assert_eq!(seg.mask.get_pixel(30, 30)[0], 255);
        assert_eq!(seg.mask.get_pixel(46, 11)[0], 0);
    }

    #[test]
    fn speckle_is_opened_away() {
        let mut mask = GrayImage::new(30, 30);
        mask.put_pixel(5, 5, Luma([255]));
        fill_rect(&mut mask, 10, 10, 24, 24, 255);
        let opened = open(&mask, Norm::L2, 2);
        assert_eq!(opened.get_pixel(5, 5)[0], 0);
        assert_eq!(opened.get_pixel(17, 17)[0], 255);
    }

    #[test]
    fn kmeans_centroids_are_ordered_by_cluster_content() {
        let data = vec![1.0, 1.1, 0.9, 5.0, 5.2, 9.0, 9.1, 13.0];
        let c = kmeans_1d(&data, 4);
        let darkest = c.iter().copied().fold(f64::INFINITY, f64::min);
        assert!((darkest - 1.0).abs() < 1e-9, "centroids {:?}", c);
    }
}
