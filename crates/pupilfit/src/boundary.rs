//! Pupil boundary extraction and ellipse fitting.
//!
//! Edge points are the midpoints of the cracks between foreground pixels
//! and their background 4-neighbours. On a digitized ellipse these sit on
//! the continuous boundary to within half a pixel, with no inward bias,
//! which is what keeps the recovered axes within a couple of percent.

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::conic::{fit_ellipse_ransac, EllipseFit, FitError, RansacConfig};

/// Per-frame outcome of the detect/segment/fit chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitQuality {
    /// Fit accepted with an inlier share at or above the confidence threshold.
    Good,
    /// Fit accepted, but fewer inliers than the confidence threshold.
    LowConfidence,
    /// A candidate existed but segmentation or fitting failed.
    Failed,
    /// The detector found no candidate (blink).
    NoPupil,
}

impl FitQuality {
    /// Grade an accepted fit.
    pub fn grade(fit: &EllipseFit, config: &RansacConfig) -> Self {
        if fit.inlier_percent() >= config.confident_inlier_percent {
            Self::Good
        } else {
            Self::LowConfidence
        }
    }

    /// Whether the frame carries a usable ellipse.
    pub fn has_ellipse(self) -> bool {
        matches!(self, Self::Good | Self::LowConfidence)
    }
}

impl std::fmt::Display for FitQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Good => "good",
            Self::LowConfidence => "low_confidence",
            Self::Failed => "failed",
            Self::NoPupil => "no_pupil",
        };
        f.write_str(s)
    }
}

/// Boundary points of the nonzero region of `mask`, as `[x, y]`.
///
/// Pixels are scanned row-major; each foreground pixel contributes one
/// point per background 4-neighbour, placed half a pixel towards that
/// neighbour. The image border is not a boundary: a pupil clipped by the
/// ROI contributes only its visible contour.
pub fn mask_boundary_points(mask: &GrayImage) -> Vec<[f64; 2]> {
    const DIRS: [(i64, i64); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
    let (w, h) = mask.dimensions();
    let (wi, hi) = (w as i64, h as i64);
    let inside = |x: i64, y: i64| x >= 0 && y >= 0 && x < wi && y < hi;
    let is_fg = |x: i64, y: i64| inside(x, y) && mask.get_pixel(x as u32, y as u32)[0] != 0;

    let mut points = Vec::new();
    for row in 0..hi {
        for col in 0..wi {
            if !is_fg(col, row) {
                continue;
            }
            for (dx, dy) in DIRS {
                let (nx, ny) = (col + dx, row + dy);
                if inside(nx, ny) && !is_fg(nx, ny) {
                    points.push([col as f64 + 0.5 * dx as f64, row as f64 + 0.5 * dy as f64]);
                }
            }
        }
    }
    points
}

/// Fit the pupil ellipse (ROI-local coordinates) to the boundary of `mask`.
///
/// `roi` is the image the mask was segmented from; it must have the same
/// dimensions.
pub fn fit_pupil_boundary(
    mask: &GrayImage,
    roi: &GrayImage,
    config: &RansacConfig,
) -> Result<EllipseFit, FitError> {
    debug_assert_eq!(mask.dimensions(), roi.dimensions());
    let points = mask_boundary_points(mask);
    tracing::trace!(n_points = points.len(), "boundary points");
    fit_ellipse_ransac(&points, config)
}
