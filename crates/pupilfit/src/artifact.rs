//! Per-frame artifact power and pseudo-glint estimation.

use image::GrayImage;
use imageproc::gradients::horizontal_sobel;

/// Artifact measurements for one frame.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ArtifactEstimate {
    /// Scalar motion/interference severity.
    pub power: f64,
    /// Stable landmark position `[x, y]` in frame pixels.
    pub glint: [f64; 2],
}

/// Capability that measures artifact power and a pseudo-glint.
pub trait ArtifactEstimator: Send + Sync {
    fn estimate(&self, frame: &GrayImage) -> ArtifactEstimate;
}

/// Vertical-edge based estimator.
///
/// Interference from the scanner shows up as horizontal intensity
/// modulation, so `power` is the mean squared horizontal Sobel response.
/// The pseudo-glint is the centroid of vertical edges weighted by their
/// absolute response, which stays put while the pupil moves.
#[derive(Debug, Clone, Copy, Default)]
pub struct EdgeArtifactEstimator;

impl ArtifactEstimator for EdgeArtifactEstimator {
    fn estimate(&self, frame: &GrayImage) -> ArtifactEstimate {
        let (w, h) = frame.dimensions();
        let center = [w as f64 / 2.0, h as f64 / 2.0];
        if w == 0 || h == 0 {
            return ArtifactEstimate {
                power: 0.0,
                glint: center,
            };
        }

        let gx = horizontal_sobel(frame);
        let mut energy = 0.0;
        let mut wsum = 0.0;
        let mut sx = 0.0;
        let mut sy = 0.0;
        for (x, y, px) in gx.enumerate_pixels() {
            let g = px[0] as f64;
            energy += g * g;
            let wgt = g.abs();
            wsum += wgt;
            sx += wgt * x as f64;
            sy += wgt * y as f64;
        }

        let glint = if wsum > 0.0 {
            [sx / wsum, sy / wsum]
        } else {
            center
        };
        ArtifactEstimate {
            power: energy / (w as f64 * h as f64),
            glint,
        }
    }
}
