//! Core conic and ellipse types with conversions.

use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

// ── Error type ─────────────────────────────────────────────────────────────

/// Errors that can occur while fitting an ellipse to boundary points.
#[derive(Debug, Clone, PartialEq)]
pub enum FitError {
    /// Too few boundary points for a minimal sample.
    TooFewPoints {
        /// Required minimum number of points.
        needed: usize,
        /// Provided number of points.
        got: usize,
    },
    /// No candidate produced a finite ellipse with non-zero area.
    Degenerate,
    /// The best model explains too small a share of the points.
    InsufficientInliers {
        /// Required minimum number of inliers.
        needed: usize,
        /// Number of inliers of the best model.
        found: usize,
    },
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPoints { needed, got } => {
                write!(f, "too few boundary points: need {}, got {}", needed, got)
            }
            Self::Degenerate => write!(f, "degenerate ellipse fit"),
            Self::InsufficientInliers { needed, found } => {
                write!(f, "insufficient inliers: need {}, found {}", needed, found)
            }
        }
    }
}

impl std::error::Error for FitError {}

// ── Types ──────────────────────────────────────────────────────────────────

/// General conic: A x² + B xy + C y² + D x + E y + F = 0
/// Stored as [A, B, C, D, E, F].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConicCoeffs(pub [f64; 6]);

/// Geometric ellipse parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Center x.
    pub cx: f64,
    /// Center y.
    pub cy: f64,
    /// Semi-major axis length.
    pub a: f64,
    /// Semi-minor axis length.
    pub b: f64,
    /// Rotation angle of the major axis from +x, in radians (−π/2, π/2].
    pub angle: f64,
}

/// RANSAC search and inlier-refinement parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    /// Hard ceiling on minimal-sample iterations.
    pub max_iterations: usize,
    /// Maximum number of inlier-set refits of the best candidate.
    pub max_refinements: usize,
    /// Stop searching/refining once the inlier percentage exceeds this.
    pub max_inlier_percent: f64,
    /// Fits whose final inlier percentage is below this are rejected.
    pub min_inlier_percent: f64,
    /// Fits below this inlier percentage are accepted but flagged low-confidence.
    pub confident_inlier_percent: f64,
    /// Inlier threshold on the Sampson distance, in pixels.
    pub inlier_threshold_px: f64,
    /// RNG seed for reproducibility.
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            max_refinements: 3,
            max_inlier_percent: 95.0,
            min_inlier_percent: 20.0,
            confident_inlier_percent: 60.0,
            inlier_threshold_px: 1.0,
            seed: 42,
        }
    }
}

/// Result of a RANSAC fit.
#[derive(Debug, Clone)]
pub struct EllipseFit {
    /// Final geometric ellipse fitted on the inlier set.
    pub ellipse: Ellipse,
    /// Number of inliers under the configured Sampson threshold.
    pub num_inliers: usize,
    /// Number of points offered to the fitter.
    pub num_points: usize,
    /// Number of inlier-set refits actually applied.
    pub refinements: usize,
}

impl EllipseFit {
    /// Inlier percentage in [0, 100].
    pub fn inlier_percent(&self) -> f64 {
        if self.num_points == 0 {
            return 0.0;
        }
        self.num_inliers as f64 * 100.0 / self.num_points as f64
    }
}

// ── Conic ↔ ellipse ────────────────────────────────────────────────────────

impl ConicCoeffs {
    /// Conic value Q(x, y) and its gradient.
    fn eval_with_gradient(&self, x: f64, y: f64) -> (f64, f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        let q = a * x * x + b * x * y + c * y * y + d * x + e * y + f;
        (q, 2.0 * a * x + b * y + d, b * x + 2.0 * c * y + e)
    }

    /// Sampson distance |Q| / |∇Q|, close to the Euclidean distance in
    /// pixels for points near the curve.
    pub fn sampson_distance(&self, x: f64, y: f64) -> f64 {
        let (q, gx, gy) = self.eval_with_gradient(x, y);
        let grad = gx.hypot(gy);
        if grad < 1e-15 {
            q.abs()
        } else {
            q.abs() / grad
        }
    }

    /// B² − 4AC < 0.
    pub fn is_ellipse(&self) -> bool {
        let [a, b, c, ..] = self.0;
        b * b < 4.0 * a * c
    }

    /// Geometric parameters; `None` for non-ellipses and for imaginary or
    /// point ellipses.
    pub fn to_ellipse(self) -> Option<Ellipse> {
        if !self.is_ellipse() {
            return None;
        }
        let [a, b, c, d, e, f] = self.0;
        let quad = Matrix2::new(a, 0.5 * b, 0.5 * b, c);
        let center = quad.try_inverse()? * Vector2::new(-0.5 * d, -0.5 * e);
        // Shifted to the center the conic reads uᵀ·quad·u = −k.
        let k = 0.5 * (d * center.x + e * center.y) + f;

        let eig = quad.symmetric_eigen();
        let r0 = -k / eig.eigenvalues[0];
        let r1 = -k / eig.eigenvalues[1];
        if !(r0 > 0.0 && r1 > 0.0 && r0.is_finite() && r1.is_finite()) {
            return None;
        }
        // The major axis follows the smaller eigenvalue.
        let (major_sq, minor_sq, axis) = if r0 >= r1 {
            (r0, r1, eig.eigenvectors.column(0))
        } else {
            (r1, r0, eig.eigenvectors.column(1))
        };
        Some(Ellipse {
            cx: center.x,
            cy: center.y,
            a: major_sq.sqrt(),
            b: minor_sq.sqrt(),
            angle: wrap_half_turn(axis[1].atan2(axis[0])),
        })
    }
}

impl Ellipse {
    /// Positive, finite semi-axes and finite pose.
    pub fn is_valid(&self) -> bool {
        [self.cx, self.cy, self.a, self.b, self.angle]
            .iter()
            .all(|v| v.is_finite())
            && self.a > 0.0
            && self.b > 0.0
    }

    /// Enclosed area π·a·b.
    pub fn area(&self) -> f64 {
        std::f64::consts::PI * self.a * self.b
    }

    /// Rotation of the major axis in degrees.
    pub fn rotation_deg(&self) -> f64 {
        self.angle.to_degrees()
    }

    /// Same ellipse with the center shifted by `(dx, dy)`.
    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        Self {
            cx: self.cx + dx,
            cy: self.cy + dy,
            ..*self
        }
    }

    /// Implicit form scaled so that Q = −1 at the center.
    pub fn to_conic(self) -> ConicCoeffs {
        let (s, c) = self.angle.sin_cos();
        let (ia, ib) = (self.a.powi(-2), self.b.powi(-2));
        let m11 = c * c * ia + s * s * ib;
        let m12 = c * s * (ia - ib);
        let m22 = s * s * ia + c * c * ib;
        let (x0, y0) = (self.cx, self.cy);
        ConicCoeffs([
            m11,
            2.0 * m12,
            m22,
            -2.0 * (m11 * x0 + m12 * y0),
            -2.0 * (m12 * x0 + m22 * y0),
            m11 * x0 * x0 + 2.0 * m12 * x0 * y0 + m22 * y0 * y0 - 1.0,
        ])
    }

    /// Boundary point at parameter `t` (radians).
    pub fn point_at(&self, t: f64) -> [f64; 2] {
        let (s, c) = self.angle.sin_cos();
        let (u, v) = (self.a * t.cos(), self.b * t.sin());
        [self.cx + c * u - s * v, self.cy + s * u + c * v]
    }

    /// `n` boundary points evenly spaced in the parameter.
    pub fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let step = std::f64::consts::TAU / n as f64;
        (0..n).map(|i| self.point_at(i as f64 * step)).collect()
    }

    /// Whether `(x, y)` lies inside or on the ellipse.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (s, c) = self.angle.sin_cos();
        let (dx, dy) = (x - self.cx, y - self.cy);
        let u = (c * dx + s * dy) / self.a;
        let v = (c * dy - s * dx) / self.b;
        u * u + v * v <= 1.0
    }
}

/// Wrap an axis direction into (−π/2, π/2].
fn wrap_half_turn(angle: f64) -> f64 {
    use std::f64::consts::{FRAC_PI_2, PI};
    let wrapped = (angle + FRAC_PI_2).rem_euclid(PI) - FRAC_PI_2;
    if wrapped <= -FRAC_PI_2 {
        wrapped + PI
    } else {
        wrapped
    }
}
