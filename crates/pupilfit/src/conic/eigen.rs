//! Eigenvector selection for the reduced 3×3 ellipse-fit system.

use nalgebra::{Matrix3, Vector3};

/// Eigenvector of `system` (= C1⁻¹ M) that satisfies the ellipse constraint
/// 4·v0·v2 − v1² > 0.
///
/// `system` is not symmetric in general, so eigenvalues come from the
/// characteristic cubic and eigenvectors from the adjugate of `system − λI`.
pub(crate) fn ellipse_eigenvector(system: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let a = system;
    let tr = a.trace();
    let minor_sum = a[(0, 0)] * a[(1, 1)] - a[(0, 1)] * a[(1, 0)] + a[(0, 0)] * a[(2, 2)]
        - a[(0, 2)] * a[(2, 0)]
        + a[(1, 1)] * a[(2, 2)]
        - a[(1, 2)] * a[(2, 1)];
    let det = a.determinant();

    // λ³ − tr λ² + minor_sum λ − det = 0
    let mut best: Option<(f64, Vector3<f64>)> = None;
    for ev in solve_cubic_real(-tr, minor_sum, -det) {
        if !ev.is_finite() {
            continue;
        }
        let Some(v) = null_vector_3x3(&(system - Matrix3::identity() * ev)) else {
            continue;
        };
        let constraint = 4.0 * v[0] * v[2] - v[1] * v[1];
        if constraint <= 0.0 {
            continue;
        }
        if best.as_ref().map_or(true, |(b, _)| ev.abs() < *b) {
            best = Some((ev.abs(), v));
        }
    }
    best.map(|(_, v)| v)
}

/// Null vector of a rank-2 3×3 matrix: the adjugate row with the largest norm.
fn null_vector_3x3(m: &Matrix3<f64>) -> Option<Vector3<f64>> {
    let rows = [
        Vector3::new(
            m[(1, 1)] * m[(2, 2)] - m[(1, 2)] * m[(2, 1)],
            -(m[(1, 0)] * m[(2, 2)] - m[(1, 2)] * m[(2, 0)]),
            m[(1, 0)] * m[(2, 1)] - m[(1, 1)] * m[(2, 0)],
        ),
        Vector3::new(
            -(m[(0, 1)] * m[(2, 2)] - m[(0, 2)] * m[(2, 1)]),
            m[(0, 0)] * m[(2, 2)] - m[(0, 2)] * m[(2, 0)],
            -(m[(0, 0)] * m[(2, 1)] - m[(0, 1)] * m[(2, 0)]),
        ),
        Vector3::new(
            m[(0, 1)] * m[(1, 2)] - m[(0, 2)] * m[(1, 1)],
            -(m[(0, 0)] * m[(1, 2)] - m[(0, 2)] * m[(1, 0)]),
            m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)],
        ),
    ];

    let best = rows
        .iter()
        .max_by(|l, r| l.norm_squared().total_cmp(&r.norm_squared()))?;
    let norm_sq = best.norm_squared();
    if norm_sq < 1e-30 {
        return None;
    }
    Some(best / norm_sq.sqrt())
}

/// Real roots of the monic cubic x³ + b x² + c x + d = 0.
fn solve_cubic_real(b: f64, c: f64, d: f64) -> Vec<f64> {
    // Depressed cubic t³ + pt + q = 0 with x = t − b/3.
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let disc = -4.0 * p * p * p - 27.0 * q * q;
    let shift = -b / 3.0;

    if disc >= 0.0 {
        let r = (-p / 3.0).sqrt();
        let cos_arg = if r.abs() < 1e-15 {
            0.0
        } else {
            (-q / (2.0 * r * r * r)).clamp(-1.0, 1.0)
        };
        let theta = cos_arg.acos();
        let two_r = 2.0 * r;
        (0..3)
            .map(|k| {
                let phase = (theta + 2.0 * std::f64::consts::PI * k as f64) / 3.0;
                two_r * phase.cos() + shift
            })
            .collect()
    } else {
        let sqrt_disc = (q * q / 4.0 + p * p * p / 27.0).sqrt();
        let u = (-q / 2.0 + sqrt_disc).cbrt();
        let v = (-q / 2.0 - sqrt_disc).cbrt();
        vec![u + v + shift]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cubic_with_three_known_roots() {
        // (x − 1)(x − 2)(x − 3) = x³ − 6x² + 11x − 6
        let mut roots = solve_cubic_real(-6.0, 11.0, -6.0);
        roots.sort_by(f64::total_cmp);
        assert_eq!(roots.len(), 3);
        for (r, expected) in roots.iter().zip([1.0, 2.0, 3.0]) {
            assert!((r - expected).abs() < 1e-9, "root {} vs {}", r, expected);
        }
    }

    #[test]
    fn cubic_with_single_real_root() {
        // (x − 2)(x² + 1) = x³ − 2x² + x − 2
        let roots = solve_cubic_real(-2.0, 1.0, -2.0);
        assert_eq!(roots.len(), 1);
        assert!((roots[0] - 2.0).abs() < 1e-9);
    }
}
