//! RANSAC ellipse search with iterative inlier refinement.

use rand::prelude::*;

use super::fit::{fit_ellipse_direct, MIN_FIT_POINTS};
use super::types::{Ellipse, EllipseFit, FitError, RansacConfig};

/// Fit an ellipse robustly using RANSAC.
///
/// Samples minimal 6-point subsets, fits each via direct least squares and
/// keeps the candidate with the most inliers (Sampson distance below
/// `inlier_threshold_px`). The winner is then refit on its own inlier set up
/// to `max_refinements` times, stopping once its inlier percentage exceeds
/// `max_inlier_percent`.
///
/// Failure modes are reported distinctly: too few points, no finite
/// candidate at all, or a best model below `min_inlier_percent`.
pub fn fit_ellipse_ransac(
    points: &[[f64; 2]],
    config: &RansacConfig,
) -> Result<EllipseFit, FitError> {
    let n = points.len();
    if n < MIN_FIT_POINTS {
        return Err(FitError::TooFewPoints {
            needed: MIN_FIT_POINTS,
            got: n,
        });
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(Ellipse, Vec<bool>, usize)> = None;

    for _ in 0..config.max_iterations.max(1) {
        let sample: Vec<[f64; 2]> = sample_indices(&mut rng, n, MIN_FIT_POINTS)
            .into_iter()
            .map(|i| points[i])
            .collect();
        let Some(candidate) = fit_ellipse_direct(&sample).filter(is_usable) else {
            continue;
        };

        let (mask, count) = classify_inliers(&candidate, points, config.inlier_threshold_px);
        if best.as_ref().map_or(true, |(_, _, c)| count > *c) {
            best = Some((candidate, mask, count));
            if exceeds_percent(count, n, config.max_inlier_percent) {
                break;
            }
        }
    }

    let Some((mut ellipse, mut mask, mut count)) = best else {
        return Err(FitError::Degenerate);
    };

    let mut refinements = 0;
    for _ in 0..config.max_refinements {
        let inlier_pts: Vec<[f64; 2]> = mask
            .iter()
            .zip(points)
            .filter(|(&m, _)| m)
            .map(|(_, &p)| p)
            .collect();
        if inlier_pts.len() < MIN_FIT_POINTS {
            break;
        }
        let Some(refit) = fit_ellipse_direct(&inlier_pts).filter(is_usable) else {
            break;
        };
        let (refit_mask, refit_count) =
            classify_inliers(&refit, points, config.inlier_threshold_px);
        if refit_count < count {
            break;
        }
        ellipse = refit;
        mask = refit_mask;
        count = refit_count;
        refinements += 1;
        if exceeds_percent(count, n, config.max_inlier_percent) {
            break;
        }
    }

    let needed = ((config.min_inlier_percent / 100.0) * n as f64).ceil() as usize;
    let needed = needed.max(MIN_FIT_POINTS);
    if count < needed {
        return Err(FitError::InsufficientInliers {
            needed,
            found: count,
        });
    }

    tracing::trace!(
        n_points = n,
        n_inliers = count,
        refinements,
        "ransac ellipse fit"
    );

    Ok(EllipseFit {
        ellipse,
        num_inliers: count,
        num_points: n,
        refinements,
    })
}

/// Inlier mask and count under the Sampson-distance threshold.
fn classify_inliers(ellipse: &Ellipse, points: &[[f64; 2]], threshold: f64) -> (Vec<bool>, usize) {
    let conic = ellipse.to_conic();
    let mask: Vec<bool> = points
        .iter()
        .map(|&[x, y]| conic.sampson_distance(x, y) < threshold)
        .collect();
    let count = mask.iter().filter(|&&m| m).count();
    (mask, count)
}

/// Reject candidates that are finite but collapsed to (nearly) zero area.
fn is_usable(e: &Ellipse) -> bool {
    e.is_valid() && e.b > 1e-3 && e.area() > 1e-2
}

fn exceeds_percent(count: usize, n: usize, percent: f64) -> bool {
    count as f64 * 100.0 > percent * n as f64
}

/// Sample `k` distinct indices from `0..n` using a partial Fisher–Yates shuffle.
fn sample_indices(rng: &mut impl Rng, n: usize, k: usize) -> Vec<usize> {
    debug_assert!(k <= n);
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(k);
    indices
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn make_test_ellipse() -> Ellipse {
        Ellipse {
            cx: 100.0,
            cy: 80.0,
            a: 30.0,
            b: 15.0,
            angle: 0.3,
        }
    }

    fn config(max_iterations: usize, threshold: f64) -> RansacConfig {
        RansacConfig {
            max_iterations,
            inlier_threshold_px: threshold,
            ..RansacConfig::default()
        }
    }

    #[test]
    fn clean_points_are_all_inliers() {
        let e = make_test_ellipse();
        let pts = e.sample_points(100);

        let fit = fit_ellipse_ransac(&pts, &config(100, 0.1)).expect("RANSAC should succeed");
        assert_eq!(fit.num_inliers, 100);
        assert_eq!(fit.num_points, 100);
        assert_relative_eq!(fit.ellipse.cx, e.cx, epsilon = 1e-4);
        assert_relative_eq!(fit.ellipse.cy, e.cy, epsilon = 1e-4);
        assert_relative_eq!(fit.inlier_percent(), 100.0);
    }

    #[test]
    fn twenty_percent_outliers_do_not_move_the_fit() {
        let e = make_test_ellipse();
        let mut pts = e.sample_points(80);
        let mut rng = StdRng::seed_from_u64(999);
        for _ in 0..20 {
            pts.push([rng.gen_range(0.0..200.0), rng.gen_range(0.0..200.0)]);
        }

        let fit = fit_ellipse_ransac(&pts, &config(500, 0.1)).expect("RANSAC with outliers");
        assert_relative_eq!(fit.ellipse.cx, e.cx, epsilon = 0.5);
        assert_relative_eq!(fit.ellipse.cy, e.cy, epsilon = 0.5);
        assert_relative_eq!(fit.ellipse.a, e.a, epsilon = 0.5);
        assert_relative_eq!(fit.ellipse.b, e.b, epsilon = 0.5);
        assert!(fit.num_inliers >= 80, "got {} inliers", fit.num_inliers);
    }

    #[test]
    fn noisy_arc_with_outliers() {
        let e = make_test_ellipse();
        let mut pts: Vec<[f64; 2]> = e
            .sample_points(400)
            .into_iter()
            .filter(|&[_, y]| y > e.cy)
            .collect();
        let mut rng = StdRng::seed_from_u64(333);
        for p in pts.iter_mut() {
            p[0] += (rng.gen::<f64>() - 0.5) * 0.4;
            p[1] += (rng.gen::<f64>() - 0.5) * 0.4;
        }
        for _ in 0..20 {
            pts.push([rng.gen_range(0.0..200.0), rng.gen_range(0.0..200.0)]);
        }

        let fit = fit_ellipse_ransac(&pts, &config(1000, 1.0)).expect("partial arc fit");
        assert_relative_eq!(fit.ellipse.cx, e.cx, epsilon = 5.0);
        assert_relative_eq!(fit.ellipse.cy, e.cy, epsilon = 5.0);
    }

    #[test]
    fn refinement_stops_once_inlier_ceiling_is_exceeded() {
        let e = make_test_ellipse();
        let pts = e.sample_points(200);
        let fit = fit_ellipse_ransac(&pts, &config(10_000, 0.5)).expect("should succeed");
        assert_eq!(fit.num_inliers, 200);
        assert!(fit.refinements <= 1, "refinements = {}", fit.refinements);
    }

    #[test]
    fn no_refinement_when_disabled() {
        let e = make_test_ellipse();
        let pts = e.sample_points(60);
        let cfg = RansacConfig {
            max_refinements: 0,
            ..config(50, 0.5)
        };
        let fit = fit_ellipse_ransac(&pts, &cfg).expect("should succeed");
        assert_eq!(fit.refinements, 0);
    }

    #[test]
    fn too_few_points_is_reported() {
        let pts = vec![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        assert_eq!(
            fit_ellipse_ransac(&pts, &RansacConfig::default()).unwrap_err(),
            FitError::TooFewPoints { needed: 6, got: 3 }
        );
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let pts: Vec<[f64; 2]> = (0..20).map(|i| [i as f64, 2.0 * i as f64]).collect();
        let err = fit_ellipse_ransac(&pts, &RansacConfig::default()).unwrap_err();
        assert!(
            matches!(
                err,
                FitError::Degenerate | FitError::InsufficientInliers { .. }
            ),
            "unexpected error {:?}",
            err
        );
    }

    #[test]
    fn scattered_cloud_fails_the_inlier_floor() {
        let e = make_test_ellipse();
        let mut pts = e.sample_points(10);
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..90 {
            pts.push([rng.gen_range(0.0..400.0), rng.gen_range(0.0..400.0)]);
        }
        let cfg = RansacConfig {
            min_inlier_percent: 50.0,
            ..config(200, 0.1)
        };
        match fit_ellipse_ransac(&pts, &cfg) {
            Err(FitError::InsufficientInliers { needed, found }) => {
                assert_eq!(needed, 50);
                assert!(found < 50);
            }
            other => panic!("expected InsufficientInliers, got {:?}", other),
        }
    }
}
