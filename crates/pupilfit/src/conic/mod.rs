//! Ellipse / conic fitting primitives.
//!
//! Implements:
//! - Direct least-squares conic fit (Fitzgibbon et al., "Direct Least Square Fitting of Ellipses", 1999).
//! - Conversion between general conic coefficients and geometric ellipse parameters.
//! - Sampson residuals.
//! - RANSAC search with iterative inlier refinement.

mod eigen;
mod fit;
mod ransac;
mod types;

pub use fit::{fit_conic_direct, fit_ellipse_direct, rms_sampson_distance, MIN_FIT_POINTS};
pub use ransac::fit_ellipse_ransac;
pub use types::{ConicCoeffs, Ellipse, EllipseFit, FitError, RansacConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::prelude::*;

    fn make_test_ellipse() -> Ellipse {
        Ellipse {
            cx: 100.0,
            cy: 80.0,
            a: 30.0,
            b: 15.0,
            angle: 0.3,
        }
    }

    #[test]
    fn conic_form_preserves_pose_at_any_rotation() {
        for angle in [-1.2, 0.0, 0.3, 1.5] {
            let e = Ellipse {
                angle,
                ..make_test_ellipse()
            };
            let c = e.to_conic();
            assert!(c.is_ellipse());
            let back = c.to_ellipse().expect("ellipse");
            assert_relative_eq!(back.cx, e.cx, epsilon = 1e-9);
            assert_relative_eq!(back.cy, e.cy, epsilon = 1e-9);
            assert_relative_eq!(back.a, e.a, epsilon = 1e-9);
            assert_relative_eq!(back.b, e.b, epsilon = 1e-9);
            assert_relative_eq!(back.angle, angle, epsilon = 1e-9);
        }
    }

    #[test]
    fn hyperbola_has_no_ellipse_form() {
        // x² − y² − 1 = 0
        let c = ConicCoeffs([1.0, 0.0, -1.0, 0.0, 0.0, -1.0]);
        assert!(!c.is_ellipse());
        assert!(c.to_ellipse().is_none());
    }

    #[test]
    fn fit_exact_points() {
        let e = make_test_ellipse();
        let pts = e.sample_points(50);

        let fitted = fit_ellipse_direct(&pts).expect("fit should succeed");
        assert_relative_eq!(fitted.cx, e.cx, epsilon = 1e-6);
        assert_relative_eq!(fitted.cy, e.cy, epsilon = 1e-6);
        assert_relative_eq!(fitted.a, e.a, epsilon = 1e-6);
        assert_relative_eq!(fitted.b, e.b, epsilon = 1e-6);
        assert_relative_eq!(fitted.angle, e.angle, epsilon = 1e-6);
        assert!(rms_sampson_distance(&fitted, &pts) < 1e-8);
    }

    #[test]
    fn fit_noisy_points() {
        let e = make_test_ellipse();
        let mut pts = e.sample_points(200);
        let mut rng = StdRng::seed_from_u64(123);
        let noise = 0.5;
        for p in &mut pts {
            p[0] += rng.gen::<f64>() * noise * 2.0 - noise;
            p[1] += rng.gen::<f64>() * noise * 2.0 - noise;
        }

        let fitted = fit_ellipse_direct(&pts).expect("fit should succeed with noise");
        assert_relative_eq!(fitted.cx, e.cx, epsilon = 1.0);
        assert_relative_eq!(fitted.cy, e.cy, epsilon = 1.0);
        assert_relative_eq!(fitted.a, e.a, epsilon = 2.0);
        assert_relative_eq!(fitted.b, e.b, epsilon = 2.0);
    }

    #[test]
    fn fit_circle() {
        let e = Ellipse {
            cx: 50.0,
            cy: 50.0,
            a: 20.0,
            b: 20.0,
            angle: 0.0,
        };
        let fitted = fit_ellipse_direct(&e.sample_points(100)).expect("circle fit");
        assert_relative_eq!(fitted.cx, 50.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.cy, 50.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.a, 20.0, epsilon = 1e-6);
        assert_relative_eq!(fitted.b, 20.0, epsilon = 1e-6);
    }

    #[test]
    fn degenerate_inputs_dont_panic() {
        let dup: Vec<[f64; 2]> = vec![[1.0, 1.0]; 10];
        assert!(fit_conic_direct(&dup).is_none());

        let empty: Vec<[f64; 2]> = vec![];
        assert!(fit_conic_direct(&empty).is_none());

        let line: Vec<[f64; 2]> = (0..6).map(|i| [i as f64 * 10.0, 0.0]).collect();
        assert!(fit_conic_direct(&line).is_none());
    }

    #[test]
    fn sampson_distance_is_zero_on_the_boundary() {
        let e = make_test_ellipse();
        let conic = e.to_conic();
        for [x, y] in e.sample_points(50) {
            assert!(conic.sampson_distance(x, y) < 1e-8);
        }
        assert!(conic.sampson_distance(e.cx, e.cy) > 1.0);
    }

    #[test]
    fn translation_and_degrees() {
        let e = make_test_ellipse().translated(10.0, -5.0);
        assert_relative_eq!(e.cx, 110.0);
        assert_relative_eq!(e.cy, 75.0);
        assert_relative_eq!(e.rotation_deg(), 0.3f64.to_degrees());
        assert!(e.contains(110.0, 75.0));
        assert!(!e.contains(150.0, 75.0));
    }
}
