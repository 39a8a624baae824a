//! Per-frame pupillometry: candidate selection, ROI extraction,
//! segmentation and boundary fitting.

use image::imageops::crop_imm;
use image::GrayImage;

use crate::boundary::{fit_pupil_boundary, FitQuality};
use crate::config::PupilometryConfig;
use crate::conic::{Ellipse, EllipseFit, FitError};
use crate::detector::{select_candidate, PupilDetector, Rect};
use crate::segment::{segment_pupil, SegmentError};

/// Why a frame with a pupil candidate produced no ellipse.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameFailure {
    /// Every candidate rectangle fell outside the frame.
    NoValidRoi,
    Segment(SegmentError),
    Fit(FitError),
}

impl std::fmt::Display for FrameFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoValidRoi => write!(f, "no candidate rectangle intersects the frame"),
            Self::Segment(e) => write!(f, "segmentation failed: {}", e),
            Self::Fit(e) => write!(f, "ellipse fit failed: {}", e),
        }
    }
}

impl std::error::Error for FrameFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NoValidRoi => None,
            Self::Segment(e) => Some(e),
            Self::Fit(e) => Some(e),
        }
    }
}

/// Result of processing one frame.
#[derive(Debug, Clone)]
pub struct PupilObservation {
    /// Pupil ellipse in frame coordinates; `None` on blink or failure.
    pub ellipse: Option<Ellipse>,
    /// ROI the ellipse was fitted in; `None` when no candidate was usable.
    pub roi: Option<Rect>,
    /// The detector returned no candidates.
    pub blink: bool,
    pub quality: FitQuality,
    /// Inlier statistics of the accepted fit.
    pub fit: Option<EllipseFit>,
    pub failure: Option<FrameFailure>,
}

impl PupilObservation {
    fn blink() -> Self {
        Self {
            ellipse: None,
            roi: None,
            blink: true,
            quality: FitQuality::NoPupil,
            fit: None,
            failure: None,
        }
    }

    fn failed(roi: Option<Rect>, failure: FrameFailure) -> Self {
        Self {
            ellipse: None,
            roi,
            blink: false,
            quality: FitQuality::Failed,
            fit: None,
            failure: Some(failure),
        }
    }

    /// Pupil area `π·a²` (major axis taken as the true pupil radius, which
    /// undoes foreshortening of an obliquely viewed disk).
    pub fn area(&self) -> Option<f64> {
        self.ellipse
            .map(|e| std::f64::consts::PI * e.a * e.a)
    }

    /// Pupil center `[x, y]` in frame coordinates.
    pub fn center(&self) -> Option<[f64; 2]> {
        self.ellipse.map(|e| [e.cx, e.cy])
    }
}

/// Stateless per-frame pupil tracker.
///
/// Create once per run; `process` may be called concurrently from several
/// threads.
#[derive(Debug, Clone, Default)]
pub struct PupilometryEngine {
    config: PupilometryConfig,
}

impl PupilometryEngine {
    pub fn new(config: PupilometryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PupilometryConfig {
        &self.config
    }

    /// Run `detector` on `frame`, then [`process`](Self::process) its candidates.
    pub fn detect_and_process(
        &self,
        frame: &GrayImage,
        detector: &dyn PupilDetector,
    ) -> PupilObservation {
        let candidates = detector.detect(frame);
        self.process(frame, &candidates)
    }

    /// Turn a frame and its detector candidates into an observation.
    pub fn process(&self, frame: &GrayImage, candidates: &[Rect]) -> PupilObservation {
        if candidates.is_empty() {
            return PupilObservation::blink();
        }
        let (w, h) = frame.dimensions();
        let Some(rect) = select_candidate(candidates, w, h) else {
            return PupilObservation::failed(None, FrameFailure::NoValidRoi);
        };

        let roi = crop_imm(frame, rect.x0, rect.y0, rect.width(), rect.height()).to_image();
        let mask = match segment_pupil(&roi, &self.config.segmentation, &self.config.glint) {
            Ok(m) => m,
            Err(e) => return PupilObservation::failed(Some(rect), FrameFailure::Segment(e)),
        };
        let fit = match fit_pupil_boundary(&mask.mask, &roi, &self.config.ransac) {
            Ok(f) => f,
            Err(e) => return PupilObservation::failed(Some(rect), FrameFailure::Fit(e)),
        };

        let quality = FitQuality::grade(&fit, &self.config.ransac);
        let ellipse = fit.ellipse.translated(rect.x0 as f64, rect.y0 as f64);
        tracing::trace!(
            cx = ellipse.cx,
            cy = ellipse.cy,
            a = ellipse.a,
            b = ellipse.b,
            inliers = fit.num_inliers,
            %quality,
            "pupil fit"
        );
        PupilObservation {
            ellipse: Some(ellipse),
            roi: Some(rect),
            blink: false,
            quality,
            fit: Some(fit),
            failure: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DarkBlobDetector;
    use crate::test_utils::draw_eye_frame;

    #[test]
    fn no_candidates_is_a_blink() {
        let engine = PupilometryEngine::default();
        let obs = engine.process(&GrayImage::new(50, 50), &[]);
        assert!(obs.blink);
        assert_eq!(obs.quality, FitQuality::NoPupil);
        assert!(obs.ellipse.is_none() && obs.roi.is_none());
        assert_eq!(obs.area(), None);
    }

    #[test]
    fn out_of_frame_candidate_fails_without_blink() {
        let engine = PupilometryEngine::default();
        let obs = engine.process(&GrayImage::new(50, 50), &[Rect::from_xywh(60, 60, 10, 10)]);
        assert!(!obs.blink);
        assert_eq!(obs.quality, FitQuality::Failed);
        assert_eq!(obs.failure, Some(FrameFailure::NoValidRoi));
    }

    #[test]
    fn pupil_is_fitted_in_frame_coordinates() {
        let frame = draw_eye_frame(12.0);
        let engine = PupilometryEngine::default();
        let obs = engine.process(&frame, &[Rect::from_xywh(24, 24, 52, 52)]);
        assert!(!obs.blink);
        assert!(obs.quality.has_ellipse(), "{:?}", obs.failure);
        let [cx, cy] = obs.center().expect("center");
        assert!((cx - 50.0).abs() < 1.0 && (cy - 50.0).abs() < 1.0, "({cx}, {cy})");
        let area = obs.area().expect("area");
        let truth = std::f64::consts::PI * 144.0;
        assert!((area - truth).abs() / truth < 0.1, "area {}", area);
        assert_eq!(obs.roi, Some(Rect::from_xywh(24, 24, 52, 52)));
    }

    #[test]
    fn detector_drives_the_engine() {
        let frame = draw_eye_frame(10.0);
        let obs = PupilometryEngine::default().detect_and_process(&frame, &DarkBlobDetector::default());
        assert!(obs.quality.has_ellipse(), "{:?}", obs);
        let [cx, cy] = obs.center().expect("center");
        assert!((cx - 50.0).abs() < 1.0 && (cy - 50.0).abs() < 1.0);
    }

    #[test]
    fn flat_roi_fails_cleanly() {
        let frame = GrayImage::from_pixel(40, 40, image::Luma([90]));
        let obs = PupilometryEngine::default().process(&frame, &[Rect::from_xywh(5, 5, 30, 30)]);
        assert!(!obs.blink);
        assert_eq!(obs.quality, FitQuality::Failed);
        assert!(obs.area().is_none());
    }
}
