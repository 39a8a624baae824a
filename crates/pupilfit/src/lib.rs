//! Pupil tracking for eye videos.
//!
//! Each frame goes through the same stateless chain:
//!
//! 1. **Detect**: a [`PupilDetector`] proposes candidate rectangles; the
//!    largest (by geometric-mean size) becomes the ROI. No candidates means
//!    a blink.
//! 2. **Segment**: glint inpainting, percentile contrast stretch,
//!    Otsu or k-means binarization, opening, largest 4-connected component.
//! 3. **Fit**: crack-edge boundary points, RANSAC over direct least-squares
//!    ellipse fits, iterative inlier refinement.
//!
//! A run ([`Tracker`]) turns a [`FrameSource`] into a [`PupilSeries`],
//! processing frames in parallel and appending them in order.
//! [`filter_series`] then smooths the complete series per channel.
//!
//! # Public API
//! - [`PupilometryEngine`] for single frames, [`Tracker`] for sequences
//! - [`PupilometryConfig`] with per-stage sections
//! - series I/O ([`PupilSeries`], [`SeriesFormat`]) and temporal filtering
//! - stage functions ([`segment_pupil`], [`fit_pupil_boundary`],
//!   [`robust_rescale`], [`remove_glint`]) for callers composing their own
//!   pipeline

mod artifact;
mod boundary;
mod config;
mod conic;
mod detector;
mod engine;
mod glint;
mod pipeline;
mod rescale;
mod segment;
mod series;
mod temporal;

#[cfg(test)]
pub(crate) mod test_utils;

pub use artifact::{ArtifactEstimate, ArtifactEstimator, EdgeArtifactEstimator};
pub use boundary::{fit_pupil_boundary, mask_boundary_points, FitQuality};
pub use config::{ConfigError, PupilometryConfig, VideoConfig};
pub use conic::{
    fit_conic_direct, fit_ellipse_direct, fit_ellipse_ransac, rms_sampson_distance, ConicCoeffs,
    Ellipse, EllipseFit, FitError, RansacConfig, MIN_FIT_POINTS,
};
pub use detector::{
    select_candidate, DarkBlobDetector, DarkBlobParams, DetectorConfig, PupilDetector, Rect,
};
pub use engine::{FrameFailure, PupilObservation, PupilometryEngine};
pub use glint::{glint_mask, inpaint, remove_glint, GlintConfig};
pub use pipeline::{
    Frame, FrameRotation, FrameSource, ImageSequenceSource, PipelineError, PipelineOptions,
    SourceFrame, TrackOutcome, Tracker, PROGRESS_INTERVAL,
};
pub use rescale::{percentile_u8, robust_rescale};
pub use segment::{
    segment_pupil, select_largest_component, PupilMask, SegmentError, SegmentationConfig,
    SegmentationMethod,
};
pub use series::{
    filtered_series_path, raw_series_path, PupilRecord, PupilSeries, SeriesError, SeriesFormat,
    SERIES_COLUMNS,
};
pub use temporal::{
    filter_series, filter_series_file, force_odd, gaussian_filter1d, median_filter,
    median_filter_present, KernelWidths,
};

/// Ellipse parameters for serialization.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EllipseParams {
    /// Center (x, y) in frame pixels.
    pub center_xy: [f64; 2],
    /// Semi-axes [a, b], `a >= b`.
    pub semi_axes: [f64; 2],
    /// Major-axis rotation from +x, in degrees.
    pub rotation_deg: f64,
}

impl From<&Ellipse> for EllipseParams {
    fn from(e: &Ellipse) -> Self {
        Self {
            center_xy: [e.cx, e.cy],
            semi_axes: [e.a, e.b],
            rotation_deg: e.rotation_deg(),
        }
    }
}

impl From<EllipseParams> for Ellipse {
    fn from(p: EllipseParams) -> Self {
        Self {
            cx: p.center_xy[0],
            cy: p.center_xy[1],
            a: p.semi_axes[0].abs(),
            b: p.semi_axes[1].abs(),
            angle: p.rotation_deg.to_radians(),
        }
    }
}

/// Serializable summary of one frame.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct FrameReport {
    pub blink: bool,
    pub quality: FitQuality,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roi: Option<Rect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ellipse: Option<EllipseParams>,
    /// `π·a²` in square pixels.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inlier_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl From<&PupilObservation> for FrameReport {
    fn from(obs: &PupilObservation) -> Self {
        Self {
            blink: obs.blink,
            quality: obs.quality,
            roi: obs.roi,
            ellipse: obs.ellipse.as_ref().map(EllipseParams::from),
            area: obs.area(),
            inlier_percent: obs.fit.as_ref().map(EllipseFit::inlier_percent),
            failure: obs.failure.as_ref().map(ToString::to_string),
        }
    }
}
