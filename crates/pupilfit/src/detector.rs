//! Pupil candidate detection.
//!
//! The engine consumes any [`PupilDetector`]; it never looks inside one.
//! [`DarkBlobDetector`] is a lightweight built-in heuristic (dark, compact
//! regions away from the frame border) for recordings where no pretrained
//! detector is available.

use image::{GrayImage, Luma};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::region_labelling::{connected_components, Connectivity};

/// Integer rectangle `[x0, x1) × [y0, y1)` in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    /// Rectangle from its corner and size.
    pub fn from_xywh(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x.saturating_add(width),
            y1: y.saturating_add(height),
        }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Geometric mean of width and height, used as the object-scale proxy.
    pub fn scale(&self) -> f64 {
        (self.width() as f64 * self.height() as f64).sqrt()
    }

    /// Intersection with a `width × height` frame.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let x0 = self.x0.min(width);
        let y0 = self.y0.min(height);
        Self {
            x0,
            y0,
            x1: self.x1.min(width).max(x0),
            y1: self.y1.min(height).max(y0),
        }
    }
}

/// Capability that locates pupil candidates in a full frame.
///
/// Implementations must be stateless across frames so frames can be
/// processed concurrently.
pub trait PupilDetector: Send + Sync {
    /// Zero or more candidate rectangles, in any order.
    fn detect(&self, frame: &GrayImage) -> Vec<Rect>;
}

impl<F> PupilDetector for F
where
    F: Fn(&GrayImage) -> Vec<Rect> + Send + Sync,
{
    fn detect(&self, frame: &GrayImage) -> Vec<Rect> {
        self(frame)
    }
}

/// Pick the candidate with the largest [`Rect::scale`] after clamping to
/// the frame. Empty rectangles are ignored; ties keep the earliest.
pub fn select_candidate(candidates: &[Rect], width: u32, height: u32) -> Option<Rect> {
    let mut best: Option<Rect> = None;
    for rect in candidates.iter().map(|r| r.clamped(width, height)) {
        if rect.is_empty() {
            continue;
        }
        if best.map_or(true, |b| rect.scale() > b.scale()) {
            best = Some(rect);
        }
    }
    best
}

/// Parameters of the built-in [`DarkBlobDetector`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DarkBlobParams {
    /// Gaussian pre-blur sigma (pixels); 0 disables blurring.
    pub blur_sigma: f32,
    /// Smallest accepted blob area (pixels).
    pub min_area_px: usize,
    /// Largest accepted blob area as a fraction of the frame.
    pub max_area_fraction: f64,
    /// Bounding boxes grow by this fraction of their larger side on each edge.
    pub margin_fraction: f64,
    /// Drop blobs touching the frame border (eyelids, vignetting).
    pub reject_border: bool,
}

impl Default for DarkBlobParams {
    fn default() -> Self {
        Self {
            blur_sigma: 1.5,
            min_area_px: 30,
            max_area_fraction: 0.5,
            margin_fraction: 0.5,
            reject_border: true,
        }
    }
}

/// Detector settings.
///
/// `min_neighbors` and `scale_factor` are the cascade-detector knobs of
/// external detectors; they are carried so a run configuration is complete
/// and are not interpreted by the built-in detector.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub min_neighbors: u32,
    pub scale_factor: f64,
    pub dark_blob: DarkBlobParams,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_neighbors: 40,
            scale_factor: 1.05,
            dark_blob: DarkBlobParams::default(),
        }
    }
}

/// Dark compact regions below the frame's Otsu level.
#[derive(Debug, Clone, Default)]
pub struct DarkBlobDetector {
    params: DarkBlobParams,
}

impl DarkBlobDetector {
    pub fn new(params: DarkBlobParams) -> Self {
        Self { params }
    }
}

impl PupilDetector for DarkBlobDetector {
    fn detect(&self, frame: &GrayImage) -> Vec<Rect> {
        let (w, h) = frame.dimensions();
        if w < 3 || h < 3 {
            return Vec::new();
        }
        let smoothed = if self.params.blur_sigma > 0.0 {
            imageproc::filter::gaussian_blur_f32(frame, self.params.blur_sigma)
        } else {
            frame.clone()
        };
        let level = otsu_level(&smoothed);
        let dark = threshold(&smoothed, level, ThresholdType::BinaryInverted);
        let labels = connected_components(&dark, Connectivity::Eight, Luma([0u8]));

        // label -> (area, x0, y0, x1, y1, touches_border)
        let mut blobs: Vec<Option<(usize, u32, u32, u32, u32, bool)>> = Vec::new();
        for (x, y, px) in labels.enumerate_pixels() {
            let label = px[0] as usize;
            if label == 0 {
                continue;
            }
            if label >= blobs.len() {
                blobs.resize(label + 1, None);
            }
            let border = x == 0 || y == 0 || x + 1 == w || y + 1 == h;
            let b = blobs[label].get_or_insert((0, x, y, x, y, false));
            b.0 += 1;
            b.1 = b.1.min(x);
            b.2 = b.2.min(y);
            b.3 = b.3.max(x);
            b.4 = b.4.max(y);
            b.5 |= border;
        }

        let max_area = (self.params.max_area_fraction * (w as f64) * (h as f64)) as usize;
        let rects: Vec<Rect> = blobs
            .into_iter()
            .flatten()
            .filter(|&(area, .., border)| {
                area >= self.params.min_area_px
                    && area <= max_area
                    && !(self.params.reject_border && border)
            })
            .map(|(_, x0, y0, x1, y1, _)| {
                let side = (x1 - x0 + 1).max(y1 - y0 + 1) as f64;
                let m = (self.params.margin_fraction * side).round() as u32;
                Rect {
                    x0: x0.saturating_sub(m),
                    y0: y0.saturating_sub(m),
                    x1: x1 + 1 + m,
                    y1: y1 + 1 + m,
                }
                .clamped(w, h)
            })
            .collect();
        tracing::trace!(level, n_candidates = rects.len(), "dark blob detection");
        rects
    }
}
