//! Percentile-based contrast stretching.

use image::GrayImage;

/// Intensity at percentile `p` (in [0, 100]) using nearest-rank selection.
///
/// Nearest-rank always returns an intensity that actually occurs in the
/// image, which keeps [`robust_rescale`] idempotent. Returns `None` for an
/// empty image.
pub fn percentile_u8(img: &GrayImage, p: f64) -> Option<u8> {
    let n = img.as_raw().len();
    if n == 0 {
        return None;
    }
    let mut hist = [0usize; 256];
    for &v in img.as_raw() {
        hist[v as usize] += 1;
    }

    let p = if p.is_finite() { p.clamp(0.0, 100.0) } else { 0.0 };
    let rank = ((n - 1) as f64 * p / 100.0).round() as usize;
    let mut seen = 0usize;
    for (value, &count) in hist.iter().enumerate() {
        seen += count;
        if seen > rank {
            return Some(value as u8);
        }
    }
    Some(u8::MAX)
}

/// Linearly stretch `roi` so the `low` percentile maps to 0 and the `high`
/// percentile maps to 255, clipping everything outside.
///
/// When both percentiles hit the same intensity the image is only clipped
/// to that bound; no scaling is attempted.
pub fn robust_rescale(roi: &GrayImage, (low, high): (f64, f64)) -> GrayImage {
    let (low, high) = if low <= high { (low, high) } else { (high, low) };
    let (Some(lo), Some(hi)) = (percentile_u8(roi, low), percentile_u8(roi, high)) else {
        return roi.clone();
    };

    let lut = stretch_lut(lo, hi);
    let mut out = roi.clone();
    for v in out.iter_mut() {
        *v = lut[*v as usize];
    }
    out
}

fn stretch_lut(lo: u8, hi: u8) -> [u8; 256] {
    let mut lut = [0u8; 256];
    let span = hi as f64 - lo as f64;
    for (v, slot) in lut.iter_mut().enumerate() {
        let clipped = (v as u8).clamp(lo, hi);
        *slot = if span > 0.0 {
            ((clipped - lo) as f64 * 255.0 / span).round() as u8
        } else {
            clipped
        };
    }
    lut
}
