//! Specular glint suppression.
//!
//! The brightest pixels of an ROI (at or above a percentile) are treated as
//! corneal reflections. Their mask is dilated with a disk to cover the halo
//! and the covered pixels are inpainted from the surrounding intensities in
//! fast-marching order: pixels nearest the mask border are filled first, each
//! as an inverse-square-distance weighted mean of already-known pixels.

use std::collections::VecDeque;

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::dilate;

use crate::rescale::percentile_u8;

/// Glint-removal parameters.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct GlintConfig {
    /// Run glint removal before segmentation.
    pub enable: bool,
    /// Brightness percentile; pixels at or above it seed the glint mask.
    pub percentile: f64,
    /// Odd disk diameter (pixels) for mask dilation; also the inpainting radius.
    pub kernel_size: u8,
}

impl Default for GlintConfig {
    fn default() -> Self {
        Self {
            enable: true,
            percentile: 95.0,
            kernel_size: 5,
        }
    }
}

/// Build the dilated glint mask (255 = glint) for `roi`.
///
/// When the percentile level is shared by far more pixels than the
/// percentile implies (a flat or saturated iris), only pixels strictly
/// brighter than the level seed the mask.
pub fn glint_mask(roi: &GrayImage, config: &GlintConfig) -> GrayImage {
    let (w, h) = roi.dimensions();
    let Some(level) = percentile_u8(roi, config.percentile) else {
        return GrayImage::new(w, h);
    };
    let at_or_above = roi.as_raw().iter().filter(|&&v| v >= level).count();
    let expected = roi.as_raw().len() as f64 * (100.0 - config.percentile).max(0.0) / 100.0;
    let seed_level = if at_or_above as f64 > 2.0 * expected.max(1.0) {
        match level.checked_add(1) {
            Some(l) => l,
            None => return GrayImage::new(w, h),
        }
    } else {
        level
    };
    let seeds = GrayImage::from_fn(w, h, |x, y| {
        Luma([if roi.get_pixel(x, y)[0] >= seed_level { 255 } else { 0 }])
    });
    let radius = config.kernel_size / 2;
    if radius == 0 {
        return seeds;
    }
    dilate(&seeds, Norm::L2, radius)
}

/// Remove bright specular highlights from `roi`.
///
/// Returns an image of the same shape. If the glint mask would cover the
/// whole ROI (e.g. a flat region) there is nothing to inpaint from and the
/// input is returned unchanged.
pub fn remove_glint(roi: &GrayImage, config: &GlintConfig) -> GrayImage {
    if !config.enable || roi.width() == 0 || roi.height() == 0 {
        return roi.clone();
    }
    let mask = glint_mask(roi, config);
    let n_masked = mask.as_raw().iter().filter(|&&v| v != 0).count();
    if n_masked == 0 {
        return roi.clone();
    }
    if n_masked == mask.as_raw().len() {
        tracing::trace!("glint mask covers the whole ROI; skipping inpainting");
        return roi.clone();
    }
    inpaint(roi, &mask, config.kernel_size.max(1) as i64)
}

/// Fill the nonzero pixels of `mask` from the known pixels around them.
pub fn inpaint(img: &GrayImage, mask: &GrayImage, radius: i64) -> GrayImage {
    let (w, h) = img.dimensions();
    let (wi, hi) = (w as i64, h as i64);
    let idx = |x: i64, y: i64| (y * wi + x) as usize;

    let mut values: Vec<f64> = img.as_raw().iter().map(|&v| v as f64).collect();
    let mut known: Vec<bool> = mask.as_raw().iter().map(|&m| m == 0).collect();
    let mut queued = known.clone();

    // Narrow band: masked pixels touching a known pixel.
    let mut band = VecDeque::new();
    for y in 0..hi {
        for x in 0..wi {
            if known[idx(x, y)] {
                continue;
            }
            let touches_known = neighbors8(x, y, wi, hi).any(|(nx, ny)| known[idx(nx, ny)]);
            if touches_known {
                queued[idx(x, y)] = true;
                band.push_back((x, y));
            }
        }
    }

    let r2 = radius * radius;
    while let Some((x, y)) = band.pop_front() {
        let mut sum = 0.0;
        let mut wsum = 0.0;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let d2 = dx * dx + dy * dy;
                if d2 == 0 || d2 > r2 {
                    continue;
                }
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= wi || ny >= hi || !known[idx(nx, ny)] {
                    continue;
                }
                let wgt = 1.0 / d2 as f64;
                sum += wgt * values[idx(nx, ny)];
                wsum += wgt;
            }
        }
        if wsum > 0.0 {
            values[idx(x, y)] = sum / wsum;
        }
        known[idx(x, y)] = true;

        for (nx, ny) in neighbors8(x, y, wi, hi) {
            if !queued[idx(nx, ny)] {
                queued[idx(nx, ny)] = true;
                band.push_back((nx, ny));
            }
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        Luma([values[idx(x as i64, y as i64)].round().clamp(0.0, 255.0) as u8])
    })
}

fn neighbors8(x: i64, y: i64, w: i64, h: i64) -> impl Iterator<Item = (i64, i64)> {
    (-1..=1)
        .flat_map(move |dy| (-1..=1).map(move |dx| (x + dx, y + dy)))
        .filter(move |&(nx, ny)| (nx, ny) != (x, y) && nx >= 0 && ny >= 0 && nx < w && ny < h)
}
