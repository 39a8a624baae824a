//! Synthetic eye images shared by unit tests.

use image::{GrayImage, Luma};

use crate::conic::Ellipse;

/// Pupil intensity used by the synthetic renderers.
pub(crate) const PUPIL_PIX: u8 = 20;

/// Fill `[x0, x1) × [y0, y1)` with `value`, clipped to the image.
pub(crate) fn fill_rect(img: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32, value: u8) {
    let (w, h) = img.dimensions();
    for y in y0..y1.min(h) {
        for x in x0..x1.min(w) {
            img.put_pixel(x, y, Luma([value]));
        }
    }
}

/// Iris-like ROI: horizontal ramp `120 + x` with a dark disk.
///
/// The ramp keeps the brightest percentile confined to one side of the
/// ROI so glint removal does not swallow the background.
pub(crate) fn draw_pupil_roi(w: u32, h: u32, center: [f64; 2], radius: f64) -> GrayImage {
    GrayImage::from_fn(w, h, |x, y| {
        let dx = x as f64 - center[0];
        let dy = y as f64 - center[1];
        if dx * dx + dy * dy <= radius * radius {
            Luma([PUPIL_PIX])
        } else {
            Luma([(120 + x).min(250) as u8])
        }
    })
}

/// Binary mask (255 inside) of pixels whose centers lie inside `ellipse`.
pub(crate) fn draw_ellipse_mask(w: u32, h: u32, ellipse: &Ellipse) -> GrayImage {
    GrayImage::from_fn(w, h, |x, y| {
        Luma([if ellipse.contains(x as f64, y as f64) {
            255
        } else {
            0
        }])
    })
}

/// 100×100 eye frame: black surround, ramped iris square `[20, 80)²`,
/// dark pupil disk of `radius` centered at `(50, 50)`.
pub(crate) fn draw_eye_frame(radius: f64) -> GrayImage {
    let mut img = GrayImage::new(100, 100);
    for y in 20..80 {
        for x in 20..80 {
            img.put_pixel(x, y, Luma([(100 + (x - 20)) as u8]));
        }
    }
    for y in 0..100u32 {
        for x in 0..100u32 {
            let dx = x as f64 - 50.0;
            let dy = y as f64 - 50.0;
            if dx * dx + dy * dy <= radius * radius {
                img.put_pixel(x, y, Luma([PUPIL_PIX]));
            }
        }
    }
    img
}
