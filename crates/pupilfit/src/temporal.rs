//! Post-hoc temporal smoothing of a complete pupil series.
//!
//! Each channel is filtered independently with a moving median whose
//! window spans a fixed duration. Pupil geometry is filtered over the
//! samples that have it, and a filtered blink drops its geometry. The
//! artifact-power channel is first smoothed with a one-sample Gaussian to
//! tame frame-to-frame spikes.
//! Time and pseudo-glint columns are carried through unchanged.

use std::path::Path;

use crate::series::{PupilRecord, PupilSeries, SeriesError, SeriesFormat};

/// Median window duration (s) for area and blink channels.
pub const AREA_WINDOW_S: f64 = 0.25;
/// Median window duration (s) for the artifact-power channel.
pub const ARTIFACT_WINDOW_S: f64 = 1.0;
/// Median window (samples) for the pupil-center channels.
pub const CENTER_WINDOW: usize = 3;
/// Gaussian pre-smoothing sigma (samples) for artifact power.
pub const ARTIFACT_SIGMA: f64 = 1.0;

/// Smallest odd integer `>= x`, and at least 1.
pub fn force_odd(x: f64) -> usize {
    if !x.is_finite() || x <= 1.0 {
        return 1;
    }
    let n = x.ceil() as usize;
    if n % 2 == 0 {
        n + 1
    } else {
        n
    }
}

/// Moving-median window lengths (samples) per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelWidths {
    pub area: usize,
    pub center: usize,
    pub blink: usize,
    pub artifact: usize,
}

impl KernelWidths {
    /// Widths for sampling interval `dt` seconds.
    pub fn from_interval(dt: f64) -> Result<Self, SeriesError> {
        if !(dt > 0.0 && dt.is_finite()) {
            return Err(SeriesError::NonPositiveInterval);
        }
        Ok(Self {
            area: force_odd(AREA_WINDOW_S / dt),
            center: CENTER_WINDOW,
            blink: force_odd(AREA_WINDOW_S / dt),
            artifact: force_odd(ARTIFACT_WINDOW_S / dt),
        })
    }
}

/// Moving median with window `k` (forced odd) and zero padding at both
/// ends, for channels that have a value at every sample.
pub fn median_filter(x: &[f64], k: usize) -> Vec<f64> {
    moving_median(x, k, Some(0.0))
}

/// Moving median over the samples that are present.
///
/// Non-finite samples and positions past either end are left out of the
/// window, so the window shrinks at the ends instead of being padded. A
/// window with nothing left yields NaN.
pub fn median_filter_present(x: &[f64], k: usize) -> Vec<f64> {
    moving_median(x, k, None)
}

fn moving_median(x: &[f64], k: usize, pad: Option<f64>) -> Vec<f64> {
    let half = (force_odd(k as f64) / 2) as isize;
    let n = x.len() as isize;
    let mut window = Vec::with_capacity(2 * half as usize + 1);
    (0..n)
        .map(|i| {
            window.clear();
            for j in i - half..=i + half {
                if j < 0 || j >= n {
                    window.extend(pad);
                } else if x[j as usize].is_finite() {
                    window.push(x[j as usize]);
                }
            }
            median_of(&mut window)
        })
        .collect()
}

fn median_of(v: &mut [f64]) -> f64 {
    if v.is_empty() {
        return f64::NAN;
    }
    v.sort_by(f64::total_cmp);
    let m = v.len() / 2;
    if v.len() % 2 == 1 {
        v[m]
    } else {
        0.5 * (v[m - 1] + v[m])
    }
}

/// 1-D Gaussian smoothing with half-sample symmetric boundary reflection;
/// the kernel is truncated at four sigma.
pub fn gaussian_filter1d(x: &[f64], sigma: f64) -> Vec<f64> {
    if x.is_empty() || !(sigma > 0.0) {
        return x.to_vec();
    }
    let radius = (4.0 * sigma + 0.5) as isize;
    let mut kernel: Vec<f64> = (-radius..=radius)
        .map(|i| (-0.5 * (i as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|w| *w /= total);

    let n = x.len() as isize;
    let reflect = |mut j: isize| -> usize {
        // Period 2n: d c b a | a b c d | d c b a
        let period = 2 * n;
        j = j.rem_euclid(period);
        if j >= n {
            j = period - 1 - j;
        }
        j as usize
    };
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .zip(-radius..=radius)
                .map(|(w, d)| w * x[reflect(i + d)])
                .sum::<f64>()
        })
        .collect()
}

/// Smooth every channel of `series`.
///
/// A single-record series is returned unchanged.
pub fn filter_series(series: &PupilSeries) -> Result<PupilSeries, SeriesError> {
    let records = series.records();
    match records.len() {
        0 => return Err(SeriesError::Empty),
        1 => return Ok(series.clone()),
        _ => {}
    }
    let dt = records[1].time - records[0].time;
    let k = KernelWidths::from_interval(dt)?;
    tracing::debug!(dt, ?k, "temporal filter kernels");

    let area = median_filter_present(&column(records, |r| r.area.unwrap_or(f64::NAN)), k.area);
    let cx = median_filter_present(
        &column(records, |r| r.center.map_or(f64::NAN, |c| c[0])),
        k.center,
    );
    let cy = median_filter_present(
        &column(records, |r| r.center.map_or(f64::NAN, |c| c[1])),
        k.center,
    );
    let blink = median_filter(&column(records, |r| if r.blink { 1.0 } else { 0.0 }), k.blink);
    let artifact = median_filter(
        &gaussian_filter1d(&column(records, |r| r.artifact_power), ARTIFACT_SIGMA),
        k.artifact,
    );

    // A filtered blink carries no pupil geometry.
    let finite = |v: f64, blink: bool| (v.is_finite() && !blink).then_some(v);
    let filtered: Vec<PupilRecord> = records
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let blink = blink[i] >= 0.5;
            PupilRecord {
                time: r.time,
                area: finite(area[i], blink),
                center: finite(cx[i], blink)
                    .zip(finite(cy[i], blink))
                    .map(|(x, y)| [x, y]),
                blink,
                artifact_power: artifact[i],
                glint: r.glint,
            }
        })
        .collect();
    Ok(PupilSeries::from(filtered))
}

fn column(records: &[PupilRecord], f: impl Fn(&PupilRecord) -> f64) -> Vec<f64> {
    records.iter().map(f).collect()
}

/// Read a raw series file, smooth it and write the filtered file.
///
/// The raw file is never modified.
pub fn filter_series_file(raw: &Path, filtered: &Path) -> Result<PupilSeries, SeriesError> {
    let series = PupilSeries::load(raw)?;
    if series.is_empty() {
        return Err(SeriesError::Empty);
    }
    let smoothed = filter_series(&series)?;
    smoothed.save(filtered, SeriesFormat::Filtered)?;
    tracing::info!(
        records = smoothed.len(),
        path = %filtered.display(),
        "wrote filtered pupil series"
    );
    Ok(smoothed)
}
