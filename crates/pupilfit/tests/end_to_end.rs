use std::f64::consts::PI;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;

use image::{GrayImage, Luma};
use pupilfit::{
    filter_series_file, filtered_series_path, raw_series_path, EdgeArtifactEstimator, FitQuality,
    ImageSequenceSource, PipelineOptions, PupilSeries, PupilometryConfig, PupilometryEngine,
    Rect, SourceFrame, Tracker,
};

const PUPIL_RADIUS: f64 = 12.0;

/// Bounding box of all pixels brighter than 60, if any.
fn bright_region(frame: &GrayImage) -> Vec<Rect> {
    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for (x, y, p) in frame.enumerate_pixels() {
        if p[0] > 60 {
            let b = bounds.get_or_insert((x, y, x, y));
            b.0 = b.0.min(x);
            b.1 = b.1.min(y);
            b.2 = b.2.max(x);
            b.3 = b.3.max(y);
        }
    }
    bounds
        .map(|(x0, y0, x1, y1)| vec![Rect { x0, y0, x1: x1 + 1, y1: y1 + 1 }])
        .unwrap_or_default()
}

/// 100×100 frame: ramped bright square `[20, 80)²`, dark disk at (50, 50),
/// small saturated glint on the iris.
fn eye_frame() -> GrayImage {
    let mut img = GrayImage::new(100, 100);
    for y in 20..80u32 {
        for x in 20..80u32 {
            let dx = x as f64 - 50.0;
            let dy = y as f64 - 50.0;
            let v = if dx * dx + dy * dy <= PUPIL_RADIUS * PUPIL_RADIUS {
                20
            } else {
                (100 + (x - 20)) as u8
            };
            img.put_pixel(x, y, Luma([v]));
        }
    }
    for y in 33..36 {
        for x in 65..68 {
            img.put_pixel(x, y, Luma([255]));
        }
    }
    img
}

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pupilfit-e2e-{}-{}", tag, std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn black_frames_are_all_blinks() {
    let engine = PupilometryEngine::new(PupilometryConfig::default());
    let tracker = Tracker {
        engine: &engine,
        detector: &bright_region,
        estimator: &EdgeArtifactEstimator,
    };
    let frames: Vec<SourceFrame> = (0..12).map(|_| GrayImage::new(100, 100).into()).collect();
    let out = tracker
        .run(
            &mut frames.into_iter(),
            &PipelineOptions::default(),
            &AtomicBool::new(false),
        )
        .expect("run");
    assert_eq!(out.series.len(), 12);
    assert!(out.series.iter().all(|r| r.blink && r.area.is_none() && r.center.is_none()));
    assert_eq!(out.count(FitQuality::NoPupil), 12);
}

#[test]
fn drawn_pupil_is_recovered() {
    let frame = eye_frame();
    let candidates = bright_region(&frame);
    assert_eq!(candidates, vec![Rect::from_xywh(20, 20, 60, 60)]);

    let obs = PupilometryEngine::default().process(&frame, &candidates);
    assert!(!obs.blink);
    assert!(obs.quality.has_ellipse(), "failure: {:?}", obs.failure);

    let truth = PI * PUPIL_RADIUS * PUPIL_RADIUS;
    let area = obs.area().expect("area");
    assert!((area - truth).abs() / truth < 0.1, "area {} vs {}", area, truth);
    let [cx, cy] = obs.center().expect("center");
    assert!((cx - 50.0).abs() < 1.0 && (cy - 50.0).abs() < 1.0, "center ({}, {})", cx, cy);
}

#[test]
fn kmeans_segmentation_agrees() {
    let mut config = PupilometryConfig::default();
    config.segmentation.method = pupilfit::SegmentationMethod::KMeans;
    let frame = eye_frame();
    let obs = PupilometryEngine::new(config).process(&frame, &bright_region(&frame));
    let truth = PI * PUPIL_RADIUS * PUPIL_RADIUS;
    let area = obs.area().expect("area");
    assert!((area - truth).abs() / truth < 0.1, "area {}", area);
}

#[test]
fn frame_directory_to_filtered_series() {
    let frames_dir = temp_dir("frames");
    let results_dir = temp_dir("results");
    let n = 20;
    for i in 0..n {
        let img = if i % 5 == 0 { GrayImage::new(100, 100) } else { eye_frame() };
        img.save(frames_dir.join(format!("{:04}.png", i)))
            .expect("write frame");
    }

    let engine = PupilometryEngine::default();
    let tracker = Tracker {
        engine: &engine,
        detector: &bright_region,
        estimator: &EdgeArtifactEstimator,
    };
    let raw_path = raw_series_path(&results_dir, "eye");
    let mut source = ImageSequenceSource::from_dir(&frames_dir).expect("source");
    let out = tracker
        .run_to_file(
            &mut source,
            &PipelineOptions {
                workers: 2,
                batch_size: 6,
            },
            &AtomicBool::new(false),
            &raw_path,
        )
        .expect("track");

    // Blink exactly where the detector saw nothing.
    for (i, r) in out.series.iter().enumerate() {
        assert_eq!(r.blink, i % 5 == 0, "frame {}", i);
    }

    let raw = PupilSeries::load(&raw_path).expect("raw series");
    assert_eq!(raw.len(), n);
    let text = std::fs::read_to_string(&raw_path).expect("read raw");
    assert!(text.lines().all(|l| l.ends_with(',')));

    let filt_path = filtered_series_path(&results_dir, "eye");
    let filtered = filter_series_file(&raw_path, &filt_path).expect("filter");
    assert_eq!(filtered.len(), n);
    assert_eq!(PupilSeries::load(&filt_path).expect("filtered series").len(), n);

    std::fs::remove_dir_all(&frames_dir).ok();
    std::fs::remove_dir_all(&results_dir).ok();
}
