//! Frame loop: pull frames from a source, run the engine on each, and
//! assemble the ordered pupil series.
//!
//! Frames are read sequentially in batches. Each batch is processed in
//! parallel (frames are independent) and appended in frame order, so the
//! series is identical whatever the worker count. A cancellation flag is
//! checked between frames.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use image::imageops::{crop_imm, rotate180, rotate270, rotate90};
use image::GrayImage;
use rayon::prelude::*;

use crate::artifact::ArtifactEstimator;
use crate::boundary::FitQuality;
use crate::config::ConfigError;
use crate::detector::PupilDetector;
use crate::engine::PupilometryEngine;
use crate::series::{PupilRecord, PupilSeries, SeriesError, SeriesFormat};

/// Progress is logged every this many frames.
pub const PROGRESS_INTERVAL: usize = 100;

const FRAME_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// Run-level failure. Per-frame problems never surface here.
#[derive(Debug)]
pub enum PipelineError {
    /// Input missing or unusable.
    Source(String),
    Image {
        path: PathBuf,
        source: image::ImageError,
    },
    Io(std::io::Error),
    Series(SeriesError),
    Config(ConfigError),
    ThreadPool(rayon::ThreadPoolBuildError),
    /// The cancellation flag was raised.
    Cancelled,
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source(msg) => write!(f, "frame source: {}", msg),
            Self::Image { path, source } => {
                write!(f, "cannot decode frame {}: {}", path.display(), source)
            }
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Series(e) => write!(f, "{}", e),
            Self::Config(e) => write!(f, "{}", e),
            Self::ThreadPool(e) => write!(f, "cannot start worker pool: {}", e),
            Self::Cancelled => write!(f, "run cancelled"),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Image { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            Self::Series(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::ThreadPool(e) => Some(e),
            Self::Source(_) | Self::Cancelled => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<SeriesError> for PipelineError {
    fn from(e: SeriesError) -> Self {
        Self::Series(e)
    }
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// A frame as delivered by a [`FrameSource`].
#[derive(Debug, Clone)]
pub struct SourceFrame {
    pub image: GrayImage,
    /// Artifact power measured upstream; when `None` the run's
    /// [`ArtifactEstimator`] supplies it.
    pub artifact_power: Option<f64>,
}

impl From<GrayImage> for SourceFrame {
    fn from(image: GrayImage) -> Self {
        Self {
            image,
            artifact_power: None,
        }
    }
}

/// Producer of grayscale frames in recording order.
pub trait FrameSource: Send {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<SourceFrame>, PipelineError>;

    /// Total number of frames, if known up front.
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

/// Frames held in memory.
impl FrameSource for std::vec::IntoIter<SourceFrame> {
    fn next_frame(&mut self) -> Result<Option<SourceFrame>, PipelineError> {
        Ok(self.next())
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.len())
    }
}

/// Clockwise rotation applied to frames at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameRotation {
    #[default]
    None,
    Cw90,
    Cw180,
    Cw270,
}

impl FrameRotation {
    /// Rotation for a clockwise angle in degrees; only multiples of 90 map.
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees % 360 {
            0 => Some(Self::None),
            90 => Some(Self::Cw90),
            180 => Some(Self::Cw180),
            270 => Some(Self::Cw270),
            _ => None,
        }
    }

    pub fn apply(self, image: GrayImage) -> GrayImage {
        match self {
            Self::None => image,
            Self::Cw90 => rotate90(&image),
            Self::Cw180 => rotate180(&image),
            Self::Cw270 => rotate270(&image),
        }
    }
}

/// A directory (or list) of still images, read in file-name order.
#[derive(Debug, Clone)]
pub struct ImageSequenceSource {
    paths: Vec<PathBuf>,
    pos: usize,
    border: u32,
    rotation: FrameRotation,
}

impl ImageSequenceSource {
    /// Frames from explicit paths, in the given order.
    pub fn from_paths(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            pos: 0,
            border: 0,
            rotation: FrameRotation::None,
        }
    }

    /// All image files directly inside `dir`, sorted by name.
    pub fn from_dir(dir: &Path) -> Result<Self, PipelineError> {
        if !dir.is_dir() {
            return Err(PipelineError::Source(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_frame = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| FRAME_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            if is_frame && path.is_file() {
                paths.push(path);
            }
        }
        if paths.is_empty() {
            return Err(PipelineError::Source(format!(
                "no image frames in {}",
                dir.display()
            )));
        }
        paths.sort();
        Ok(Self::from_paths(paths))
    }

    /// Trim `border` pixels from every side of each frame.
    pub fn with_border(mut self, border: u32) -> Self {
        self.border = border;
        self
    }

    /// Rotate each frame after trimming.
    pub fn with_rotation(mut self, rotation: FrameRotation) -> Self {
        self.rotation = rotation;
        self
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<SourceFrame>, PipelineError> {
        let Some(path) = self.paths.get(self.pos) else {
            return Ok(None);
        };
        self.pos += 1;
        let image = image::open(path)
            .map_err(|source| PipelineError::Image {
                path: path.clone(),
                source,
            })?
            .to_luma8();
        let image = self.rotation.apply(trim_border(image, self.border));
        Ok(Some(image.into()))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.paths.len())
    }
}

fn trim_border(image: GrayImage, border: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    if border == 0 || w <= 2 * border || h <= 2 * border {
        return image;
    }
    crop_imm(&image, border, border, w - 2 * border, h - 2 * border).to_image()
}

/// A numbered frame inside the run.
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: usize,
    /// `index / framerate` seconds.
    pub time: f64,
    pub image: GrayImage,
    pub artifact_power: Option<f64>,
}

/// Scheduling knobs.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Worker threads; 0 uses the global rayon pool, 1 runs inline.
    pub workers: usize,
    /// Frames read ahead per parallel batch.
    pub batch_size: usize,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            batch_size: 64,
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default)]
pub struct TrackOutcome {
    pub series: PupilSeries,
    /// Fit quality per frame, aligned with `series`.
    pub quality: Vec<FitQuality>,
}

impl TrackOutcome {
    /// Number of frames with the given quality.
    pub fn count(&self, quality: FitQuality) -> usize {
        self.quality.iter().filter(|&&q| q == quality).count()
    }
}

/// Collaborators of one tracking run.
pub struct Tracker<'a> {
    pub engine: &'a PupilometryEngine,
    pub detector: &'a dyn PupilDetector,
    pub estimator: &'a dyn ArtifactEstimator,
}

impl Tracker<'_> {
    /// Process one frame into its series record.
    pub fn process_frame(&self, frame: &Frame) -> (PupilRecord, FitQuality) {
        let obs = self.engine.detect_and_process(&frame.image, self.detector);
        if let Some(failure) = &obs.failure {
            tracing::warn!(frame = frame.index, %failure, "pupil not fitted");
        }
        let artifact = self.estimator.estimate(&frame.image);
        let record = PupilRecord {
            time: frame.time,
            area: obs.area(),
            center: obs.center(),
            blink: obs.blink,
            artifact_power: frame.artifact_power.unwrap_or(artifact.power),
            glint: artifact.glint,
        };
        (record, obs.quality)
    }

    /// Track every frame of `source`.
    ///
    /// Returns [`PipelineError::Cancelled`] if `cancel` is raised before
    /// the source is exhausted.
    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        options: &PipelineOptions,
        cancel: &AtomicBool,
    ) -> Result<TrackOutcome, PipelineError> {
        self.engine.config().validate()?;
        if options.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(options.workers)
                .build()
                .map_err(PipelineError::ThreadPool)?;
            pool.install(|| self.run_batches(source, options, cancel))
        } else {
            self.run_batches(source, options, cancel)
        }
    }

    fn run_batches(
        &self,
        source: &mut dyn FrameSource,
        options: &PipelineOptions,
        cancel: &AtomicBool,
    ) -> Result<TrackOutcome, PipelineError> {
        let framerate = self.engine.config().video.framerate;
        let total = source.len_hint();
        let batch_size = options.batch_size.max(1);
        let parallel = options.workers != 1;
        let started = Instant::now();

        tracing::info!(?total, framerate, workers = options.workers, "tracking started");
        let mut outcome = TrackOutcome::default();
        let mut batch: Vec<Frame> = Vec::with_capacity(batch_size);
        let mut next_index = 0usize;
        let mut exhausted = false;

        while !exhausted {
            batch.clear();
            while batch.len() < batch_size {
                if cancel.load(Ordering::Relaxed) {
                    return Err(PipelineError::Cancelled);
                }
                match source.next_frame()? {
                    Some(src) => {
                        batch.push(Frame {
                            index: next_index,
                            time: next_index as f64 / framerate,
                            image: src.image,
                            artifact_power: src.artifact_power,
                        });
                        next_index += 1;
                    }
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }

            let results: Vec<Option<(PupilRecord, FitQuality)>> = if parallel {
                batch
                    .par_iter()
                    .map(|f| self.process_unless_cancelled(f, cancel))
                    .collect()
            } else {
                batch
                    .iter()
                    .map(|f| self.process_unless_cancelled(f, cancel))
                    .collect()
            };

            for (frame, result) in batch.iter().zip(results) {
                let Some((record, quality)) = result else {
                    return Err(PipelineError::Cancelled);
                };
                if (frame.index + 1) % PROGRESS_INTERVAL == 0 {
                    log_progress(frame.index + 1, total, &record, started);
                }
                outcome.series.push(record);
                outcome.quality.push(quality);
            }
        }

        tracing::info!(
            frames = outcome.series.len(),
            blinks = outcome.count(FitQuality::NoPupil),
            low_confidence = outcome.count(FitQuality::LowConfidence),
            failed = outcome.count(FitQuality::Failed),
            seconds = started.elapsed().as_secs_f64(),
            "tracking finished"
        );
        Ok(outcome)
    }

    fn process_unless_cancelled(
        &self,
        frame: &Frame,
        cancel: &AtomicBool,
    ) -> Option<(PupilRecord, FitQuality)> {
        if cancel.load(Ordering::Relaxed) {
            return None;
        }
        Some(self.process_frame(frame))
    }

    /// [`run`](Self::run), then write the raw series to `raw_path`.
    ///
    /// Nothing is written unless the whole source was processed.
    pub fn run_to_file(
        &self,
        source: &mut dyn FrameSource,
        options: &PipelineOptions,
        cancel: &AtomicBool,
        raw_path: &Path,
    ) -> Result<TrackOutcome, PipelineError> {
        let outcome = self.run(source, options, cancel)?;
        outcome.series.save(raw_path, SeriesFormat::Raw)?;
        tracing::info!(path = %raw_path.display(), "wrote raw pupil series");
        Ok(outcome)
    }
}

fn log_progress(done: usize, total: Option<usize>, record: &PupilRecord, started: Instant) {
    let elapsed = started.elapsed().as_secs_f64();
    let fps = if elapsed > 0.0 {
        done as f64 / elapsed
    } else {
        0.0
    };
    let percent = total
        .filter(|&t| t > 0)
        .map(|t| 100.0 * done as f64 / t as f64);
    tracing::info!(
        time = record.time,
        percent = ?percent,
        area = ?record.area,
        blink = record.blink,
        artifact = record.artifact_power,
        fps,
        "progress"
    );
}
