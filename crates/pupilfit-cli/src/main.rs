//! Command-line pupil tracking and series smoothing.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use pupilfit::{
    filter_series_file, filtered_series_path, raw_series_path, DarkBlobDetector,
    EdgeArtifactEstimator, FitQuality, FrameReport, FrameRotation, FrameSource,
    ImageSequenceSource, PipelineOptions, PupilometryConfig, PupilometryEngine,
    SegmentationMethod, Tracker,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "pupilfit")]
#[command(about = "Track the pupil ellipse through eye-video frames and smooth the resulting series")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track pupils across a directory of frames, then filter the series.
    Track(CliTrackArgs),

    /// Temporally filter an existing raw pupil series.
    Filter(CliFilterArgs),

    /// Fit the pupil in a single image and print a JSON report.
    FitImage(CliFitImageArgs),

    /// Print the default configuration as JSON.
    DefaultConfig,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MethodArg {
    Otsu,
    Kmeans,
}

impl MethodArg {
    fn to_core(self) -> SegmentationMethod {
        match self {
            Self::Otsu => SegmentationMethod::Otsu,
            Self::Kmeans => SegmentationMethod::KMeans,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RotateArg {
    #[value(name = "0")]
    None,
    #[value(name = "90")]
    Cw90,
    #[value(name = "180")]
    Cw180,
    #[value(name = "270")]
    Cw270,
}

impl RotateArg {
    fn to_core(self) -> FrameRotation {
        match self {
            Self::None => FrameRotation::None,
            Self::Cw90 => FrameRotation::Cw90,
            Self::Cw180 => FrameRotation::Cw180,
            Self::Cw270 => FrameRotation::Cw270,
        }
    }
}

/// Options shared by commands that run the per-frame engine.
#[derive(Debug, Clone, Args)]
struct CliEngineArgs {
    /// JSON configuration file (missing fields take defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the segmentation method.
    #[arg(long, value_enum)]
    method: Option<MethodArg>,

    /// Override the video frame rate (frames per second).
    #[arg(long)]
    framerate: Option<f64>,

    /// Pixels trimmed from every side of each frame.
    #[arg(long, default_value = "0")]
    border: u32,

    /// Clockwise rotation (degrees) applied after trimming.
    #[arg(long, value_enum, default_value = "0")]
    rotate: RotateArg,
}

impl CliEngineArgs {
    fn open_source(&self, source: ImageSequenceSource) -> ImageSequenceSource {
        source
            .with_border(self.border)
            .with_rotation(self.rotate.to_core())
    }

    fn load_config(&self) -> CliResult<PupilometryConfig> {
        let mut config = match &self.config {
            Some(path) => {
                tracing::info!("Loading config: {}", path.display());
                PupilometryConfig::from_json_file(path)?
            }
            None => PupilometryConfig::default(),
        };
        if let Some(method) = self.method {
            config.segmentation.method = method.to_core();
        }
        if let Some(fps) = self.framerate {
            config.video.framerate = fps;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Args)]
struct CliTrackArgs {
    /// Directory of frame images (png/jpg/bmp/tif), processed in name order.
    #[arg(long)]
    frames: PathBuf,

    /// Results directory for the series files.
    #[arg(long)]
    out_dir: PathBuf,

    /// Output file stub (defaults to the frames directory name).
    #[arg(long)]
    stub: Option<String>,

    #[command(flatten)]
    engine: CliEngineArgs,

    /// Worker threads (0 = one per core, 1 = sequential).
    #[arg(long, default_value = "0")]
    workers: usize,

    /// Frames read per parallel batch.
    #[arg(long, default_value = "64")]
    batch_size: usize,

    /// Re-run tracking even if the raw series already exists.
    #[arg(long)]
    overwrite: bool,

    /// Skip temporal filtering.
    #[arg(long)]
    no_filter: bool,
}

#[derive(Debug, Clone, Args)]
struct CliFilterArgs {
    /// Raw series file.
    #[arg(long)]
    raw: PathBuf,

    /// Filtered series file (defaults to `<stub>_pupils_filt.csv` next to the raw file).
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CliFitImageArgs {
    /// Input image.
    #[arg(long)]
    image: PathBuf,

    #[command(flatten)]
    engine: CliEngineArgs,

    /// Write the JSON report here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Track(args) => run_track(&args),
        Commands::Filter(args) => run_filter(&args),
        Commands::FitImage(args) => run_fit_image(&args),
        Commands::DefaultConfig => run_default_config(),
    }
}

// ── default-config ─────────────────────────────────────────────────────

fn run_default_config() -> CliResult<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&PupilometryConfig::default())?
    );
    Ok(())
}

// ── track ──────────────────────────────────────────────────────────────

fn run_track(args: &CliTrackArgs) -> CliResult<()> {
    let config = args.engine.load_config()?;
    let stub = match &args.stub {
        Some(s) => s.clone(),
        None => frames_stub(&args.frames)?,
    };
    std::fs::create_dir_all(&args.out_dir)?;
    let raw_path = raw_series_path(&args.out_dir, &stub);

    if raw_path.exists() && !args.overwrite {
        tracing::info!(
            "Raw series {} exists; skipping tracking (use --overwrite to redo)",
            raw_path.display()
        );
    } else {
        let mut source = args
            .engine
            .open_source(ImageSequenceSource::from_dir(&args.frames)?);
        let detector = DarkBlobDetector::new(config.detector.dark_blob.clone());
        let engine = PupilometryEngine::new(config);
        let tracker = Tracker {
            engine: &engine,
            detector: &detector,
            estimator: &EdgeArtifactEstimator,
        };
        let options = PipelineOptions {
            workers: args.workers,
            batch_size: args.batch_size,
        };
        let cancel = AtomicBool::new(false);
        let outcome = tracker.run_to_file(&mut source, &options, &cancel, &raw_path)?;
        tracing::info!(
            "Tracked {} frames: {} good, {} low confidence, {} failed, {} blinks",
            outcome.series.len(),
            outcome.count(FitQuality::Good),
            outcome.count(FitQuality::LowConfidence),
            outcome.count(FitQuality::Failed),
            outcome.series.blink_count(),
        );
    }

    if !args.no_filter {
        filter_or_warn(&raw_path, &filtered_series_path(&args.out_dir, &stub));
    }
    Ok(())
}

fn frames_stub(frames: &Path) -> CliResult<String> {
    let dir = if frames.as_os_str().is_empty() || frames == Path::new(".") {
        std::env::current_dir()?
    } else {
        frames.to_path_buf()
    };
    dir.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_owned)
        .ok_or_else(|| -> CliError {
            format!("cannot derive a stub from {}; pass --stub", frames.display()).into()
        })
}

/// Filtering problems never fail the run.
fn filter_or_warn(raw: &Path, filtered: &Path) {
    if let Err(e) = filter_series_file(raw, filtered) {
        tracing::warn!("Temporal filtering skipped: {}", e);
    }
}

// ── filter ─────────────────────────────────────────────────────────────

fn run_filter(args: &CliFilterArgs) -> CliResult<()> {
    let out = match &args.out {
        Some(p) => p.clone(),
        None => default_filtered_path(&args.raw),
    };
    let series = filter_series_file(&args.raw, &out)?;
    tracing::info!("Filtered {} records into {}", series.len(), out.display());
    Ok(())
}

fn default_filtered_path(raw: &Path) -> PathBuf {
    let name = raw
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("pupils_raw.csv");
    let filtered = match name.strip_suffix("_pupils_raw.csv") {
        Some(stub) => format!("{}_pupils_filt.csv", stub),
        None => format!("{}.filt.csv", name.trim_end_matches(".csv")),
    };
    raw.with_file_name(filtered)
}

// ── fit-image ──────────────────────────────────────────────────────────

fn run_fit_image(args: &CliFitImageArgs) -> CliResult<()> {
    let config = args.engine.load_config()?;
    tracing::info!("Loading image: {}", args.image.display());
    let mut source = args
        .engine
        .open_source(ImageSequenceSource::from_paths(vec![args.image.clone()]));
    let frame = source
        .next_frame()?
        .ok_or_else(|| -> CliError { format!("no frame in {}", args.image.display()).into() })?;

    let detector = DarkBlobDetector::new(config.detector.dark_blob.clone());
    let engine = PupilometryEngine::new(config);
    let obs = engine.detect_and_process(&frame.image, &detector);
    let report = FrameReport::from(&obs);
    tracing::info!("Quality: {}", report.quality);

    let json = serde_json::to_string_pretty(&report)?;
    match &args.out {
        Some(path) => {
            std::fs::write(path, &json)?;
            tracing::info!("Report written to {}", path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}
