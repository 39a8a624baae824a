//! Pupil time series and its text formats.
//!
//! One line per frame, comma separated:
//!
//! | column | field            | raw     | filtered |
//! |--------|------------------|---------|----------|
//! | 0      | time (s)         | `%.3f`  | `%.6f`   |
//! | 1      | pupil area (px²) | `%.1f`  | `%.6f`   |
//! | 2      | center x (px)    | `%.1f`  | `%.6f`   |
//! | 3      | center y (px)    | `%.1f`  | `%.6f`   |
//! | 4      | blink flag       | `0`/`1` | `%.6f`   |
//! | 5      | artifact power   | `%.3f`  | `%.6f`   |
//! | 6      | pseudo-glint x   | `%.3f`  | `%.6f`   |
//! | 7      | pseudo-glint y   | `%.3f`  | `%.6f`   |
//!
//! Raw lines keep a trailing comma. Absent values (no pupil) are written as
//! `nan`. The reader accepts both layouts.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Number of columns in a series line.
pub const SERIES_COLUMNS: usize = 8;

/// One frame's measurements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PupilRecord {
    /// Seconds since the first frame.
    pub time: f64,
    /// Pupil area; `None` on blink or failed fit.
    pub area: Option<f64>,
    /// Pupil center `[x, y]`; `None` on blink or failed fit.
    pub center: Option<[f64; 2]>,
    pub blink: bool,
    pub artifact_power: f64,
    /// Pseudo-glint `[x, y]`.
    pub glint: [f64; 2],
}

/// Text layout of a series file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeriesFormat {
    /// Per-frame tracker output.
    Raw,
    /// Temporally smoothed output.
    Filtered,
}

/// Series read/write failure.
#[derive(Debug)]
pub enum SeriesError {
    /// The series file does not exist.
    Missing(PathBuf),
    /// The series has no records.
    Empty,
    /// A line could not be parsed (1-based line number).
    Parse { line: usize, reason: String },
    /// Timestamps do not increase.
    NonPositiveInterval,
    Io(std::io::Error),
}

impl std::fmt::Display for SeriesError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Missing(p) => write!(f, "series file {} does not exist", p.display()),
            Self::Empty => write!(f, "series is empty"),
            Self::Parse { line, reason } => write!(f, "line {}: {}", line, reason),
            Self::NonPositiveInterval => write!(f, "sampling interval is not positive"),
            Self::Io(e) => write!(f, "series I/O error: {}", e),
        }
    }
}

impl std::error::Error for SeriesError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SeriesError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Ordered, append-only sequence of [`PupilRecord`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PupilSeries {
    records: Vec<PupilRecord>,
}

impl From<Vec<PupilRecord>> for PupilSeries {
    fn from(records: Vec<PupilRecord>) -> Self {
        Self { records }
    }
}

impl PupilSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: PupilRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[PupilRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PupilRecord> {
        self.records.iter()
    }

    /// Number of blink records.
    pub fn blink_count(&self) -> usize {
        self.records.iter().filter(|r| r.blink).count()
    }

    /// Write every record in `format`.
    pub fn write_to<W: Write>(&self, out: &mut W, format: SeriesFormat) -> std::io::Result<()> {
        for r in &self.records {
            writeln!(out, "{}", format_record(r, format))?;
        }
        Ok(())
    }

    /// Write to `path`, replacing any existing file.
    pub fn save(&self, path: &Path, format: SeriesFormat) -> Result<(), SeriesError> {
        let mut out = BufWriter::new(File::create(path)?);
        self.write_to(&mut out, format)?;
        out.flush()?;
        Ok(())
    }

    /// Parse a series from text. Blank lines are skipped.
    pub fn read_from<R: BufRead>(input: R) -> Result<Self, SeriesError> {
        let mut series = Self::new();
        for (i, line) in input.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            series.push(parse_record(&line).map_err(|reason| SeriesError::Parse {
                line: i + 1,
                reason,
            })?);
        }
        Ok(series)
    }

    /// Load a series file.
    pub fn load(path: &Path) -> Result<Self, SeriesError> {
        if !path.is_file() {
            return Err(SeriesError::Missing(path.to_path_buf()));
        }
        Self::read_from(BufReader::new(File::open(path)?))
    }
}

impl<'a> IntoIterator for &'a PupilSeries {
    type Item = &'a PupilRecord;
    type IntoIter = std::slice::Iter<'a, PupilRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// `<dir>/<stub>_pupils_raw.csv`
pub fn raw_series_path(dir: &Path, stub: &str) -> PathBuf {
    dir.join(format!("{}_pupils_raw.csv", stub))
}

/// `<dir>/<stub>_pupils_filt.csv`
pub fn filtered_series_path(dir: &Path, stub: &str) -> PathBuf {
    dir.join(format!("{}_pupils_filt.csv", stub))
}

fn fixed(v: Option<f64>, precision: usize) -> String {
    match v {
        Some(v) if v.is_finite() => format!("{:.*}", precision, v),
        _ => "nan".to_string(),
    }
}

fn format_record(r: &PupilRecord, format: SeriesFormat) -> String {
    let cx = r.center.map(|c| c[0]);
    let cy = r.center.map(|c| c[1]);
    match format {
        SeriesFormat::Raw => format!(
            "{},{},{},{},{},{},{},{},",
            fixed(Some(r.time), 3),
            fixed(r.area, 1),
            fixed(cx, 1),
            fixed(cy, 1),
            u8::from(r.blink),
            fixed(Some(r.artifact_power), 3),
            fixed(Some(r.glint[0]), 3),
            fixed(Some(r.glint[1]), 3),
        ),
        SeriesFormat::Filtered => [
            Some(r.time),
            r.area,
            cx,
            cy,
            Some(if r.blink { 1.0 } else { 0.0 }),
            Some(r.artifact_power),
            Some(r.glint[0]),
            Some(r.glint[1]),
        ]
        .iter()
        .map(|&v| fixed(v, 6))
        .collect::<Vec<_>>()
        .join(","),
    }
}

fn parse_record(line: &str) -> Result<PupilRecord, String> {
    let mut fields: Vec<&str> = line.split(',').map(str::trim).collect();
    // Trailing comma of the raw layout.
    if fields.len() == SERIES_COLUMNS + 1 && fields[SERIES_COLUMNS].is_empty() {
        fields.pop();
    }
    if fields.len() != SERIES_COLUMNS {
        return Err(format!(
            "expected {} fields, found {}",
            SERIES_COLUMNS,
            fields.len()
        ));
    }
    let mut v = [0.0f64; SERIES_COLUMNS];
    for (slot, field) in v.iter_mut().zip(&fields) {
        *slot = field
            .parse::<f64>()
            .map_err(|e| format!("bad number {:?}: {}", field, e))?;
    }

    let finite = |x: f64| x.is_finite().then_some(x);
    let center = match (finite(v[2]), finite(v[3])) {
        (Some(x), Some(y)) => Some([x, y]),
        _ => None,
    };
    Ok(PupilRecord {
        time: v[0],
        area: finite(v[1]),
        center,
        blink: v[4] >= 0.5,
        artifact_power: v[5],
        glint: [v[6], v[7]],
    })
}
