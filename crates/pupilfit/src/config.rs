//! Run configuration.
//!
//! A [`PupilometryConfig`] is built once per run (defaults, or a JSON file),
//! validated, and then shared by reference with every stage.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::conic::RansacConfig;
use crate::detector::DetectorConfig;
use crate::glint::GlintConfig;
use crate::segment::SegmentationConfig;

/// Video timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Frames per second; frame `i` is stamped `i / framerate`.
    pub framerate: f64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self { framerate: 30.0 }
    }
}

/// Complete set of run parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PupilometryConfig {
    pub segmentation: SegmentationConfig,
    pub glint: GlintConfig,
    pub ransac: RansacConfig,
    pub detector: DetectorConfig,
    pub video: VideoConfig,
}

/// Configuration loading/validation failure.
#[derive(Debug)]
pub enum ConfigError {
    /// A field is out of range.
    Invalid {
        field: &'static str,
        reason: String,
    },
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid { field, reason } => write!(f, "invalid config `{}`: {}", field, reason),
            Self::Io(e) => write!(f, "cannot read config: {}", e),
            Self::Parse(e) => write!(f, "cannot parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Invalid { .. } => None,
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn check_percent(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if (0.0..=100.0).contains(&v) {
        Ok(())
    } else {
        Err(invalid(field, format!("{} is outside [0, 100]", v)))
    }
}

impl PupilometryConfig {
    /// Load from a JSON file and validate. Missing fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let seg = &self.segmentation;
        check_percent("segmentation.percent_min", seg.percent_min)?;
        check_percent("segmentation.percent_max", seg.percent_max)?;
        if seg.percent_min >= seg.percent_max {
            return Err(invalid(
                "segmentation.percent_min",
                format!(
                    "must be below percent_max ({} >= {})",
                    seg.percent_min, seg.percent_max
                ),
            ));
        }
        if seg.kmeans_clusters < 2 {
            return Err(invalid("segmentation.kmeans_clusters", "need at least 2 clusters"));
        }

        check_percent("glint.percentile", self.glint.percentile)?;
        if self.glint.kernel_size % 2 == 0 {
            return Err(invalid("glint.kernel_size", "must be odd"));
        }

        let r = &self.ransac;
        if r.max_iterations == 0 {
            return Err(invalid("ransac.max_iterations", "must be at least 1"));
        }
        check_percent("ransac.max_inlier_percent", r.max_inlier_percent)?;
        check_percent("ransac.min_inlier_percent", r.min_inlier_percent)?;
        check_percent("ransac.confident_inlier_percent", r.confident_inlier_percent)?;
        if r.min_inlier_percent > r.confident_inlier_percent {
            return Err(invalid(
                "ransac.min_inlier_percent",
                "must not exceed confident_inlier_percent",
            ));
        }
        if !(r.inlier_threshold_px > 0.0) {
            return Err(invalid("ransac.inlier_threshold_px", "must be positive"));
        }

        if !(self.detector.scale_factor > 1.0) {
            return Err(invalid("detector.scale_factor", "must exceed 1"));
        }
        let blob = &self.detector.dark_blob;
        if !(blob.blur_sigma >= 0.0) {
            return Err(invalid("detector.dark_blob.blur_sigma", "must be non-negative"));
        }
        if !(0.0..=1.0).contains(&blob.max_area_fraction) {
            return Err(invalid("detector.dark_blob.max_area_fraction", "outside [0, 1]"));
        }

        if !(self.video.framerate > 0.0 && self.video.framerate.is_finite()) {
            return Err(invalid("video.framerate", "must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segment::SegmentationMethod;

    #[test]
    fn defaults_are_valid() {
        let cfg = PupilometryConfig::default();
        cfg.validate().expect("defaults validate");
        assert_eq!(cfg.segmentation.method, SegmentationMethod::Otsu);
        assert_eq!(cfg.ransac.max_refinements, 3);
        assert_eq!(cfg.detector.min_neighbors, 40);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{ "segmentation": { "method": "kmeans", "percent_max": 60 },
                        "ransac": { "max_iterations": 7 } }"#;
        let cfg: PupilometryConfig = serde_json::from_str(json).expect("parse");
        assert_eq!(cfg.segmentation.method, SegmentationMethod::KMeans);
        assert_eq!(cfg.segmentation.percent_max, 60.0);
        assert_eq!(cfg.segmentation.percent_min, 5.0);
        assert_eq!(cfg.ransac.max_iterations, 7);
        assert_eq!(cfg.video.framerate, 30.0);
        cfg.validate().expect("valid");
    }

    #[test]
    fn out_of_range_fields_are_named() {
        let mut cfg = PupilometryConfig::default();
        cfg.segmentation.percent_min = 70.0;
        match cfg.validate() {
            Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "segmentation.percent_min"),
            other => panic!("unexpected {:?}", other),
        }

        let mut cfg = PupilometryConfig::default();
        cfg.glint.kernel_size = 4;
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid { field: "glint.kernel_size", .. })
        ));

        let mut cfg = PupilometryConfig::default();
        cfg.video.framerate = 0.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_method_is_a_parse_error() {
        let json = r#"{ "segmentation": { "method": "watershed" } }"#;
        assert!(serde_json::from_str::<PupilometryConfig>(json).is_err());
    }

    #[test]
    fn json_file_roundtrip() {
        let dir = std::env::temp_dir().join(format!("pupilfit-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("tmp dir");
        let path = dir.join("config.json");
        let mut cfg = PupilometryConfig::default();
        cfg.ransac.seed = 7;
        std::fs::write(&path, serde_json::to_string_pretty(&cfg).expect("json")).expect("write");
        let back = PupilometryConfig::from_json_file(&path).expect("load");
        assert_eq!(back.ransac.seed, 7);
        assert!(matches!(
            PupilometryConfig::from_json_file(&dir.join("missing.json")),
            Err(ConfigError::Io(_))
        ));
        std::fs::remove_dir_all(&dir).ok();
    }
}
