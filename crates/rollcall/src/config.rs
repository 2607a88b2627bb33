use rollcall_core::{MatchPolicy, DEFAULT_TOLERANCE, DETECTOR_MODEL_FILE, RECOGNIZER_MODEL_FILE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Application configuration: defaults, then an optional TOML file
/// (`ROLLCALL_CONFIG`), then `ROLLCALL_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    pub tolerance: f64,
    /// Which gallery entry wins when several are within tolerance.
    pub match_policy: MatchPolicy,
    /// Linear downscale applied to live frames before detection.
    pub downscale: u32,
    /// Pause between processed frames in the capture loop.
    pub frame_interval_ms: u64,
    /// Frames discarded after opening the camera for enrollment (AGC/AE settle).
    pub warmup_frames: usize,
    /// Where the latest annotated frame is written.
    pub snapshot_path: Option<PathBuf>,
    /// TrueType/OpenType font for box labels; boxes only when unset.
    pub font_path: Option<PathBuf>,
}

/// Shape of the optional TOML file. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    model_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    tolerance: Option<f64>,
    match_policy: Option<MatchPolicy>,
    downscale: Option<u32>,
    frame_interval_ms: Option<u64>,
    warmup_frames: Option<usize>,
    snapshot_path: Option<PathBuf>,
    font_path: Option<PathBuf>,
}

impl Config {
    /// Built-in defaults rooted at `data_dir`.
    pub fn defaults(data_dir: &Path) -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: data_dir.join("models"),
            db_path: data_dir.join("attendance.db"),
            tolerance: DEFAULT_TOLERANCE,
            match_policy: MatchPolicy::First,
            downscale: rollcall_core::extractor::DEFAULT_DOWNSCALE,
            frame_interval_ms: 10,
            warmup_frames: 4,
            snapshot_path: Some(data_dir.join("latest.png")),
            font_path: None,
        }
    }

    /// Load from the optional config file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::defaults(&default_data_dir());
        if let Ok(path) = std::env::var("ROLLCALL_CONFIG") {
            config.merge_file(Path::new(&path))?;
        }
        config.apply_env();
        Ok(config)
    }

    fn merge_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file = parse_file(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        self.merge(file);
        Ok(())
    }

    fn merge(&mut self, file: FileConfig) {
        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.tolerance {
            self.tolerance = checked_tolerance("tolerance", v, self.tolerance);
        }
        if let Some(v) = file.match_policy {
            self.match_policy = v;
        }
        if let Some(v) = file.downscale {
            self.downscale = v.max(1);
        }
        if let Some(v) = file.frame_interval_ms {
            self.frame_interval_ms = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
        if file.snapshot_path.is_some() {
            self.snapshot_path = file.snapshot_path;
        }
        if file.font_path.is_some() {
            self.font_path = file.font_path;
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Ok(v) = std::env::var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("ROLLCALL_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        let tolerance = env_parse("ROLLCALL_TOLERANCE", self.tolerance);
        self.tolerance = checked_tolerance("ROLLCALL_TOLERANCE", tolerance, self.tolerance);
        self.match_policy = env_parse("ROLLCALL_MATCH_POLICY", self.match_policy);
        self.downscale = env_parse("ROLLCALL_DOWNSCALE", self.downscale).max(1);
        self.frame_interval_ms = env_parse("ROLLCALL_FRAME_INTERVAL_MS", self.frame_interval_ms);
        self.warmup_frames = env_parse("ROLLCALL_WARMUP_FRAMES", self.warmup_frames);
        if let Ok(v) = std::env::var("ROLLCALL_SNAPSHOT_PATH") {
            // An empty value disables snapshots.
            self.snapshot_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
        if let Ok(v) = std::env::var("ROLLCALL_FONT_PATH") {
            self.font_path = (!v.is_empty()).then(|| PathBuf::from(v));
        }
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(DETECTOR_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the descriptor model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_dir
            .join(RECOGNIZER_MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn parse_file(text: &str) -> Result<FileConfig, toml::de::Error> {
    toml::from_str(text)
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn env_parse<T>(key: &str, current: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    parse_or_keep(key, std::env::var(key).ok().as_deref(), current)
}

/// Parse a set value, keeping `current` (with a warning) when it is malformed.
fn parse_or_keep<T>(key: &str, raw: Option<&str>, current: T) -> T
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = raw else {
        return current;
    };
    match raw.trim().parse() {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(key, value = raw, error = %e, "ignoring invalid config value");
            current
        }
    }
}

/// Tolerances must be finite and non-negative; NaN would never match.
fn checked_tolerance(key: &str, value: f64, current: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        tracing::warn!(key, value, "ignoring invalid tolerance");
        current
    }
}
