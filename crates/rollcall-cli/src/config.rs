use rollcall_core::{RecognizerConfig, VerificationConfig, DEFAULT_ACCEPTANCE_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Path of an optional TOML file layered over the defaults.
pub const CONFIG_FILE_ENV: &str = "ROLLCALL_CONFIG";

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
    #[error("unknown recognizer {0:?} (expected \"sface\" or \"arcface\")")]
    UnknownRecognizer(String),
}

/// CLI configuration: defaults, then the `ROLLCALL_CONFIG` TOML file, then
/// `ROLLCALL_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the JSON roster file.
    pub roster_path: PathBuf,
    /// Euclidean distance below which a face is accepted.
    pub acceptance_threshold: f32,
    /// Milliseconds between verification samples.
    pub sample_interval_ms: u64,
    /// Give up verification after this many unrecognized faces.
    pub max_failed_attempts: Option<u32>,
    /// Recognition model profile: "sface" or "arcface".
    pub recognizer: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: data_dir.join("models"),
            roster_path: data_dir.join("roster.json"),
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            sample_interval_ms: 2000,
            max_failed_attempts: None,
            recognizer: "sface".to_string(),
        }
    }
}

impl Config {
    /// Load all layers from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Load all layers, reading variables through `var`.
    pub fn load_with(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = match var(CONFIG_FILE_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(var);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from `ROLLCALL_*` variables. Unparsable values are
    /// ignored with a warning.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = var("ROLLCALL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = var("ROLLCALL_ROSTER_PATH") {
            self.roster_path = PathBuf::from(v);
        }
        if let Some(v) = parse_var(&var, "ROLLCALL_ACCEPTANCE_THRESHOLD") {
            self.acceptance_threshold = v;
        }
        if let Some(v) = parse_var(&var, "ROLLCALL_SAMPLE_INTERVAL_MS") {
            self.sample_interval_ms = v;
        }
        if let Some(v) = var("ROLLCALL_MAX_FAILED_ATTEMPTS") {
            // "0" or empty lifts the limit.
            self.max_failed_attempts = match v.trim() {
                "" | "0" => None,
                s => match s.parse() {
                    Ok(n) => Some(n),
                    Err(_) => {
                        tracing::warn!(key = "ROLLCALL_MAX_FAILED_ATTEMPTS", value = %v, "ignoring unparsable value");
                        self.max_failed_attempts
                    }
                },
            };
        }
        if let Some(v) = var("ROLLCALL_RECOGNIZER") {
            self.recognizer = v;
        }
    }

    pub fn recognizer_config(&self) -> Result<RecognizerConfig, ConfigError> {
        RecognizerConfig::by_name(&self.recognizer)
            .ok_or_else(|| ConfigError::UnknownRecognizer(self.recognizer.clone()))
    }

    pub fn verification_config(&self) -> VerificationConfig {
        VerificationConfig {
            sample_interval: Duration::from_millis(self.sample_interval_ms.max(1)),
            max_failed_attempts: self.max_failed_attempts,
        }
    }
}

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

fn parse_var<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable value");
            None
        }
    }
}
