//! Evaluation hyper-parameters loaded from TOML.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::error::EvalError;

/// Feature frames per second assumed by every chunk offset.
pub const FRAME_RATE: usize = 25;
/// Value used to pad windows that run past the end of a feature sequence.
pub const PAD_VALUE: f32 = -100.0;
/// Default inference batch size.
pub const DEFAULT_BATCH_SIZE: usize = 128;
/// Default ranking cut-off.
pub const DEFAULT_TOP_K: usize = 10_000;

/// Errors raised while reading the evaluation config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to parse TOML.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A value is present but unusable.
    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// `chunk_frame` may be a single frame count or a list whose first entry is used.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ChunkFrames {
    One(usize),
    Many(Vec<usize>),
}

impl ChunkFrames {
    /// Frame count of the evaluation window (first entry for lists).
    pub fn first(&self) -> Option<usize> {
        match self {
            ChunkFrames::One(value) => Some(*value),
            ChunkFrames::Many(values) => values.first().copied(),
        }
    }
}

/// Settings that control one evaluation run.
#[derive(Debug, Clone, Deserialize)]
pub struct EvalConfig {
    /// Window length and stride in seconds.
    pub chunk_s: f64,
    /// Model input length in pooled frames.
    pub chunk_frame: ChunkFrames,
    /// Number of raw frames averaged into one model frame.
    #[serde(default = "default_mean_size")]
    pub mean_size: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Distance worker count; `None` uses every available core.
    #[serde(default)]
    pub workers: Option<usize>,
}

fn default_mean_size() -> usize {
    1
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

impl EvalConfig {
    /// Build a config with defaults for everything but the window geometry.
    pub fn new(chunk_s: f64, chunk_frame: usize, mean_size: usize) -> Self {
        Self {
            chunk_s,
            chunk_frame: ChunkFrames::One(chunk_frame),
            mean_size,
            batch_size: DEFAULT_BATCH_SIZE,
            top_k: DEFAULT_TOP_K,
            workers: None,
        }
    }

    /// Load and sanity-check a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text).map_err(|err| match err {
            ConfigError::ParseToml { source, .. } => ConfigError::ParseToml {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: EvalConfig = toml::from_str(text).map_err(|source| ConfigError::ParseToml {
            path: PathBuf::new(),
            source,
        })?;
        config.check_values()?;
        Ok(config)
    }

    fn check_values(&self) -> Result<(), ConfigError> {
        if !(self.chunk_s.is_finite() && self.chunk_s > 0.0) {
            return Err(ConfigError::Invalid {
                field: "chunk_s",
                reason: format!("must be a positive number of seconds, got {}", self.chunk_s),
            });
        }
        if self.chunk_frame.first().unwrap_or(0) == 0 {
            return Err(ConfigError::Invalid {
                field: "chunk_frame",
                reason: "must be a positive frame count".to_string(),
            });
        }
        if self.mean_size == 0 {
            return Err(ConfigError::Invalid {
                field: "mean_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Invalid {
                field: "workers",
                reason: "must be at least 1 when set".to_string(),
            });
        }
        Ok(())
    }

    /// Raw feature frames cut per chunk before mean pooling.
    pub fn infer_frames(&self) -> usize {
        self.chunk_frame.first().unwrap_or(0) * self.mean_size
    }

    /// Fail fast unless the window in frames matches `chunk_s` at [`FRAME_RATE`].
    pub fn validate(&self) -> Result<(), EvalError> {
        let infer_frames = self.infer_frames();
        let expected = self.chunk_s * FRAME_RATE as f64;
        if (infer_frames as f64 - expected).abs() > 1e-9 {
            return Err(EvalError::ChunkFrameMismatch {
                infer_frames,
                chunk_s: self.chunk_s,
                frame_rate: FRAME_RATE,
                expected,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list_chunk_frame_and_defaults() {
        let config = EvalConfig::from_toml_str("chunk_s = 20.0\nchunk_frame = [125, 250]\nmean_size = 4\n")
            .unwrap();
        assert_eq!(config.infer_frames(), 500);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.top_k, DEFAULT_TOP_K);
        assert!(config.workers.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn mismatched_window_is_rejected() {
        let config = EvalConfig::new(20.0, 100, 1);
        let err = config.validate().unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, EvalError::ChunkFrameMismatch { infer_frames: 100, .. }));
        assert!(message.contains("100"));
        assert!(message.contains("500"));
    }

    #[test]
    fn zero_mean_size_is_invalid() {
        let err = EvalConfig::from_toml_str("chunk_s = 1.0\nchunk_frame = 25\nmean_size = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "mean_size", .. }));
    }

    #[test]
    fn load_reports_path_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hp.toml");
        std::fs::write(&path, "chunk_s = \"oops\"").unwrap();
        let err = EvalConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("hp.toml"));
    }
}
