// src/error.rs
//! Error types shared by every pipeline stage.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("sequence has no frames")]
    EmptySequence,

    #[error("shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("invalid configuration value `{field}`: {reason}")]
    InvalidConfig { field: String, reason: String },

    /// Raised when the scaler is fitted before every sample carries a split.
    #[error("sample `{sample}` has no split; assign splits before fitting the scaler")]
    SplitNotAssigned { sample: String },

    /// Raised when a scaler is finalized without fitted statistics.
    #[error("no fitted scaler statistics; run fit_scaler on at least one eligible sample first")]
    ScalerNotFitted,

    #[error("unknown environment `{0}`")]
    UnknownEnvironment(String),

    #[error("unknown band `{0}`")]
    UnknownBand(String),

    #[error("pose detector failed: {0}")]
    Detector(String),

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
