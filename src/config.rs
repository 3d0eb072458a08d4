// src/config.rs
//! Pipeline configuration.
//!
//! One `PipelineConfig` value is handed to every component at construction, so
//! independent pipelines can run side by side with different settings.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frame rate of the video timeline the window detector works on.
    pub target_fps: f32,
    /// Fixed frame count fed to the classifier.
    pub n_frames: usize,
    pub thresholds: Thresholds,
    pub smoothing: SmoothingConfig,
    pub normalize: NormalizeConfig,
    pub window: WindowConfig,
    pub phase: PhaseConfig,
    pub features: FeaturesConfig,
    pub augmentation: AugmentationConfig,
    pub dataset: DatasetConfig,
    pub metrics: MetricsConfig,
    pub output: OutputLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// A joint is observed when its visibility reaches this value.
    pub pose_visibility: f32,
    pub valid_ratio: f32,
    pub mean_visibility: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothingConfig {
    pub max_window: usize,
    pub poly_order: usize,
    /// Taps of the moving-average fallback.
    pub fallback_taps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    /// Hip/shoulder widths below this are treated as degenerate.
    pub min_scale: f32,
}

/// Swing window heuristics. These are calibration knobs, not physical constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub padding_margin_frames: usize,
    /// Fraction of peak wrist speed that ends the swing.
    pub wrist_low_ratio: f32,
    /// Fraction of peak torso angular speed that ends the swing.
    pub torso_low_ratio: f32,
    pub min_post_peak_secs: f32,
    pub fallback_pre_peak_secs: f32,
    pub fallback_post_peak_secs: f32,
    pub fallback_confidence: f32,
    /// Windows shorter than this are discarded in favour of the whole clip.
    pub min_window_frames: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// How far above the shoulders the wrists must be to reach the top.
    pub top_margin: f32,
    /// Drop from the highest wrist point that starts the downswing.
    pub downswing_margin: f32,
    pub finish_margin: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    /// Lower bound on the product of limb lengths in the angle denominator.
    pub angle_epsilon: f32,
    /// Variance floor applied when finalizing scaler statistics.
    pub variance_floor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentationConfig {
    pub dropout_prob: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    pub environments: Vec<String>,
    /// Band name to class id.
    pub bands: BTreeMap<String, i64>,
    pub train_ratio: f64,
    pub val_ratio: f64,
    pub split_seed: u64,
    /// Samples with a larger share of interpolated joints stay out of the scaler fit.
    pub interpolation_threshold: f32,
    pub exclude_low_quality: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub hip_width_metres: f32,
    pub speed_percentile: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub sequence_subdir: String,
    pub mask_subdir: String,
    pub metadata_subdir: String,
    pub feature_subdir: String,
    pub split_subdir: String,
    pub scaler_filename: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            target_fps: 30.0,
            n_frames: 100,
            thresholds: Thresholds::default(),
            smoothing: SmoothingConfig::default(),
            normalize: NormalizeConfig::default(),
            window: WindowConfig::default(),
            phase: PhaseConfig::default(),
            features: FeaturesConfig::default(),
            augmentation: AugmentationConfig::default(),
            dataset: DatasetConfig::default(),
            metrics: MetricsConfig::default(),
            output: OutputLayout::default(),
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            pose_visibility: 0.5,
            valid_ratio: 0.85,
            mean_visibility: 0.6,
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            max_window: 11,
            poly_order: 3,
            fallback_taps: 5,
        }
    }
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self { min_scale: 1e-4 }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            padding_margin_frames: 5,
            wrist_low_ratio: 0.1,
            torso_low_ratio: 0.25,
            min_post_peak_secs: 0.5,
            fallback_pre_peak_secs: 0.5,
            fallback_post_peak_secs: 0.8,
            fallback_confidence: 0.1,
            min_window_frames: 10,
        }
    }
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            top_margin: 0.2,
            downswing_margin: 0.05,
            finish_margin: 0.1,
        }
    }
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            angle_epsilon: 1e-6,
            variance_floor: 1e-8,
        }
    }
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            dropout_prob: 0.05,
            seed: 42,
        }
    }
}

impl Default for DatasetConfig {
    fn default() -> Self {
        let bands = [("1_2", 0), ("2_4", 1), ("4_6", 2), ("6_8", 3), ("8_10", 4)]
            .into_iter()
            .map(|(name, id)| (name.to_string(), id))
            .collect();
        Self {
            environments: vec!["indoor".to_string(), "outdoor".to_string()],
            bands,
            train_ratio: 0.7,
            val_ratio: 0.15,
            split_seed: 42,
            interpolation_threshold: 0.3,
            exclude_low_quality: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            hip_width_metres: 0.35,
            speed_percentile: 95.0,
        }
    }
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            root: directories::UserDirs::new()
                .and_then(|dirs| dirs.document_dir().map(|p| p.join("SwingKinematics")))
                .unwrap_or_else(|| PathBuf::from("./processed_videos")),
            sequence_subdir: "sequences".to_string(),
            mask_subdir: "interp_masks".to_string(),
            metadata_subdir: "metadata".to_string(),
            feature_subdir: "features".to_string(),
            split_subdir: "splits".to_string(),
            scaler_filename: "feature_scaler.json".to_string(),
        }
    }
}

impl OutputLayout {
    pub fn sequence_dir(&self) -> PathBuf {
        self.root.join(&self.sequence_subdir)
    }

    pub fn mask_dir(&self) -> PathBuf {
        self.root.join(&self.mask_subdir)
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(&self.metadata_subdir)
    }

    pub fn split_dir(&self) -> PathBuf {
        self.root.join(&self.split_subdir)
    }

    pub fn scaler_path(&self) -> PathBuf {
        self.root.join(&self.feature_subdir).join(&self.scaler_filename)
    }
}

impl PipelineConfig {
    /// Load a configuration from a JSON file. Missing fields keep their defaults.
    pub fn from_json(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let config: PipelineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.target_fps > 0.0) {
            return Err(PipelineError::invalid_config("target_fps", "must be > 0"));
        }
        if self.n_frames < 2 {
            return Err(PipelineError::invalid_config("n_frames", "must be >= 2"));
        }
        if !(0.0..=1.0).contains(&self.thresholds.pose_visibility) {
            return Err(PipelineError::invalid_config(
                "thresholds.pose_visibility",
                "must lie in [0, 1]",
            ));
        }
        if self.smoothing.fallback_taps == 0 {
            return Err(PipelineError::invalid_config(
                "smoothing.fallback_taps",
                "must be > 0",
            ));
        }
        if !(self.features.variance_floor > 0.0) {
            return Err(PipelineError::invalid_config(
                "features.variance_floor",
                "must be > 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.augmentation.dropout_prob) {
            return Err(PipelineError::invalid_config(
                "augmentation.dropout_prob",
                "must lie in [0, 1]",
            ));
        }
        let split_total = self.dataset.train_ratio + self.dataset.val_ratio;
        if self.dataset.train_ratio < 0.0 || self.dataset.val_ratio < 0.0 || split_total > 1.0 {
            return Err(PipelineError::invalid_config(
                "dataset.train_ratio",
                "train and val ratios must be non-negative and sum to at most 1",
            ));
        }
        if !(0.0..=100.0).contains(&self.metrics.speed_percentile) {
            return Err(PipelineError::invalid_config(
                "metrics.speed_percentile",
                "must lie in [0, 100]",
            ));
        }
        Ok(())
    }
}
