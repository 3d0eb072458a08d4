// src/pipeline.rs
//! End-to-end swing analysis: window detection, preparation, features.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::{FeatureEngineer, SampleFeatures, CH_ANGLE, GLOBAL_WRIST_SPEED};
use crate::joints::LEFT_ELBOW;
use crate::normalize::SpatialNormalizer;
use crate::phase::{PhaseDetector, SwingPhase};
use crate::quality::QualityMetrics;
use crate::repair::SequenceRepair;
use crate::resample::TemporalResampler;
use crate::scaler::FeatureScaler;
use crate::sequence::{frame_validity, PoseSequence, SwingWindow};
use crate::window::SwingWindowDetector;
use ndarray::s;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

/// Output of the full preparation path.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedSequence {
    pub sequence: PoseSequence,
    pub quality: QualityMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingMetrics {
    /// Approximate peak wrist speed in m/s.
    pub swing_speed: f32,
    /// Largest lead elbow angle in degrees.
    pub arm_angle: f32,
}

#[derive(Debug, Clone)]
pub struct SwingAnalysis {
    pub window: SwingWindow,
    /// True when the window was too short and the whole clip was used.
    pub used_full_clip: bool,
    pub prepared: PreparedSequence,
    pub features: SampleFeatures,
    pub scaled: bool,
    pub metrics: SwingMetrics,
    /// Phase per frame of the raw clip.
    pub phases: Vec<SwingPhase>,
}

pub struct SwingPipeline {
    config: PipelineConfig,
    repair: SequenceRepair,
    normalizer: SpatialNormalizer,
    resampler: TemporalResampler,
    window_detector: SwingWindowDetector,
    feature_engineer: FeatureEngineer,
    scaler: Option<FeatureScaler>,
}

impl SwingPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            repair: SequenceRepair::new(&config),
            normalizer: SpatialNormalizer::new(&config),
            resampler: TemporalResampler::new(config.n_frames),
            window_detector: SwingWindowDetector::new(&config),
            feature_engineer: FeatureEngineer::new(&config),
            scaler: None,
            config,
        })
    }

    /// Standardize features with a fitted scaler in `analyze`.
    pub fn with_scaler(mut self, scaler: FeatureScaler) -> Self {
        self.scaler = Some(scaler);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn feature_engineer(&self) -> &FeatureEngineer {
        &self.feature_engineer
    }

    /// Interpolate and smooth only. Frame indices stay on the video timeline.
    pub fn prepare_for_window_detection(&self, raw: &PoseSequence) -> PoseSequence {
        let mut repaired = self.repair.repair(raw);
        repaired.valid_mask = frame_validity(&repaired.data, self.config.thresholds.pose_visibility);
        repaired
    }

    pub fn detect_window(&self, raw: &PoseSequence) -> SwingWindow {
        let minimal = self.prepare_for_window_detection(raw);
        self.window_detector.detect(&minimal)
    }

    /// Frames of `raw` inside the window, or the whole clip when the window
    /// is shorter than `min_window_frames`.
    pub fn slice_to_window(&self, raw: &PoseSequence, window: &SwingWindow) -> (PoseSequence, bool) {
        if window.num_frames() < self.config.window.min_window_frames {
            warn!(
                frames = window.num_frames(),
                min = self.config.window.min_window_frames,
                "swing window too short, using the whole clip"
            );
            return (raw.clone(), true);
        }
        (raw.slice(window.start_frame, window.end_frame), false)
    }

    /// Interpolate, smooth, normalize, resample to `n_frames`, then score quality.
    pub fn prepare_sequence(&self, sequence: &PoseSequence) -> Result<PreparedSequence> {
        if sequence.is_empty() {
            return Err(PipelineError::EmptySequence);
        }
        let repaired = self.repair.repair(sequence);
        let normalized = self.normalizer.normalize(&repaired);
        let mut resampled = self.resampler.resample(&normalized)?;
        resampled.valid_mask =
            frame_validity(&resampled.data, self.config.thresholds.pose_visibility);

        let quality = QualityMetrics::compute(&resampled.data, &self.config.thresholds);
        debug!(
            frames = resampled.num_frames(),
            interp_ratio = resampled.interpolation_ratio(),
            low_quality = quality.low_quality,
            "prepared sequence"
        );
        Ok(PreparedSequence {
            sequence: resampled,
            quality,
        })
    }

    pub fn compute_features(&self, prepared: &PreparedSequence) -> SampleFeatures {
        self.feature_engineer.compute_features(&prepared.sequence)
    }

    /// Speed and arm angle on the repaired, normalized clip at its native
    /// frame rate (no resampling, which would distort speeds).
    pub fn swing_metrics(&self, sliced: &PoseSequence) -> SwingMetrics {
        let normalized = self.normalizer.normalize(&self.repair.repair(sliced));
        let features = self.feature_engineer.compute_features(&normalized);

        let wrist_speeds: Vec<f32> = features.global.column(GLOBAL_WRIST_SPEED).to_vec();
        let speed = percentile(&wrist_speeds, self.config.metrics.speed_percentile);
        let arm_angle = features
            .joint
            .slice(s![.., LEFT_ELBOW, CH_ANGLE])
            .fold(0.0f32, |acc, &v| acc.max(v));

        SwingMetrics {
            swing_speed: speed * self.config.metrics.hip_width_metres,
            arm_angle,
        }
    }

    #[instrument(skip(self, raw), fields(frames = raw.num_frames()))]
    pub fn analyze(&self, raw: &PoseSequence) -> Result<SwingAnalysis> {
        if raw.is_empty() {
            return Err(PipelineError::EmptySequence);
        }

        let window = self.detect_window(raw);
        let (sliced, used_full_clip) = self.slice_to_window(raw, &window);
        let prepared = self.prepare_sequence(&sliced)?;
        let mut features = self.compute_features(&prepared);
        let scaled = match &self.scaler {
            Some(scaler) => {
                features = scaler.apply(&features)?;
                true
            }
            None => false,
        };
        let metrics = self.swing_metrics(&sliced);
        let phases = PhaseDetector::new(&self.config).run(raw);

        info!(
            start = window.start_frame,
            end = window.end_frame,
            method = window.method.as_str(),
            swing_speed = metrics.swing_speed,
            arm_angle = metrics.arm_angle,
            low_quality = prepared.quality.low_quality,
            "swing analysed"
        );
        Ok(SwingAnalysis {
            window,
            used_full_clip,
            prepared,
            features,
            scaled,
            metrics,
            phases,
        })
    }
}

/// Linear-interpolated percentile, `pct` in `[0, 100]`. Empty input gives 0.
pub fn percentile(values: &[f32], pct: f32) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct.clamp(0.0, 100.0) / 100.0) as f64 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joints::{NUM_CHANNELS, NUM_JOINTS, VISIBILITY};
    use crate::sequence::WindowMethod;
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array3};

    fn pipeline() -> SwingPipeline {
        SwingPipeline::new(PipelineConfig::default()).unwrap()
    }

    fn standing(t_len: usize) -> PoseSequence {
        let mut data = Array3::zeros((t_len, NUM_JOINTS, NUM_CHANNELS));
        for t in 0..t_len {
            for j in 0..NUM_JOINTS {
                data[[t, j, 0]] = 0.5;
                data[[t, j, 1]] = 0.5;
                data[[t, j, VISIBILITY]] = 0.9;
            }
            data[[t, 23, 0]] = 0.45;
            data[[t, 24, 0]] = 0.55;
            data[[t, 23, 1]] = 0.6;
            data[[t, 24, 1]] = 0.6;
            data[[t, 11, 0]] = 0.43;
            data[[t, 12, 0]] = 0.57;
            data[[t, 11, 1]] = 0.35;
            data[[t, 12, 1]] = 0.35;
        }
        PoseSequence::from_raw(data, 30.0, Array1::from_elem(t_len, true)).unwrap()
    }

    #[test]
    fn test_percentile_matches_linear_rule() {
        let values: Vec<f32> = (1..=5).map(|v| v as f32).collect();
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_relative_eq!(percentile(&values, 95.0), 4.8, epsilon = 1e-5);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn test_short_window_uses_whole_clip() {
        let raw = standing(40);
        let window = SwingWindow {
            start_frame: 10,
            end_frame: 15,
            confidence: 0.5,
            method: WindowMethod::WristVelocity,
        };
        let (sliced, full) = pipeline().slice_to_window(&raw, &window);
        assert!(full);
        assert_eq!(sliced.num_frames(), 40);

        let window = SwingWindow { end_frame: 30, ..window };
        let (sliced, full) = pipeline().slice_to_window(&raw, &window);
        assert!(!full);
        assert_eq!(sliced.num_frames(), 20);
    }

    #[test]
    fn test_window_path_keeps_video_coordinates() {
        let mut raw = standing(20);
        raw.data[[5, 15, VISIBILITY]] = 0.0;
        let minimal = pipeline().prepare_for_window_detection(&raw);
        assert_eq!(minimal.num_frames(), 20);
        assert!(minimal.interpolation_mask[[5, 15]]);
        assert_relative_eq!(minimal.data[[3, 23, 0]], 0.45, epsilon = 1e-4);
    }

    #[test]
    fn test_prepare_sequence_shapes() {
        let prepared = pipeline().prepare_sequence(&standing(57)).unwrap();
        assert_eq!(prepared.sequence.num_frames(), 100);
        assert_eq!(prepared.sequence.interpolation_mask.shape(), &[100, NUM_JOINTS]);
        assert!(!prepared.quality.low_quality);
        assert_relative_eq!(prepared.sequence.data[[50, 24, 0]], 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_metrics_on_still_clip() {
        let metrics = pipeline().swing_metrics(&standing(30));
        assert_relative_eq!(metrics.swing_speed, 0.0, epsilon = 1e-4);
        assert!(metrics.arm_angle >= 0.0 && metrics.arm_angle <= 180.0);
    }

    #[test]
    fn test_analyze_rejects_empty_clip() {
        assert!(matches!(
            pipeline().analyze(&standing(0)),
            Err(PipelineError::EmptySequence)
        ));
    }

    #[test]
    fn test_scaler_is_applied() {
        let scaler = FeatureScaler {
            joint_mean: vec![0.0; 13],
            joint_std: vec![2.0; 13],
            global_mean: vec![0.0; 3],
            global_std: vec![1.0; 3],
        };
        let plain = pipeline().analyze(&standing(45)).unwrap();
        let scaled = pipeline().with_scaler(scaler).analyze(&standing(45)).unwrap();
        assert!(scaled.scaled && !plain.scaled);
        assert_relative_eq!(
            scaled.features.joint[[10, 24, 0]],
            plain.features.joint[[10, 24, 0]] / 2.0,
            epsilon = 1e-6
        );
    }
}
