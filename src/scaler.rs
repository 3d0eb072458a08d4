// src/scaler.rs
//! Single-pass feature statistics and the persisted feature scaler.

use crate::error::{PipelineError, Result};
use crate::features::{
    SampleFeatures, GLOBAL_FEATURE_DIM, GLOBAL_HIP_SHOULDER_SEP, GLOBAL_WRIST_SPEED,
    GLOBAL_X_FACTOR, JOINT_FEATURE_DIM,
};
use crate::joints::{NUM_JOINTS, TORSO_JOINTS, WRISTS};
use ndarray::{s, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Welford accumulator over `dim` features.
///
/// Counts are kept per dimension so a row can contribute to some features
/// and not others. Create one per fit pass (or per worker, then `merge`) and
/// consume it with `finalize`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunningFeatureStats {
    count: Vec<u64>,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningFeatureStats {
    pub fn new(dim: usize) -> Self {
        Self {
            count: vec![0; dim],
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn count(&self, d: usize) -> u64 {
        self.count[d]
    }

    pub fn update(&mut self, row: ArrayView1<'_, f32>) {
        for (d, &value) in row.iter().enumerate().take(self.dim()) {
            self.push(d, value as f64);
        }
    }

    /// Update only the dimensions whose `include` flag is set.
    pub fn update_masked(&mut self, row: ArrayView1<'_, f32>, include: &[bool]) {
        for (d, &value) in row.iter().enumerate().take(self.dim()) {
            if include.get(d).copied().unwrap_or(false) {
                self.push(d, value as f64);
            }
        }
    }

    fn push(&mut self, d: usize, value: f64) {
        self.count[d] += 1;
        let delta = value - self.mean[d];
        self.mean[d] += delta / self.count[d] as f64;
        self.m2[d] += delta * (value - self.mean[d]);
    }

    /// Combine with an accumulator built over disjoint data.
    pub fn merge(&mut self, other: &RunningFeatureStats) -> Result<()> {
        if other.dim() != self.dim() {
            return Err(PipelineError::ShapeMismatch {
                what: "running stats",
                expected: vec![self.dim()],
                actual: vec![other.dim()],
            });
        }
        for d in 0..self.dim() {
            let (na, nb) = (self.count[d], other.count[d]);
            if nb == 0 {
                continue;
            }
            let n = na + nb;
            let delta = other.mean[d] - self.mean[d];
            self.mean[d] += delta * nb as f64 / n as f64;
            self.m2[d] += other.m2[d] + delta * delta * (na as f64 * nb as f64) / n as f64;
            self.count[d] = n;
        }
        Ok(())
    }

    /// Mean and sample std per dimension. Fewer than two values give std 1;
    /// otherwise the variance is floored before the square root.
    pub fn finalize(self, variance_floor: f64) -> (Vec<f32>, Vec<f32>) {
        let std = self
            .count
            .iter()
            .zip(&self.m2)
            .map(|(&n, &m2)| {
                if n < 2 {
                    1.0
                } else {
                    (m2 / (n - 1) as f64).max(variance_floor).sqrt() as f32
                }
            })
            .collect();
        let mean = self.mean.iter().map(|&m| m as f32).collect();
        (mean, std)
    }
}

/// Leakage-safe accumulation of joint and global statistics.
///
/// Joint rows whose interpolation flag is set are skipped. Torso globals skip
/// frames where any shoulder or hip was interpolated; wrist speed skips frames
/// where either wrist was.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalerAccumulator {
    joint: RunningFeatureStats,
    global: RunningFeatureStats,
    samples: usize,
}

impl Default for ScalerAccumulator {
    fn default() -> Self {
        Self {
            joint: RunningFeatureStats::new(JOINT_FEATURE_DIM),
            global: RunningFeatureStats::new(GLOBAL_FEATURE_DIM),
            samples: 0,
        }
    }
}

impl ScalerAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn observe(&mut self, features: &SampleFeatures, mask: &Array2<bool>) -> Result<()> {
        let t_len = features.num_frames();
        if mask.dim() != (t_len, NUM_JOINTS) {
            return Err(PipelineError::ShapeMismatch {
                what: "interpolation_mask",
                expected: vec![t_len, NUM_JOINTS],
                actual: mask.shape().to_vec(),
            });
        }

        for (t, frame) in features.joint.axis_iter(Axis(0)).enumerate() {
            for (j, row) in frame.axis_iter(Axis(0)).enumerate() {
                if !mask[[t, j]] {
                    self.joint.update(row);
                }
            }

            let torso_clean = TORSO_JOINTS.iter().all(|&j| !mask[[t, j]]);
            let wrists_clean = WRISTS.iter().all(|&j| !mask[[t, j]]);
            let mut include = [false; GLOBAL_FEATURE_DIM];
            include[GLOBAL_X_FACTOR] = torso_clean;
            include[GLOBAL_HIP_SHOULDER_SEP] = torso_clean;
            include[GLOBAL_WRIST_SPEED] = wrists_clean;
            self.global.update_masked(features.global.slice(s![t, ..]), &include);
        }
        self.samples += 1;
        Ok(())
    }

    pub fn merge(&mut self, other: &ScalerAccumulator) -> Result<()> {
        self.joint.merge(&other.joint)?;
        self.global.merge(&other.global)?;
        self.samples += other.samples;
        Ok(())
    }

    pub fn finalize(self, variance_floor: f64) -> FeatureScaler {
        let (joint_mean, joint_std) = self.joint.finalize(variance_floor);
        let (global_mean, global_std) = self.global.finalize(variance_floor);
        FeatureScaler {
            joint_mean,
            joint_std,
            global_mean,
            global_std,
        }
    }
}

/// Per-channel standardization, persisted as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub joint_mean: Vec<f32>,
    pub joint_std: Vec<f32>,
    pub global_mean: Vec<f32>,
    pub global_std: Vec<f32>,
}

impl FeatureScaler {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let scaler: FeatureScaler = serde_json::from_str(&contents)?;
        scaler.check_dims()?;
        Ok(scaler)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| PipelineError::io(path, e))
    }

    /// `(x - mean) / std`, with a zero std treated as 1.
    pub fn apply(&self, features: &SampleFeatures) -> Result<SampleFeatures> {
        self.check_dims()?;
        let mut joint = features.joint.clone();
        for mut row in joint.lanes_mut(Axis(2)) {
            standardize(row.iter_mut(), &self.joint_mean, &self.joint_std);
        }
        let mut global = features.global.clone();
        for mut row in global.rows_mut() {
            standardize(row.iter_mut(), &self.global_mean, &self.global_std);
        }
        Ok(SampleFeatures { joint, global })
    }

    fn check_dims(&self) -> Result<()> {
        let dims = [
            ("joint_mean", self.joint_mean.len(), JOINT_FEATURE_DIM),
            ("joint_std", self.joint_std.len(), JOINT_FEATURE_DIM),
            ("global_mean", self.global_mean.len(), GLOBAL_FEATURE_DIM),
            ("global_std", self.global_std.len(), GLOBAL_FEATURE_DIM),
        ];
        for (what, actual, expected) in dims {
            if actual != expected {
                return Err(PipelineError::ShapeMismatch {
                    what,
                    expected: vec![expected],
                    actual: vec![actual],
                });
            }
        }
        Ok(())
    }
}

fn standardize<'a>(values: impl Iterator<Item = &'a mut f32>, mean: &[f32], std: &[f32]) {
    for ((v, &m), &s) in values.zip(mean).zip(std) {
        let s = if s == 0.0 { 1.0 } else { s };
        *v = (*v - m) / s;
    }
}
