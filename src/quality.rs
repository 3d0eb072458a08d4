// src/quality.rs
//! Per-sample detection quality diagnostics.

use crate::config::Thresholds;
use crate::joints::{KEY_JOINT_GROUPS, VISIBILITY};
use crate::sequence::frame_validity;
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub valid_ratio: f32,
    pub mean_visibility: f32,
    /// Mean visibility of each left/right joint group.
    pub keypoint_visibility: BTreeMap<String, f32>,
    /// Longest run of consecutive unusable frames.
    pub longest_dropout: usize,
    pub low_quality: bool,
}

impl QualityMetrics {
    pub fn compute(data: &Array3<f32>, thresholds: &Thresholds) -> Self {
        let t_len = data.shape()[0];
        let valid = frame_validity(data, thresholds.pose_visibility);
        let valid_ratio = if t_len == 0 {
            0.0
        } else {
            valid.iter().filter(|&&v| v).count() as f32 / t_len as f32
        };

        let keypoint_visibility: BTreeMap<String, f32> = KEY_JOINT_GROUPS
            .iter()
            .map(|&(name, (left, right))| {
                let total: f32 = (0..t_len)
                    .map(|t| data[[t, left, VISIBILITY]] + data[[t, right, VISIBILITY]])
                    .sum();
                let mean = if t_len == 0 { 0.0 } else { total / (2 * t_len) as f32 };
                (name.to_string(), mean)
            })
            .collect();
        let mean_visibility =
            keypoint_visibility.values().sum::<f32>() / keypoint_visibility.len() as f32;

        let longest_dropout = longest_run(valid.iter().map(|&v| !v));
        let low_quality =
            valid_ratio < thresholds.valid_ratio || mean_visibility < thresholds.mean_visibility;

        Self {
            valid_ratio,
            mean_visibility,
            keypoint_visibility,
            longest_dropout,
            low_quality,
        }
    }
}

fn longest_run(flags: impl Iterator<Item = bool>) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for flag in flags {
        if flag {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joints::{NUM_CHANNELS, NUM_JOINTS};

    fn visible(t_len: usize, vis: f32) -> Array3<f32> {
        let mut data = Array3::zeros((t_len, NUM_JOINTS, NUM_CHANNELS));
        for t in 0..t_len {
            for j in 0..NUM_JOINTS {
                data[[t, j, VISIBILITY]] = vis;
            }
        }
        data
    }

    #[test]
    fn test_clean_clip() {
        let q = QualityMetrics::compute(&visible(20, 0.9), &Thresholds::default());
        assert_eq!(q.valid_ratio, 1.0);
        assert!((q.mean_visibility - 0.9).abs() < 1e-6);
        assert_eq!(q.keypoint_visibility.len(), 6);
        assert_eq!(q.longest_dropout, 0);
        assert!(!q.low_quality);
    }

    #[test]
    fn test_dropout_run_and_low_quality() {
        let mut data = visible(20, 0.9);
        for t in [2, 3, 10, 11, 12, 13] {
            for j in 0..NUM_JOINTS {
                data[[t, j, VISIBILITY]] = 0.1;
            }
        }
        let q = QualityMetrics::compute(&data, &Thresholds::default());
        assert_eq!(q.longest_dropout, 4);
        assert!((q.valid_ratio - 0.7).abs() < 1e-6);
        assert!(q.low_quality);
    }

    #[test]
    fn test_dim_clip_is_low_quality() {
        let q = QualityMetrics::compute(&visible(10, 0.55), &Thresholds::default());
        assert_eq!(q.valid_ratio, 1.0);
        assert!(q.low_quality);
    }

    #[test]
    fn test_empty_clip() {
        let q = QualityMetrics::compute(&visible(0, 0.9), &Thresholds::default());
        assert_eq!(q.valid_ratio, 0.0);
        assert_eq!(q.longest_dropout, 0);
        assert!(q.low_quality);
    }
}
