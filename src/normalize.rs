// src/normalize.rs
//! Per-frame removal of pose translation, scale and in-plane rotation.

use crate::config::PipelineConfig;
use crate::joints::{LEFT_HIP, LEFT_SHOULDER, RIGHT_HIP, RIGHT_SHOULDER};
use crate::sequence::PoseSequence;
use nalgebra::{Rotation2, Vector2, Vector3};
use ndarray::{ArrayViewMut2, Axis};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScaleSource {
    HipWidth,
    ShoulderWidth,
    Unit,
}

#[derive(Debug, Clone)]
pub struct SpatialNormalizer {
    min_scale: f32,
}

impl SpatialNormalizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            min_scale: config.normalize.min_scale,
        }
    }

    /// Every frame is normalized on its own; there is no coupling across time.
    pub fn normalize(&self, sequence: &PoseSequence) -> PoseSequence {
        let mut out = sequence.clone();
        for frame in out.data.axis_iter_mut(Axis(0)) {
            self.normalize_frame(frame);
        }
        out
    }

    /// Hip midpoint to the origin, hip width to 1 (shoulder width, then 1, when
    /// degenerate), hips rotated horizontal, shoulders forced to positive y.
    pub fn normalize_frame(&self, mut frame: ArrayViewMut2<'_, f32>) -> ScaleSource {
        let point = |frame: &ArrayViewMut2<'_, f32>, j: usize| {
            Vector3::new(frame[[j, 0]], frame[[j, 1]], frame[[j, 2]])
        };

        let left_hip = point(&frame, LEFT_HIP);
        let right_hip = point(&frame, RIGHT_HIP);
        let mid_hip = (left_hip + right_hip) / 2.0;
        for mut joint in frame.rows_mut() {
            for dim in 0..3 {
                joint[dim] -= mid_hip[dim];
            }
        }

        let hip_width = (right_hip - left_hip).norm();
        let (scale, source) = if hip_width >= self.min_scale {
            (hip_width, ScaleSource::HipWidth)
        } else {
            let shoulder_width = (point(&frame, RIGHT_SHOULDER) - point(&frame, LEFT_SHOULDER)).norm();
            if shoulder_width > self.min_scale {
                (shoulder_width, ScaleSource::ShoulderWidth)
            } else {
                (1.0, ScaleSource::Unit)
            }
        };
        for mut joint in frame.rows_mut() {
            for dim in 0..3 {
                joint[dim] /= scale;
            }
        }

        let hip_vec = Vector2::new(
            frame[[RIGHT_HIP, 0]] - frame[[LEFT_HIP, 0]],
            frame[[RIGHT_HIP, 1]] - frame[[LEFT_HIP, 1]],
        );
        let rotation = Rotation2::new(-hip_vec.y.atan2(hip_vec.x));
        for mut joint in frame.rows_mut() {
            let rotated = rotation * Vector2::new(joint[0], joint[1]);
            joint[0] = rotated.x;
            joint[1] = rotated.y;
        }

        let mid_shoulder_y = (frame[[LEFT_SHOULDER, 1]] + frame[[RIGHT_SHOULDER, 1]]) / 2.0;
        if mid_shoulder_y < 0.0 {
            for mut joint in frame.rows_mut() {
                joint[1] = -joint[1];
                joint[2] = -joint[2];
            }
        }

        source
    }
}
