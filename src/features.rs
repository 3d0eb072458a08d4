// src/features.rs
//! Per-joint kinematics and global swing descriptors.
//!
//! Joint channels: `[x, y, z, vis, vx, vy, vz, ax, ay, az, speed, accel, angle]`.
//! Global channels: `[x_factor, hip_shoulder_sep, max_wrist_speed]`.

use crate::config::PipelineConfig;
use crate::joints::{
    ANGLE_TRIPLETS, HIPS, LEFT_HIP, LEFT_SHOULDER, NUM_JOINTS, RIGHT_HIP, RIGHT_SHOULDER,
    SHOULDERS, VISIBILITY, WRISTS,
};
use crate::sequence::PoseSequence;
use nalgebra::Vector3;
use ndarray::{s, Array2, Array3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const JOINT_FEATURE_DIM: usize = 13;
pub const GLOBAL_FEATURE_DIM: usize = 3;

pub const CH_VELOCITY: usize = 4;
pub const CH_ACCELERATION: usize = 7;
pub const CH_SPEED: usize = 10;
pub const CH_ACCEL_MAG: usize = 11;
pub const CH_ANGLE: usize = 12;

pub const GLOBAL_X_FACTOR: usize = 0;
pub const GLOBAL_HIP_SHOULDER_SEP: usize = 1;
pub const GLOBAL_WRIST_SPEED: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleFeatures {
    /// `(T, 33, 13)`
    pub joint: Array3<f32>,
    /// `(T, 3)`
    pub global: Array2<f32>,
}

impl SampleFeatures {
    pub fn num_frames(&self) -> usize {
        self.joint.shape()[0]
    }
}

#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    angle_epsilon: f32,
    dropout_prob: f64,
}

impl FeatureEngineer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            angle_epsilon: config.features.angle_epsilon,
            dropout_prob: config.augmentation.dropout_prob,
        }
    }

    /// Expects a sequence that is already repaired, normalized and resampled.
    ///
    /// Velocity and acceleration are backward differences and are exactly
    /// zero at frame 0, so no feature at `t` depends on frames after `t`.
    pub fn compute_features(&self, sequence: &PoseSequence) -> SampleFeatures {
        let t_len = sequence.num_frames();
        let dt = 1.0 / sequence.fps.max(1e-3);
        let mut joint = Array3::<f32>::zeros((t_len, NUM_JOINTS, JOINT_FEATURE_DIM));
        joint
            .slice_mut(s![.., .., 0..4])
            .assign(&sequence.data.slice(s![.., .., 0..4]));

        for t in 1..t_len {
            for j in 0..NUM_JOINTS {
                for dim in 0..3 {
                    let v = (sequence.data[[t, j, dim]] - sequence.data[[t - 1, j, dim]]) / dt;
                    let a = (v - joint[[t - 1, j, CH_VELOCITY + dim]]) / dt;
                    joint[[t, j, CH_VELOCITY + dim]] = v;
                    joint[[t, j, CH_ACCELERATION + dim]] = a;
                }
                joint[[t, j, CH_SPEED]] = channel_norm(&joint, t, j, CH_VELOCITY);
                joint[[t, j, CH_ACCEL_MAG]] = channel_norm(&joint, t, j, CH_ACCELERATION);
            }
        }

        let point = |t: usize, j: usize| {
            Vector3::new(
                sequence.data[[t, j, 0]],
                sequence.data[[t, j, 1]],
                sequence.data[[t, j, 2]],
            )
        };

        let mut global = Array2::<f32>::zeros((t_len, GLOBAL_FEATURE_DIM));
        for t in 0..t_len {
            for &(joint_idx, (a, b, c)) in ANGLE_TRIPLETS.iter() {
                joint[[t, joint_idx, CH_ANGLE]] =
                    joint_angle(point(t, a), point(t, b), point(t, c), self.angle_epsilon);
            }

            let shoulder_line = point(t, RIGHT_SHOULDER) - point(t, LEFT_SHOULDER);
            let hip_line = point(t, RIGHT_HIP) - point(t, LEFT_HIP);
            let shoulder_angle = shoulder_line.y.atan2(shoulder_line.x).to_degrees();
            let hip_angle = hip_line.y.atan2(hip_line.x).to_degrees();
            global[[t, GLOBAL_X_FACTOR]] = shortest_angle_diff(shoulder_angle, hip_angle);

            let mid_shoulder = (point(t, LEFT_SHOULDER) + point(t, RIGHT_SHOULDER)) / 2.0;
            let mid_hip = (point(t, LEFT_HIP) + point(t, RIGHT_HIP)) / 2.0;
            global[[t, GLOBAL_HIP_SHOULDER_SEP]] = (mid_shoulder - mid_hip).norm();

            global[[t, GLOBAL_WRIST_SPEED]] = WRISTS
                .iter()
                .map(|&w| joint[[t, w, CH_SPEED]])
                .fold(0.0, f32::max);
        }

        debug!(frames = t_len, "computed joint and global features");
        SampleFeatures { joint, global }
    }

    /// Missingness dropout. Each (frame, joint) is dropped with the configured
    /// probability; a dropped joint loses every channel, not just its position.
    /// Globals are zeroed on frames where their source joints are gone: the
    /// torso globals need both shoulders and both hips, the wrist speed needs
    /// either wrist.
    pub fn augment_missingness_dropout<R: Rng + ?Sized>(
        &self,
        features: &SampleFeatures,
        rng: &mut R,
    ) -> SampleFeatures {
        if self.dropout_prob <= 0.0 {
            return features.clone();
        }

        let mut joint = features.joint.clone();
        let mut global = features.global.clone();
        let t_len = features.num_frames();
        let mut dropped = 0usize;

        for t in 0..t_len {
            for j in 0..NUM_JOINTS {
                if rng.gen::<f64>() < self.dropout_prob {
                    joint.slice_mut(s![t, j, ..]).fill(0.0);
                    dropped += 1;
                }
            }

            let present = |j: usize| joint[[t, j, VISIBILITY]] > 0.0;
            let torso_ok = SHOULDERS.iter().chain(HIPS.iter()).all(|&j| present(j));
            let wrists_ok = WRISTS.iter().any(|&j| present(j));
            if !torso_ok {
                global[[t, GLOBAL_X_FACTOR]] = 0.0;
                global[[t, GLOBAL_HIP_SHOULDER_SEP]] = 0.0;
            }
            if !wrists_ok {
                global[[t, GLOBAL_WRIST_SPEED]] = 0.0;
            }
        }

        debug!(dropped, "missingness dropout applied");
        SampleFeatures { joint, global }
    }
}

fn channel_norm(joint: &Array3<f32>, t: usize, j: usize, offset: usize) -> f32 {
    Vector3::new(
        joint[[t, j, offset]],
        joint[[t, j, offset + 1]],
        joint[[t, j, offset + 2]],
    )
    .norm()
}

/// Angle at `b` in degrees between the limbs `b -> a` and `b -> c`.
pub fn joint_angle(a: Vector3<f32>, b: Vector3<f32>, c: Vector3<f32>, epsilon: f32) -> f32 {
    let ba = a - b;
    let bc = c - b;
    let denom = (ba.norm() * bc.norm()).max(epsilon);
    (ba.dot(&bc) / denom).clamp(-1.0, 1.0).acos().to_degrees()
}

/// Magnitude of the shortest signed difference between two headings, in `[0, 180]`.
pub fn shortest_angle_diff(a_deg: f32, b_deg: f32) -> f32 {
    ((b_deg - a_deg + 180.0).rem_euclid(360.0) - 180.0).abs()
}
