// src/sequence.rs
//! Core data model: pose sequences and swing windows.

use crate::error::{PipelineError, Result};
use crate::joints::{NUM_CHANNELS, NUM_JOINTS, VISIBILITY};
use nalgebra::Vector3;
use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// A pose landmark sequence across time.
///
/// * `data`: `(T, 33, 4)` with `[x, y, z, visibility]`
/// * `frame_times`: `(T,)` seconds, non-decreasing
/// * `interpolation_mask`: `(T, 33)`, true where a joint was synthesized
/// * `valid_mask`: `(T,)`, true where the frame is usable
///
/// Stages never mutate a sequence in place; each returns a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseSequence {
    pub data: Array3<f32>,
    pub frame_times: Array1<f32>,
    pub fps: f32,
    pub interpolation_mask: Array2<bool>,
    pub valid_mask: Array1<bool>,
}

impl PoseSequence {
    pub fn new(
        data: Array3<f32>,
        frame_times: Array1<f32>,
        fps: f32,
        interpolation_mask: Array2<bool>,
        valid_mask: Array1<bool>,
    ) -> Result<Self> {
        let t = data.shape()[0];
        check_shape("data", data.shape(), &[t, NUM_JOINTS, NUM_CHANNELS])?;
        check_shape("frame_times", frame_times.shape(), &[t])?;
        check_shape("interpolation_mask", interpolation_mask.shape(), &[t, NUM_JOINTS])?;
        check_shape("valid_mask", valid_mask.shape(), &[t])?;
        if !(fps > 0.0) {
            return Err(PipelineError::invalid_config("fps", "must be > 0"));
        }
        if frame_times.iter().zip(frame_times.iter().skip(1)).any(|(a, b)| !(b >= a)) {
            return Err(PipelineError::invalid_config("frame_times", "must be non-decreasing"));
        }
        Ok(Self {
            data,
            frame_times,
            fps,
            interpolation_mask,
            valid_mask,
        })
    }

    /// Raw sequence straight from the detector: nothing interpolated yet,
    /// frame times at `i / fps`.
    pub fn from_raw(data: Array3<f32>, fps: f32, valid_mask: Array1<bool>) -> Result<Self> {
        let t = data.shape()[0];
        let fps_safe = fps.max(1e-3);
        let frame_times = Array1::from_iter((0..t).map(|i| i as f32 / fps_safe));
        let interpolation_mask = Array2::from_elem((t, NUM_JOINTS), false);
        Self::new(data, frame_times, fps, interpolation_mask, valid_mask)
    }

    pub fn num_frames(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.num_frames() == 0
    }

    pub fn frame(&self, t: usize) -> ArrayView2<'_, f32> {
        self.data.index_axis(Axis(0), t)
    }

    pub fn position(&self, t: usize, joint: usize) -> Vector3<f64> {
        Vector3::new(
            self.data[[t, joint, 0]] as f64,
            self.data[[t, joint, 1]] as f64,
            self.data[[t, joint, 2]] as f64,
        )
    }

    pub fn visibility(&self, t: usize, joint: usize) -> f32 {
        self.data[[t, joint, VISIBILITY]]
    }

    /// Fraction of (frame, joint) cells that were synthesized.
    pub fn interpolation_ratio(&self) -> f32 {
        if self.interpolation_mask.is_empty() {
            return 0.0;
        }
        let flagged = self.interpolation_mask.iter().filter(|&&m| m).count();
        flagged as f32 / self.interpolation_mask.len() as f32
    }

    /// Copy of frames `[start, end)`, clamped to the sequence.
    pub fn slice(&self, start: usize, end: usize) -> PoseSequence {
        let end = end.min(self.num_frames());
        let start = start.min(end);
        PoseSequence {
            data: self.data.slice(s![start..end, .., ..]).to_owned(),
            frame_times: self.frame_times.slice(s![start..end]).to_owned(),
            fps: self.fps,
            interpolation_mask: self.interpolation_mask.slice(s![start..end, ..]).to_owned(),
            valid_mask: self.valid_mask.slice(s![start..end]).to_owned(),
        }
    }
}

/// Frame-level usability: at least one joint reaches the visibility threshold.
pub fn frame_validity(data: &Array3<f32>, threshold: f32) -> Array1<bool> {
    Array1::from_iter(data.outer_iter().map(|frame| {
        frame
            .column(VISIBILITY)
            .iter()
            .fold(f32::NEG_INFINITY, |acc, &v| acc.max(v))
            >= threshold
    }))
}

fn check_shape(what: &'static str, actual: &[usize], expected: &[usize]) -> Result<()> {
    if actual != expected {
        return Err(PipelineError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMethod {
    WristVelocity,
    TorsoAngle,
}

impl WindowMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowMethod::WristVelocity => "wrist_velocity",
            WindowMethod::TorsoAngle => "torso_angle",
        }
    }
}

/// Swing window `[start_frame, end_frame)` on the fixed-fps video timeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwingWindow {
    pub start_frame: usize,
    pub end_frame: usize,
    pub confidence: f32,
    pub method: WindowMethod,
}

impl SwingWindow {
    pub fn num_frames(&self) -> usize {
        self.end_frame.saturating_sub(self.start_frame)
    }

    pub fn is_empty(&self) -> bool {
        self.num_frames() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sequence(t: usize) -> PoseSequence {
        let mut data = Array3::zeros((t, NUM_JOINTS, NUM_CHANNELS));
        for i in 0..t {
            data[[i, 0, 0]] = i as f32;
            data[[i, 0, VISIBILITY]] = 0.9;
        }
        PoseSequence::from_raw(data, 30.0, Array1::from_elem(t, true)).unwrap()
    }

    #[test]
    fn test_rejects_mismatched_masks() {
        let data = Array3::zeros((4, NUM_JOINTS, NUM_CHANNELS));
        let result = PoseSequence::new(
            data,
            Array1::zeros(4),
            30.0,
            Array2::from_elem((3, NUM_JOINTS), false),
            Array1::from_elem(4, true),
        );
        assert!(matches!(result, Err(PipelineError::ShapeMismatch { what: "interpolation_mask", .. })));
    }

    #[test]
    fn test_rejects_decreasing_frame_times() {
        let build = |times: Vec<f32>| {
            PoseSequence::new(
                Array3::zeros((3, NUM_JOINTS, NUM_CHANNELS)),
                Array1::from_vec(times),
                30.0,
                Array2::from_elem((3, NUM_JOINTS), false),
                Array1::from_elem(3, true),
            )
        };
        assert!(matches!(
            build(vec![0.0, 0.1, 0.05]),
            Err(PipelineError::InvalidConfig { ref field, .. }) if field == "frame_times"
        ));
        assert!(build(vec![0.0, f32::NAN, 0.2]).is_err());
        assert!(build(vec![0.0, 0.1, 0.1]).is_ok());
    }

    #[test]
    fn test_slice_keeps_all_channels_aligned() {
        let seq = sequence(10);
        let part = seq.slice(3, 7);
        assert_eq!(part.num_frames(), 4);
        assert_eq!(part.data[[0, 0, 0]], 3.0);
        assert_eq!(part.frame_times.len(), 4);
        assert_eq!(part.interpolation_mask.shape(), &[4, NUM_JOINTS]);
        assert_eq!(part.valid_mask.len(), 4);
    }

    #[test]
    fn test_slice_clamps_out_of_range() {
        let seq = sequence(5);
        assert_eq!(seq.slice(3, 50).num_frames(), 2);
        assert!(seq.slice(9, 12).is_empty());
    }

    #[test]
    fn test_window_length_never_negative() {
        let window = SwingWindow {
            start_frame: 8,
            end_frame: 3,
            confidence: 0.5,
            method: WindowMethod::TorsoAngle,
        };
        assert_eq!(window.num_frames(), 0);
        assert_eq!(window.method.as_str(), "torso_angle");
    }

    #[test]
    fn test_frame_validity_uses_best_joint() {
        let mut data = Array3::zeros((2, NUM_JOINTS, NUM_CHANNELS));
        data[[0, 5, VISIBILITY]] = 0.7;
        let valid = frame_validity(&data, 0.5);
        assert_eq!(valid.to_vec(), vec![true, false]);
    }
}
