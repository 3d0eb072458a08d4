// src/resample.rs
//! Fixed-length temporal resampling of pose sequences.

use crate::error::{PipelineError, Result};
use crate::joints::{NUM_CHANNELS, NUM_JOINTS};
use crate::sequence::PoseSequence;
use ndarray::{Array1, Array2, Array3, Axis};

/// Maps a `T`-frame sequence onto `target_frames` frames.
#[derive(Debug, Clone, Copy)]
pub struct TemporalResampler {
    target_frames: usize,
}

impl TemporalResampler {
    pub fn new(target_frames: usize) -> Self {
        Self { target_frames }
    }

    pub fn target_frames(&self) -> usize {
        self.target_frames
    }

    /// Data is interpolated linearly over normalized time, the mask by
    /// nearest-index selection. Frame times are rebuilt from `fps`.
    pub fn resample(&self, sequence: &PoseSequence) -> Result<PoseSequence> {
        if sequence.is_empty() {
            return Err(PipelineError::EmptySequence);
        }
        if sequence.num_frames() == self.target_frames {
            return Ok(sequence.clone());
        }

        let data = resample_data(&sequence.data, self.target_frames);
        let interpolation_mask = resample_mask(&sequence.interpolation_mask, self.target_frames);
        let valid_mask = resample_mask(
            &sequence.valid_mask.clone().insert_axis(Axis(1)),
            self.target_frames,
        )
        .index_axis_move(Axis(1), 0);

        let fps_safe = sequence.fps.max(1e-3);
        let duration = self.target_frames.saturating_sub(1) as f32 / fps_safe;
        let frame_times = Array1::linspace(0.0, duration, self.target_frames);

        PoseSequence::new(data, frame_times, sequence.fps, interpolation_mask, valid_mask)
    }
}

/// Piecewise-linear resampling of every joint channel over `[0, 1]`.
pub fn resample_data(data: &Array3<f32>, target_frames: usize) -> Array3<f32> {
    let t_len = data.shape()[0];
    let mut out = Array3::zeros((target_frames, NUM_JOINTS, NUM_CHANNELS));
    if t_len == 0 {
        return out;
    }
    for i in 0..target_frames {
        let (lo, hi, frac) = source_position(i, t_len, target_frames);
        for joint in 0..NUM_JOINTS {
            for channel in 0..NUM_CHANNELS {
                let a = data[[lo, joint, channel]];
                let b = data[[hi, joint, channel]];
                out[[i, joint, channel]] = a + (b - a) * frac;
            }
        }
    }
    out
}

/// Nearest-index mask resampling: row `i` copies source row
/// `floor(i * (T - 1) / (target - 1))`.
pub fn resample_mask(mask: &Array2<bool>, target_frames: usize) -> Array2<bool> {
    let t_len = mask.shape()[0];
    if t_len == target_frames {
        return mask.clone();
    }
    let indices: Vec<usize> = (0..target_frames)
        .map(|i| mask_source_index(i, t_len, target_frames))
        .collect();
    mask.select(Axis(0), &indices)
}

fn mask_source_index(i: usize, t_len: usize, target_frames: usize) -> usize {
    if target_frames < 2 || t_len == 0 {
        return 0;
    }
    i * (t_len - 1) / (target_frames - 1)
}

/// Bracketing source frames and blend weight for output frame `i`.
fn source_position(i: usize, t_len: usize, target_frames: usize) -> (usize, usize, f32) {
    if t_len == 1 || target_frames < 2 {
        return (0, 0, 0.0);
    }
    let pos = i as f64 * (t_len - 1) as f64 / (target_frames - 1) as f64;
    let lo = (pos.floor() as usize).min(t_len - 1);
    let hi = (lo + 1).min(t_len - 1);
    (lo, hi, (pos - lo as f64) as f32)
}
