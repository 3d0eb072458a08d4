// src/repair.rs
//! Gap filling and temporal smoothing of per-joint tracks.

use crate::config::{PipelineConfig, SmoothingConfig};
use crate::joints::{NUM_CHANNELS, NUM_JOINTS, VISIBILITY};
use crate::sequence::PoseSequence;
use nalgebra::DMatrix;
use ndarray::Array3;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmoothingMethod {
    SavitzkyGolay { window: usize, order: usize },
    MovingAverage { taps: usize },
    Unchanged,
}

/// Fills detector gaps per joint and denoises the filled trajectories.
#[derive(Debug, Clone)]
pub struct SequenceRepair {
    visibility_threshold: f32,
    smoothing: SmoothingConfig,
}

impl SequenceRepair {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            visibility_threshold: config.thresholds.pose_visibility,
            smoothing: config.smoothing.clone(),
        }
    }

    /// Interpolate, then smooth.
    pub fn repair(&self, sequence: &PoseSequence) -> PoseSequence {
        let filled = self.interpolate(sequence);
        self.smooth(&filled)
    }

    /// Linear gap filling per joint.
    ///
    /// A frame is observed when its visibility reaches the threshold. Joints
    /// with fewer than two observed frames are flagged everywhere and get
    /// visibility 0. Otherwise missing x/y/z come from the neighbouring
    /// observations (held flat past the first/last one), visibility is set to
    /// exactly the threshold and the cell is flagged.
    pub fn interpolate(&self, sequence: &PoseSequence) -> PoseSequence {
        let mut out = sequence.clone();
        let t_len = sequence.num_frames();
        let threshold = self.visibility_threshold;
        let mut unusable = 0usize;

        for joint in 0..NUM_JOINTS {
            let observed: Vec<usize> = (0..t_len)
                .filter(|&t| sequence.data[[t, joint, VISIBILITY]] >= threshold)
                .collect();

            if observed.len() < 2 {
                for t in 0..t_len {
                    out.data[[t, joint, VISIBILITY]] = 0.0;
                    out.interpolation_mask[[t, joint]] = true;
                }
                if t_len > 0 {
                    unusable += 1;
                }
                continue;
            }
            if observed.len() == t_len {
                continue;
            }

            let mut next_obs = 0usize;
            for t in 0..t_len {
                if sequence.data[[t, joint, VISIBILITY]] >= threshold {
                    continue;
                }
                while next_obs < observed.len() && observed[next_obs] < t {
                    next_obs += 1;
                }
                for dim in 0..3 {
                    out.data[[t, joint, dim]] =
                        interp_at(t, &observed, next_obs, |i| sequence.data[[i, joint, dim]]);
                }
                out.data[[t, joint, VISIBILITY]] = threshold;
                out.interpolation_mask[[t, joint]] = true;
            }
        }

        if unusable > 0 {
            debug!(unusable, "joints with fewer than two observed frames");
        }
        out
    }

    /// Low-pass every joint channel (coordinates and visibility) across time.
    pub fn smooth(&self, sequence: &PoseSequence) -> PoseSequence {
        let (data, method) = smooth_array(&sequence.data, &self.smoothing);
        debug!(?method, frames = sequence.num_frames(), "smoothed sequence");
        PoseSequence {
            data,
            ..sequence.clone()
        }
    }
}

/// `np.interp` semantics: `next_obs` is the first observed index at or after `t`.
fn interp_at(t: usize, observed: &[usize], next_obs: usize, value: impl Fn(usize) -> f32) -> f32 {
    if next_obs == 0 {
        return value(observed[0]);
    }
    if next_obs >= observed.len() {
        return value(observed[observed.len() - 1]);
    }
    let lo = observed[next_obs - 1];
    let hi = observed[next_obs];
    let frac = (t - lo) as f32 / (hi - lo) as f32;
    let (y_lo, y_hi) = (value(lo), value(hi));
    y_lo + (y_hi - y_lo) * frac
}

/// Smooth along the time axis. Savitzky-Golay when the sequence allows a
/// window of at least 5, moving average otherwise.
pub fn smooth_array(data: &Array3<f32>, config: &SmoothingConfig) -> (Array3<f32>, SmoothingMethod) {
    let t_len = data.shape()[0];
    if t_len < 2 {
        return (data.clone(), SmoothingMethod::Unchanged);
    }

    let window = savgol_window(t_len, config.max_window);
    if window >= 5 {
        let order = config.poly_order.min(window - 1);
        if let Some(projection) = savgol_projection(window, order) {
            let out = map_series(data, |series| apply_projection(series, &projection));
            return (out, SmoothingMethod::SavitzkyGolay { window, order });
        }
    }

    let taps = config.fallback_taps;
    let out = map_series(data, |series| moving_average(series, taps));
    (out, SmoothingMethod::MovingAverage { taps })
}

/// Largest odd window not exceeding `max_window` or the sequence length.
fn savgol_window(t_len: usize, max_window: usize) -> usize {
    let mut window = max_window.min(t_len);
    if window % 2 == 0 {
        window = window.saturating_sub(1);
    }
    window
}

/// Hat matrix `V (VᵀV)⁻¹ Vᵀ` of a least-squares polynomial fit over a window.
/// Row `i` maps the window samples to the fitted value at position `i`.
pub fn savgol_projection(window: usize, order: usize) -> Option<DMatrix<f64>> {
    if window == 0 || order >= window {
        return None;
    }
    let center = (window / 2) as f64;
    let vandermonde =
        DMatrix::from_fn(window, order + 1, |k, j| (k as f64 - center).powi(j as i32));
    let gram = vandermonde.transpose() * &vandermonde;
    let inverse = gram.try_inverse()?;
    Some(&vandermonde * inverse * vandermonde.transpose())
}

fn apply_projection(series: &[f64], projection: &DMatrix<f64>) -> Vec<f64> {
    let n = series.len();
    let w = projection.nrows();
    let c = w / 2;
    let fit = |row: usize, offset: usize| -> f64 {
        (0..w).map(|k| projection[(row, k)] * series[offset + k]).sum()
    };

    (0..n)
        .map(|t| {
            if t < c {
                fit(t, 0)
            } else if t + c >= n {
                fit(t + w - n, n - w)
            } else {
                fit(c, t - c)
            }
        })
        .collect()
}

/// Centered moving average; edge windows average over the samples available.
fn moving_average(series: &[f64], taps: usize) -> Vec<f64> {
    let n = series.len();
    let left = taps / 2;
    let right = taps.saturating_sub(1) - left;
    (0..n)
        .map(|t| {
            let lo = t.saturating_sub(left);
            let hi = (t + right).min(n - 1);
            let span = &series[lo..=hi];
            span.iter().sum::<f64>() / span.len() as f64
        })
        .collect()
}

fn map_series(data: &Array3<f32>, f: impl Fn(&[f64]) -> Vec<f64>) -> Array3<f32> {
    let t_len = data.shape()[0];
    let mut out = data.clone();
    for joint in 0..NUM_JOINTS {
        for channel in 0..NUM_CHANNELS {
            let series: Vec<f64> = (0..t_len).map(|t| data[[t, joint, channel]] as f64).collect();
            for (t, value) in f(&series).into_iter().enumerate() {
                out[[t, joint, channel]] = value as f32;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array3};

    fn repair() -> SequenceRepair {
        SequenceRepair::new(&PipelineConfig::default())
    }

    fn observed_sequence(t_len: usize) -> PoseSequence {
        let mut data = Array3::zeros((t_len, NUM_JOINTS, NUM_CHANNELS));
        for t in 0..t_len {
            for j in 0..NUM_JOINTS {
                data[[t, j, 0]] = 0.3 + 0.01 * t as f32 + 0.001 * j as f32;
                data[[t, j, 1]] = 0.6 - 0.005 * t as f32;
                data[[t, j, 2]] = -0.1;
                data[[t, j, VISIBILITY]] = 0.95;
            }
        }
        PoseSequence::from_raw(data, 30.0, Array1::from_elem(t_len, true)).unwrap()
    }

    #[test]
    fn test_fully_observed_is_untouched() {
        let seq = observed_sequence(12);
        let out = repair().interpolate(&seq);
        assert_eq!(out.data, seq.data);
        assert!(out.interpolation_mask.iter().all(|&m| !m));
    }

    #[test]
    fn test_single_gap_is_linear() {
        let mut seq = observed_sequence(3);
        for j in 0..NUM_JOINTS {
            seq.data[[0, j, 0]] = 0.2;
            seq.data[[2, j, 0]] = 0.6;
        }
        seq.data[[1, 7, 0]] = 99.0;
        seq.data[[1, 7, VISIBILITY]] = 0.1;

        let out = repair().interpolate(&seq);
        assert_relative_eq!(out.data[[1, 7, 0]], 0.4, epsilon = 1e-6);
        assert_eq!(out.data[[1, 7, VISIBILITY]], 0.5);
        assert!(out.interpolation_mask[[1, 7]]);
        assert!(!out.interpolation_mask[[0, 7]]);
        assert!(!out.interpolation_mask[[1, 8]]);
    }

    #[test]
    fn test_boundary_gaps_hold_nearest_observation() {
        let mut seq = observed_sequence(6);
        for t in [0, 1, 5] {
            seq.data[[t, 3, VISIBILITY]] = 0.0;
        }
        let out = repair().interpolate(&seq);
        assert_eq!(out.data[[0, 3, 0]], seq.data[[2, 3, 0]]);
        assert_eq!(out.data[[1, 3, 1]], seq.data[[2, 3, 1]]);
        assert_eq!(out.data[[5, 3, 0]], seq.data[[4, 3, 0]]);
    }

    #[test]
    fn test_unobservable_joint_is_flagged_not_filled() {
        let mut seq = observed_sequence(8);
        for t in 0..8 {
            seq.data[[t, 20, VISIBILITY]] = if t == 4 { 0.9 } else { 0.2 };
        }
        let out = repair().interpolate(&seq);
        for t in 0..8 {
            assert!(out.interpolation_mask[[t, 20]]);
            assert_eq!(out.data[[t, 20, VISIBILITY]], 0.0);
        }
    }

    #[test]
    fn test_savgol_preserves_cubic_tracks() {
        let t_len = 20;
        let mut data = Array3::zeros((t_len, NUM_JOINTS, NUM_CHANNELS));
        for t in 0..t_len {
            let x = t as f32 * 0.05;
            data[[t, 0, 0]] = 0.1 + x - 0.5 * x * x + 0.2 * x * x * x;
        }
        let (out, method) = smooth_array(&data, &SmoothingConfig::default());
        assert_eq!(method, SmoothingMethod::SavitzkyGolay { window: 11, order: 3 });
        for t in 0..t_len {
            assert_relative_eq!(out[[t, 0, 0]], data[[t, 0, 0]], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_savgol_damps_jitter() {
        let t_len = 30;
        let mut data = Array3::zeros((t_len, NUM_JOINTS, NUM_CHANNELS));
        for t in 0..t_len {
            data[[t, 0, 1]] = if t % 2 == 0 { 0.52 } else { 0.48 };
        }
        let (out, _) = smooth_array(&data, &SmoothingConfig::default());
        for t in 6..24 {
            assert!((out[[t, 0, 1]] - 0.5).abs() < 0.02);
        }
    }

    #[test]
    fn test_window_is_odd_and_capped() {
        assert_eq!(savgol_window(100, 11), 11);
        assert_eq!(savgol_window(8, 11), 7);
        assert_eq!(savgol_window(9, 11), 9);
        assert_eq!(savgol_window(4, 11), 3);
        assert_eq!(savgol_window(50, 10), 9);
    }

    #[test]
    fn test_short_sequence_uses_moving_average() {
        let mut data = Array3::zeros((4, NUM_JOINTS, NUM_CHANNELS));
        for t in 0..4 {
            data[[t, 2, 0]] = t as f32;
        }
        let (out, method) = smooth_array(&data, &SmoothingConfig::default());
        assert_eq!(method, SmoothingMethod::MovingAverage { taps: 5 });
        // t=0 averages samples 0..=2
        assert_relative_eq!(out[[0, 2, 0]], 1.0, epsilon = 1e-6);
        assert_relative_eq!(out[[1, 2, 0]], 1.5, epsilon = 1e-6);
    }

    #[test]
    fn test_projection_rows_sum_to_one() {
        let h = savgol_projection(11, 3).unwrap();
        for i in 0..11 {
            let row_sum: f64 = (0..11).map(|k| h[(i, k)]).sum();
            assert_relative_eq!(row_sum, 1.0, epsilon = 1e-9);
        }
        assert!(savgol_projection(3, 3).is_none());
    }

    #[test]
    fn test_repair_keeps_mask_through_smoothing() {
        let mut seq = observed_sequence(15);
        seq.data[[7, 15, VISIBILITY]] = 0.0;
        let out = repair().repair(&seq);
        assert!(out.interpolation_mask[[7, 15]]);
        assert_eq!(out.num_frames(), 15);
    }
}
