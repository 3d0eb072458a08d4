// src/window.rs
//! Swing window detection on the fixed-fps video timeline.
//!
//! Input must be interpolated/smoothed only. A spatially normalized or
//! resampled sequence yields frame indices that no longer match the video.

use crate::config::{PipelineConfig, WindowConfig};
use crate::joints::{LEFT_SHOULDER, RIGHT_SHOULDER, VISIBILITY, WRISTS};
use crate::sequence::{PoseSequence, SwingWindow, WindowMethod};
use tracing::{debug, info, warn};

pub struct SwingWindowDetector {
    visibility_threshold: f32,
    n_frames: usize,
    params: WindowConfig,
}

impl SwingWindowDetector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            visibility_threshold: config.thresholds.pose_visibility,
            n_frames: config.n_frames,
            params: config.window.clone(),
        }
    }

    pub fn detect(&self, sequence: &PoseSequence) -> SwingWindow {
        if sequence.is_empty() {
            return SwingWindow {
                start_frame: 0,
                end_frame: 0,
                confidence: 0.0,
                method: WindowMethod::WristVelocity,
            };
        }

        let speeds = self.wrist_speeds(sequence);
        let (peak, max_speed) = argmax(&speeds);
        if max_speed <= 0.0 {
            warn!("no usable wrist motion, falling back to torso rotation");
            return self.torso_window(sequence);
        }

        let t_len = speeds.len();
        let fps = sequence.fps;
        let low_th = self.params.wrist_low_ratio * max_speed;
        let (start, end) = scan_below(&speeds, peak, low_th, (0, t_len - 1));
        let end = end.max(peak + secs_to_frames(self.params.min_post_peak_secs, fps));

        let (start, mut end) = self.pad(start, end, t_len);
        if end - start < self.n_frames / 2 {
            end = t_len.min(start + self.n_frames);
        }

        let window = SwingWindow {
            start_frame: start,
            end_frame: end,
            confidence: max_speed.min(1.0),
            method: WindowMethod::WristVelocity,
        };
        info!(
            start = window.start_frame,
            end = window.end_frame,
            peak,
            confidence = window.confidence,
            "swing window from wrist velocity"
        );
        window
    }

    /// Per-frame max speed over both wrists. Frames where a wrist is not
    /// observed, or was interpolated, contribute 0 for that wrist.
    pub fn wrist_speeds(&self, sequence: &PoseSequence) -> Vec<f32> {
        let t_len = sequence.num_frames();
        let mut speeds = vec![0.0f32; t_len];
        for &wrist in WRISTS.iter() {
            for t in 1..t_len {
                let usable = sequence.data[[t, wrist, VISIBILITY]] >= self.visibility_threshold
                    && !sequence.interpolation_mask[[t, wrist]];
                if !usable {
                    continue;
                }
                let step = (sequence.position(t, wrist) - sequence.position(t - 1, wrist)).norm();
                speeds[t] = speeds[t].max(step as f32 * sequence.fps);
            }
        }
        speeds
    }

    fn torso_window(&self, sequence: &PoseSequence) -> SwingWindow {
        let rates = torso_angle_speeds(sequence);
        let t_len = rates.len();
        let fps = sequence.fps;
        let (peak, max_rate) = argmax(&rates);

        let default_start = peak.saturating_sub(secs_to_frames(self.params.fallback_pre_peak_secs, fps));
        let default_end = t_len.min(peak + secs_to_frames(self.params.fallback_post_peak_secs, fps));

        if max_rate <= 0.0 {
            debug!(peak, "no torso rotation either, using fixed window");
            return SwingWindow {
                start_frame: default_start,
                end_frame: default_end,
                confidence: self.params.fallback_confidence,
                method: WindowMethod::TorsoAngle,
            };
        }

        let threshold = self.params.torso_low_ratio * max_rate;
        let (start, end) = scan_below(&rates, peak, threshold, (default_start, default_end));
        let (start, end) = self.pad(start, end, t_len);

        let window = SwingWindow {
            start_frame: start,
            end_frame: end,
            confidence: max_rate.min(1.0),
            method: WindowMethod::TorsoAngle,
        };
        info!(
            start = window.start_frame,
            end = window.end_frame,
            peak,
            "swing window from torso rotation"
        );
        window
    }

    fn pad(&self, start: usize, end: usize, t_len: usize) -> (usize, usize) {
        let margin = self.params.padding_margin_frames;
        (start.saturating_sub(margin), t_len.min(end + margin))
    }
}

/// Shoulder-line angular speed in degrees per second, 0 at frame 0.
pub fn torso_angle_speeds(sequence: &PoseSequence) -> Vec<f32> {
    let t_len = sequence.num_frames();
    let angles: Vec<f32> = (0..t_len)
        .map(|t| {
            let dx = sequence.data[[t, RIGHT_SHOULDER, 0]] - sequence.data[[t, LEFT_SHOULDER, 0]];
            let dy = sequence.data[[t, RIGHT_SHOULDER, 1]] - sequence.data[[t, LEFT_SHOULDER, 1]];
            dy.atan2(dx).to_degrees()
        })
        .collect();

    let mut rates = vec![0.0f32; t_len];
    for t in 1..t_len {
        let diff = (angles[t] - angles[t - 1] + 180.0).rem_euclid(360.0) - 180.0;
        rates[t] = diff.abs() * sequence.fps;
    }
    rates
}

/// First index of the maximum, and the maximum.
fn argmax(signal: &[f32]) -> (usize, f32) {
    let mut best = (0usize, f32::NEG_INFINITY);
    for (i, &v) in signal.iter().enumerate() {
        if v > best.1 {
            best = (i, v);
        }
    }
    best
}

/// Nearest frames on each side of `peak` whose value falls below `threshold`.
/// Sides without a crossing keep the supplied default.
fn scan_below(
    signal: &[f32],
    peak: usize,
    threshold: f32,
    defaults: (usize, usize),
) -> (usize, usize) {
    let start = (0..=peak)
        .rev()
        .find(|&i| signal[i] < threshold)
        .unwrap_or(defaults.0);
    let end = (peak..signal.len())
        .find(|&i| signal[i] < threshold)
        .unwrap_or(defaults.1);
    (start, end)
}

fn secs_to_frames(secs: f32, fps: f32) -> usize {
    (secs * fps).max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joints::{LEFT_WRIST, NUM_CHANNELS, NUM_JOINTS, RIGHT_WRIST};
    use ndarray::{Array1, Array3};

    // The window heuristics below are a calibration surface: the expected
    // frames follow the configured ratios and margins, so retuning those
    // values moves these numbers without indicating a bug.

    fn still_sequence(t_len: usize) -> PoseSequence {
        let mut data = Array3::zeros((t_len, NUM_JOINTS, NUM_CHANNELS));
        for t in 0..t_len {
            for j in 0..NUM_JOINTS {
                data[[t, j, 0]] = 0.5;
                data[[t, j, 1]] = 0.5;
                data[[t, j, VISIBILITY]] = 0.9;
            }
            data[[t, LEFT_SHOULDER, 0]] = 0.4;
            data[[t, RIGHT_SHOULDER, 0]] = 0.6;
        }
        PoseSequence::from_raw(data, 30.0, Array1::from_elem(t_len, true)).unwrap()
    }

    fn with_spike(t_len: usize, k: usize, magnitude: f32) -> PoseSequence {
        let mut seq = still_sequence(t_len);
        seq.data[[k, LEFT_WRIST, 0]] += magnitude;
        seq
    }

    fn detector() -> SwingWindowDetector {
        SwingWindowDetector::new(&PipelineConfig::default())
    }

    #[test]
    fn test_spike_is_inside_window() {
        for k in [10, 60, 115] {
            let window = detector().detect(&with_spike(120, k, 0.05));
            assert_eq!(window.method, WindowMethod::WristVelocity);
            assert!(window.start_frame <= k && k <= window.end_frame, "k={k} {window:?}");
            assert!(window.end_frame <= 120);
        }
    }

    #[test]
    fn test_confidence_grows_with_spike_magnitude() {
        let confidences: Vec<f32> = [0.001, 0.005, 0.02, 0.1]
            .iter()
            .map(|&m| detector().detect(&with_spike(90, 45, m)).confidence)
            .collect();
        for pair in confidences.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert!(confidences[0] < confidences[2]);
        assert_eq!(confidences[3], 1.0);
    }

    #[test]
    fn test_short_window_is_widened_to_model_length() {
        // peak 60, crossing at 59/62, post-peak minimum pushes end to 75,
        // padding gives 54..80, then widened to 100 frames
        let window = detector().detect(&with_spike(200, 60, 0.01));
        assert_eq!(window.start_frame, 54);
        assert_eq!(window.end_frame, 154);
    }

    #[test]
    fn test_interpolated_wrist_motion_is_ignored() {
        let mut seq = with_spike(120, 60, 0.05);
        seq.data[[70, RIGHT_WRIST, 1]] += 0.2;
        seq.interpolation_mask[[60, LEFT_WRIST]] = true;
        seq.interpolation_mask[[61, LEFT_WRIST]] = true;

        let speeds = detector().wrist_speeds(&seq);
        assert_eq!(speeds[60], 0.0);
        assert_eq!(speeds[61], 0.0);
        let window = detector().detect(&seq);
        assert!(window.start_frame <= 70 && 70 <= window.end_frame);
    }

    #[test]
    fn test_torso_rotation_fallback() {
        let mut seq = still_sequence(120);
        for t in 0..120 {
            for wrist in WRISTS {
                seq.data[[t, wrist, VISIBILITY]] = 0.1;
            }
        }
        for t in 50..56 {
            let angle = (t - 49) as f32 * 0.2;
            seq.data[[t, RIGHT_SHOULDER, 0]] = 0.5 + 0.1 * angle.cos();
            seq.data[[t, RIGHT_SHOULDER, 1]] = 0.5 + 0.1 * angle.sin();
            seq.data[[t, LEFT_SHOULDER, 0]] = 0.5 - 0.1 * angle.cos();
            seq.data[[t, LEFT_SHOULDER, 1]] = 0.5 - 0.1 * angle.sin();
        }
        let window = detector().detect(&seq);
        assert_eq!(window.method, WindowMethod::TorsoAngle);
        assert!(window.start_frame <= 50 && 55 <= window.end_frame);
        assert_eq!(window.confidence, 1.0);
    }

    #[test]
    fn test_motionless_clip_gets_fixed_low_confidence_window() {
        let window = detector().detect(&still_sequence(60));
        assert_eq!(window.method, WindowMethod::TorsoAngle);
        assert_eq!(window.start_frame, 0);
        assert_eq!(window.end_frame, 24);
        assert_eq!(window.confidence, 0.1);
    }

    #[test]
    fn test_torso_rate_wraps_across_180() {
        let mut seq = still_sequence(2);
        // shoulder line at +179 degrees, then -179 degrees
        for (t, deg) in [(0usize, 179.0f32), (1, -179.0)] {
            let r = deg.to_radians();
            seq.data[[t, LEFT_SHOULDER, 0]] = 0.5;
            seq.data[[t, LEFT_SHOULDER, 1]] = 0.5;
            seq.data[[t, RIGHT_SHOULDER, 0]] = 0.5 + 0.1 * r.cos();
            seq.data[[t, RIGHT_SHOULDER, 1]] = 0.5 + 0.1 * r.sin();
        }
        let rates = torso_angle_speeds(&seq);
        assert!((rates[1] - 2.0 * 30.0).abs() < 0.5);
    }

    #[test]
    fn test_empty_sequence_gives_empty_window() {
        let window = detector().detect(&still_sequence(0));
        assert!(window.is_empty());
    }
}
