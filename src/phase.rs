// src/phase.rs
//! Swing phase state machine driven by wrist, shoulder and hip heights.
//!
//! Works in image coordinates (y grows downwards), so it must see frames that
//! have not been spatially normalized. Used for presentation only.

use crate::config::{PhaseConfig, PipelineConfig};
use crate::joints::{HIPS, SHOULDERS, VISIBILITY, WRISTS};
use crate::sequence::PoseSequence;
use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingPhase {
    Address,
    Takeaway,
    Backswing,
    Top,
    Downswing,
    Impact,
    FollowThrough,
    Finish,
}

impl SwingPhase {
    pub fn label(&self) -> &'static str {
        match self {
            SwingPhase::Address => "Address",
            SwingPhase::Takeaway => "Takeaway",
            SwingPhase::Backswing => "Backswing",
            SwingPhase::Top => "Top",
            SwingPhase::Downswing => "Downswing",
            SwingPhase::Impact => "Impact",
            SwingPhase::FollowThrough => "Follow Through",
            SwingPhase::Finish => "Finish",
        }
    }
}

/// Mean heights of the wrist, shoulder and hip pairs for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodyHeights {
    pub wrist_y: f32,
    pub shoulder_y: f32,
    pub hip_y: f32,
}

impl BodyHeights {
    /// `None` when any of the six joints is missing.
    pub fn from_frame(frame: ArrayView2<'_, f32>) -> Option<Self> {
        let pair_y = |pair: [usize; 2]| -> Option<f32> {
            let mut sum = 0.0;
            for j in pair {
                let (y, vis) = (frame[[j, 1]], frame[[j, VISIBILITY]]);
                if !(vis > 0.0) || !y.is_finite() {
                    return None;
                }
                sum += y;
            }
            Some(sum / 2.0)
        };
        Some(Self {
            wrist_y: pair_y(WRISTS)?,
            shoulder_y: pair_y(SHOULDERS)?,
            hip_y: pair_y(HIPS)?,
        })
    }
}

pub fn starts_takeaway(h: &BodyHeights) -> bool {
    h.wrist_y < h.hip_y
}

pub fn starts_backswing(h: &BodyHeights) -> bool {
    h.wrist_y < h.shoulder_y
}

pub fn reaches_top(h: &BodyHeights, params: &PhaseConfig) -> bool {
    h.wrist_y < h.shoulder_y - params.top_margin
}

pub fn starts_downswing(h: &BodyHeights, highest_wrist_y: f32, params: &PhaseConfig) -> bool {
    h.wrist_y > highest_wrist_y + params.downswing_margin
}

pub fn reaches_impact(h: &BodyHeights) -> bool {
    h.wrist_y > h.hip_y
}

pub fn starts_follow_through(h: &BodyHeights) -> bool {
    h.wrist_y < h.shoulder_y
}

pub fn reaches_finish(h: &BodyHeights, params: &PhaseConfig) -> bool {
    h.wrist_y < h.shoulder_y - params.finish_margin
}

/// One-directional phase tracker. Phases only move forward; frames with
/// missing joints hold the current phase.
#[derive(Debug, Clone)]
pub struct PhaseDetector {
    phase: SwingPhase,
    /// Smallest wrist y seen since the backswing began.
    highest_wrist_y: f32,
    params: PhaseConfig,
}

impl PhaseDetector {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            phase: SwingPhase::Address,
            highest_wrist_y: f32::INFINITY,
            params: config.phase.clone(),
        }
    }

    pub fn phase(&self) -> SwingPhase {
        self.phase
    }

    pub fn reset(&mut self) {
        self.phase = SwingPhase::Address;
        self.highest_wrist_y = f32::INFINITY;
    }

    pub fn update(&mut self, frame: ArrayView2<'_, f32>) -> SwingPhase {
        match BodyHeights::from_frame(frame) {
            Some(heights) => self.advance(&heights),
            None => self.phase,
        }
    }

    pub fn advance(&mut self, h: &BodyHeights) -> SwingPhase {
        if matches!(self.phase, SwingPhase::Backswing | SwingPhase::Top) {
            self.highest_wrist_y = self.highest_wrist_y.min(h.wrist_y);
        }

        let next = match self.phase {
            SwingPhase::Address if starts_takeaway(h) => SwingPhase::Takeaway,
            SwingPhase::Takeaway if starts_backswing(h) => SwingPhase::Backswing,
            SwingPhase::Backswing if reaches_top(h, &self.params) => SwingPhase::Top,
            SwingPhase::Top if starts_downswing(h, self.highest_wrist_y, &self.params) => {
                SwingPhase::Downswing
            }
            SwingPhase::Downswing if reaches_impact(h) => SwingPhase::Impact,
            SwingPhase::Impact if starts_follow_through(h) => SwingPhase::FollowThrough,
            SwingPhase::FollowThrough if reaches_finish(h, &self.params) => SwingPhase::Finish,
            current => current,
        };
        if next != self.phase {
            debug!(from = self.phase.label(), to = next.label(), "phase transition");
            self.phase = next;
        }
        self.phase
    }

    /// Phase per frame from a fresh start. Invalid frames hold the phase.
    pub fn run(&mut self, sequence: &PoseSequence) -> Vec<SwingPhase> {
        self.reset();
        (0..sequence.num_frames())
            .map(|t| {
                if sequence.valid_mask[t] {
                    self.update(sequence.frame(t))
                } else {
                    self.phase
                }
            })
            .collect()
    }
}

/// Contiguous frame range spent in one phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseSegment {
    pub phase: SwingPhase,
    pub start_frame: usize,
    pub end_frame: usize,
}

pub fn phase_segments(timeline: &[SwingPhase]) -> Vec<PhaseSegment> {
    let mut segments: Vec<PhaseSegment> = Vec::new();
    for (t, &phase) in timeline.iter().enumerate() {
        match segments.last_mut() {
            Some(last) if last.phase == phase => last.end_frame = t + 1,
            _ => segments.push(PhaseSegment {
                phase,
                start_frame: t,
                end_frame: t + 1,
            }),
        }
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::joints::{NUM_CHANNELS, NUM_JOINTS};
    use ndarray::{Array1, Array2, Array3, Axis};

    fn heights(wrist_y: f32) -> BodyHeights {
        BodyHeights {
            wrist_y,
            shoulder_y: 0.4,
            hip_y: 0.6,
        }
    }

    fn frame(wrist_y: f32) -> Array2<f32> {
        let mut f = Array2::zeros((NUM_JOINTS, NUM_CHANNELS));
        for (pair, y) in [(WRISTS, wrist_y), (SHOULDERS, 0.4), (HIPS, 0.6)] {
            for j in pair {
                f[[j, 1]] = y;
                f[[j, VISIBILITY]] = 0.9;
            }
        }
        f
    }

    #[test]
    fn test_guards() {
        let params = PhaseConfig::default();
        assert!(starts_takeaway(&heights(0.55)));
        assert!(!starts_takeaway(&heights(0.65)));
        assert!(starts_backswing(&heights(0.35)));
        assert!(reaches_top(&heights(0.15), &params));
        assert!(!reaches_top(&heights(0.25), &params));
        assert!(starts_downswing(&heights(0.2), 0.1, &params));
        assert!(!starts_downswing(&heights(0.14), 0.1, &params));
        assert!(reaches_impact(&heights(0.7)));
        assert!(starts_follow_through(&heights(0.3)));
        assert!(reaches_finish(&heights(0.25), &params));
        assert!(!reaches_finish(&heights(0.35), &params));
    }

    #[test]
    fn test_full_swing_visits_every_phase_in_order() {
        let wrist_track = [
            0.7, 0.7, 0.55, 0.35, 0.25, 0.15, 0.1, 0.12, 0.3, 0.5, 0.7, 0.5, 0.35, 0.25, 0.25,
        ];
        let t_len = wrist_track.len();
        let mut data = Array3::zeros((t_len, NUM_JOINTS, NUM_CHANNELS));
        for (t, &y) in wrist_track.iter().enumerate() {
            data.index_axis_mut(Axis(0), t).assign(&frame(y));
        }
        let seq = PoseSequence::from_raw(data, 30.0, Array1::from_elem(t_len, true)).unwrap();

        let mut detector = PhaseDetector::new(&PipelineConfig::default());
        let timeline = detector.run(&seq);
        assert!(timeline.windows(2).all(|w| w[0] <= w[1]));
        let order: Vec<SwingPhase> = phase_segments(&timeline).iter().map(|s| s.phase).collect();
        assert_eq!(
            order,
            vec![
                SwingPhase::Address,
                SwingPhase::Takeaway,
                SwingPhase::Backswing,
                SwingPhase::Top,
                SwingPhase::Downswing,
                SwingPhase::Impact,
                SwingPhase::FollowThrough,
                SwingPhase::Finish,
            ]
        );
        assert_eq!(detector.phase(), SwingPhase::Finish);
    }

    #[test]
    fn test_missing_joints_hold_phase() {
        let mut detector = PhaseDetector::new(&PipelineConfig::default());
        detector.update(frame(0.55).view());
        assert_eq!(detector.phase(), SwingPhase::Takeaway);

        let mut missing = frame(0.3);
        missing[[HIPS[1], VISIBILITY]] = 0.0;
        assert_eq!(detector.update(missing.view()), SwingPhase::Takeaway);

        let mut nan = frame(0.3);
        nan[[WRISTS[0], 1]] = f32::NAN;
        assert_eq!(detector.update(nan.view()), SwingPhase::Takeaway);
    }

    #[test]
    fn test_never_goes_back() {
        let mut detector = PhaseDetector::new(&PipelineConfig::default());
        detector.advance(&heights(0.55));
        detector.advance(&heights(0.35));
        assert_eq!(detector.phase(), SwingPhase::Backswing);
        // wrists back at address height do not return to Address
        assert_eq!(detector.advance(&heights(0.7)), SwingPhase::Backswing);
    }

    #[test]
    fn test_segments() {
        use SwingPhase::*;
        let segments = phase_segments(&[Address, Address, Takeaway, Takeaway, Takeaway, Top]);
        assert_eq!(segments.len(), 3);
        assert_eq!((segments[1].start_frame, segments[1].end_frame), (2, 5));
        assert!(phase_segments(&[]).is_empty());
    }
}
