// src/landmarker.rs
//! Input boundary: the pose landmark detector seam and recorded detections.

use crate::error::{PipelineError, Result};
use crate::joints::{NUM_CHANNELS, NUM_JOINTS, VISIBILITY};
use crate::sequence::PoseSequence;
use ndarray::{Array1, Array3};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

impl From<[f32; 4]> for Landmark {
    fn from([x, y, z, visibility]: [f32; 4]) -> Self {
        Self { x, y, z, visibility }
    }
}

/// A stateful single-person pose detector.
///
/// Handles are used through `&mut self` and are not shared between callers.
/// `close` releases the underlying model; the handle must not be used after.
pub trait PoseLandmarker {
    type Frame;

    /// Landmarks of the first detected pose, or `None` when nobody is found.
    fn detect(&mut self, frame: &Self::Frame, timestamp_us: i64) -> anyhow::Result<Option<Vec<Landmark>>>;

    fn close(&mut self) {}
}

/// Run the detector over every frame and build a raw sequence.
///
/// Frames without a pose stay zeroed and are marked invalid. Landmarks past
/// the 33rd are ignored.
pub fn extract_sequence<L: PoseLandmarker>(
    landmarker: &mut L,
    frames: &[L::Frame],
    fps: f32,
) -> Result<PoseSequence> {
    let t_len = frames.len();
    let fps_safe = fps.max(1e-3) as f64;
    let mut data = Array3::<f32>::zeros((t_len, NUM_JOINTS, NUM_CHANNELS));
    let mut valid_mask = Array1::from_elem(t_len, false);

    for (idx, frame) in frames.iter().enumerate() {
        let timestamp_us = (idx as f64 * 1_000_000.0 / fps_safe) as i64;
        let landmarks = landmarker
            .detect(frame, timestamp_us)
            .map_err(|e| PipelineError::Detector(format!("frame {idx}: {e:#}")))?;

        let Some(landmarks) = landmarks.filter(|l| !l.is_empty()) else {
            continue;
        };
        for (j, lm) in landmarks.iter().take(NUM_JOINTS).enumerate() {
            data[[idx, j, 0]] = lm.x;
            data[[idx, j, 1]] = lm.y;
            data[[idx, j, 2]] = lm.z;
            data[[idx, j, VISIBILITY]] = lm.visibility;
        }
        valid_mask[idx] = true;
    }

    let detected = valid_mask.iter().filter(|&&v| v).count();
    if detected == 0 && t_len > 0 {
        warn!(frames = t_len, "no pose detected in any frame");
    }
    debug!(frames = t_len, detected, "extracted pose sequence");
    PoseSequence::from_raw(data, fps, valid_mask)
}

/// Source frame indices kept when converting a clip to `target_fps`.
///
/// A frame is kept once its timestamp reaches the next target sample time, so
/// clips are only ever thinned, never padded.
pub fn resample_frame_indices(num_frames: usize, source_fps: f32, target_fps: f32) -> Vec<usize> {
    let source_fps = if source_fps > 0.0 { source_fps } else { target_fps };
    let source_dt = 1.0 / (source_fps as f64).max(1e-3);
    let target_dt = 1.0 / (target_fps as f64).max(1e-3);

    let mut kept = Vec::new();
    let mut next_sample_time = 0.0;
    let mut timestamp = 0.0;
    for idx in 0..num_frames {
        if timestamp + 1e-6 >= next_sample_time {
            kept.push(idx);
            next_sample_time += target_dt;
        }
        timestamp += source_dt;
    }
    kept
}

/// Detector output captured ahead of time, one entry per video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedDetections {
    pub fps: f32,
    pub frames: Vec<Option<Vec<[f32; 4]>>>,
}

impl RecordedDetections {
    pub fn from_json(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let recorded: RecordedDetections = serde_json::from_str(&contents)?;
        if !(recorded.fps > 0.0) {
            return Err(PipelineError::invalid_config("fps", "recording fps must be > 0"));
        }
        Ok(recorded)
    }

    /// Raw sequence on the `target_fps` timeline.
    pub fn to_sequence(&self, target_fps: f32) -> Result<PoseSequence> {
        let indices = resample_frame_indices(self.frames.len(), self.fps, target_fps);
        debug!(
            source = self.frames.len(),
            kept = indices.len(),
            source_fps = self.fps,
            target_fps,
            "resampled recording to target fps"
        );
        let mut replay = ReplayLandmarker::new(self);
        let sequence = extract_sequence(&mut replay, &indices, target_fps);
        replay.close();
        sequence
    }
}

/// Serves recorded detections by source frame index.
#[derive(Debug, Clone)]
pub struct ReplayLandmarker {
    frames: Vec<Option<Vec<Landmark>>>,
    closed: bool,
}

impl ReplayLandmarker {
    pub fn new(recording: &RecordedDetections) -> Self {
        let frames = recording
            .frames
            .iter()
            .map(|f| {
                f.as_ref()
                    .map(|lms| lms.iter().copied().map(Landmark::from).collect())
            })
            .collect();
        Self {
            frames,
            closed: false,
        }
    }
}

impl PoseLandmarker for ReplayLandmarker {
    type Frame = usize;

    fn detect(&mut self, frame: &usize, _timestamp_us: i64) -> anyhow::Result<Option<Vec<Landmark>>> {
        if self.closed {
            anyhow::bail!("replay landmarker used after close");
        }
        match self.frames.get(*frame) {
            Some(detection) => Ok(detection.clone()),
            None => anyhow::bail!("frame {} outside recording of {} frames", frame, self.frames.len()),
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reports a pose on even frames only and records the timestamps it saw.
    struct EvenFrames {
        timestamps: Vec<i64>,
        landmarks: usize,
    }

    impl PoseLandmarker for EvenFrames {
        type Frame = u32;

        fn detect(&mut self, frame: &u32, timestamp_us: i64) -> anyhow::Result<Option<Vec<Landmark>>> {
            self.timestamps.push(timestamp_us);
            if frame % 2 == 1 {
                return Ok(None);
            }
            let lm = Landmark::from([0.5, 0.25, -0.1, 0.8]);
            Ok(Some(vec![lm; self.landmarks]))
        }
    }

    struct Broken;

    impl PoseLandmarker for Broken {
        type Frame = ();

        fn detect(&mut self, _: &(), _: i64) -> anyhow::Result<Option<Vec<Landmark>>> {
            anyhow::bail!("model not loaded")
        }
    }

    #[test]
    fn test_missing_detections_are_invalid_frames() {
        let mut detector = EvenFrames {
            timestamps: Vec::new(),
            landmarks: 40,
        };
        let seq = extract_sequence(&mut detector, &[0, 1, 2, 3], 25.0).unwrap();
        assert_eq!(seq.valid_mask.to_vec(), vec![true, false, true, false]);
        assert_eq!(seq.data[[2, 32, 1]], 0.25);
        assert_eq!(seq.data[[2, 32, VISIBILITY]], 0.8);
        assert_eq!(seq.data[[1, 0, VISIBILITY]], 0.0);
        assert_eq!(detector.timestamps, vec![0, 40_000, 80_000, 120_000]);
        assert!(seq.interpolation_mask.iter().all(|&m| !m));
    }

    #[test]
    fn test_detector_errors_surface() {
        let err = extract_sequence(&mut Broken, &[(), ()], 30.0).unwrap_err();
        assert!(matches!(err, PipelineError::Detector(ref msg) if msg.contains("model not loaded")));
    }

    #[test]
    fn test_frame_index_resampling() {
        assert_eq!(resample_frame_indices(6, 60.0, 30.0), vec![0, 2, 4]);
        assert_eq!(resample_frame_indices(5, 30.0, 30.0), vec![0, 1, 2, 3, 4]);
        assert_eq!(resample_frame_indices(4, 24.0, 30.0), vec![0, 1, 2, 3]);
        assert_eq!(resample_frame_indices(3, 0.0, 30.0), vec![0, 1, 2]);
        assert!(resample_frame_indices(0, 60.0, 30.0).is_empty());
    }

    #[test]
    fn test_replay_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("detections.json");
        std::fs::write(
            &path,
            r#"{"fps": 60.0, "frames": [[[0.1, 0.2, 0.0, 0.9]], null, [[0.3, 0.4, 0.0, 0.9]], null]}"#,
        )
        .unwrap();

        let recording = RecordedDetections::from_json(&path).unwrap();
        let seq = recording.to_sequence(30.0).unwrap();
        assert_eq!(seq.num_frames(), 2);
        assert_eq!(seq.fps, 30.0);
        assert_eq!(seq.data[[1, 0, 0]], 0.3);
        assert!(seq.valid_mask.iter().all(|&v| v));
    }

    #[test]
    fn test_replay_refuses_after_close() {
        let recording = RecordedDetections {
            fps: 30.0,
            frames: vec![None],
        };
        let mut replay = ReplayLandmarker::new(&recording);
        assert!(replay.detect(&0, 0).unwrap().is_none());
        assert!(replay.detect(&3, 0).is_err());
        replay.close();
        assert!(replay.detect(&0, 0).is_err());
    }
}
