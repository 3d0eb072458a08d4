// src/joints.rs
//! Pose landmark numbering used by the upstream detector (33 landmarks).
//!
//! These indices are fixed by the detector's output layout. Everything in the
//! crate addresses joints through this table.

pub const NUM_JOINTS: usize = 33;

/// Channels of a raw landmark: x, y, z, visibility.
pub const NUM_CHANNELS: usize = 4;
pub const VISIBILITY: usize = 3;

pub const NOSE: usize = 0;
pub const LEFT_SHOULDER: usize = 11;
pub const RIGHT_SHOULDER: usize = 12;
pub const LEFT_ELBOW: usize = 13;
pub const RIGHT_ELBOW: usize = 14;
pub const LEFT_WRIST: usize = 15;
pub const RIGHT_WRIST: usize = 16;
pub const LEFT_PINKY: usize = 17;
pub const RIGHT_PINKY: usize = 18;
pub const LEFT_HIP: usize = 23;
pub const RIGHT_HIP: usize = 24;
pub const LEFT_KNEE: usize = 25;
pub const RIGHT_KNEE: usize = 26;
pub const LEFT_ANKLE: usize = 27;
pub const RIGHT_ANKLE: usize = 28;

pub const WRISTS: [usize; 2] = [LEFT_WRIST, RIGHT_WRIST];
pub const SHOULDERS: [usize; 2] = [LEFT_SHOULDER, RIGHT_SHOULDER];
pub const HIPS: [usize; 2] = [LEFT_HIP, RIGHT_HIP];

/// Left/right pairs reported by the quality metrics.
pub const KEY_JOINT_GROUPS: [(&str, (usize, usize)); 6] = [
    ("hips", (LEFT_HIP, RIGHT_HIP)),
    ("shoulders", (LEFT_SHOULDER, RIGHT_SHOULDER)),
    ("elbows", (LEFT_ELBOW, RIGHT_ELBOW)),
    ("wrists", (LEFT_WRIST, RIGHT_WRIST)),
    ("knees", (LEFT_KNEE, RIGHT_KNEE)),
    ("ankles", (LEFT_ANKLE, RIGHT_ANKLE)),
];

/// Joints carrying an angle feature, with the (a, b, c) chain whose angle is
/// measured at `b`.
pub const ANGLE_TRIPLETS: [(usize, (usize, usize, usize)); 6] = [
    (LEFT_ELBOW, (LEFT_SHOULDER, LEFT_ELBOW, LEFT_WRIST)),
    (RIGHT_ELBOW, (RIGHT_SHOULDER, RIGHT_ELBOW, RIGHT_WRIST)),
    (LEFT_WRIST, (LEFT_ELBOW, LEFT_WRIST, LEFT_PINKY)),
    (RIGHT_WRIST, (RIGHT_ELBOW, RIGHT_WRIST, RIGHT_PINKY)),
    (LEFT_KNEE, (LEFT_HIP, LEFT_KNEE, LEFT_ANKLE)),
    (RIGHT_KNEE, (RIGHT_HIP, RIGHT_KNEE, RIGHT_ANKLE)),
];

/// Joints feeding the torso globals (x-factor, hip-shoulder separation).
pub const TORSO_JOINTS: [usize; 4] = [LEFT_SHOULDER, RIGHT_SHOULDER, LEFT_HIP, RIGHT_HIP];
