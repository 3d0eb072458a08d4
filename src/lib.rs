// src/lib.rs
//! Golf swing pose-sequence processing.
//!
//! Raw per-frame landmarks are repaired, spatially normalized, cut down to the
//! swing, resampled to a fixed length and turned into kinematic features for a
//! swing-speed classifier. `dataset` assembles those features into a training
//! set with a leakage-safe scaler.

pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod joints;
pub mod landmarker;
pub mod normalize;
pub mod phase;
pub mod pipeline;
pub mod quality;
pub mod repair;
pub mod resample;
pub mod scaler;
pub mod sequence;
pub mod window;

pub use config::PipelineConfig;
pub use dataset::{DatasetBuilder, SampleRecord, Split};
pub use error::{PipelineError, Result};
pub use features::{FeatureEngineer, SampleFeatures};
pub use landmarker::{Landmark, PoseLandmarker, RecordedDetections};
pub use phase::{PhaseDetector, SwingPhase};
pub use pipeline::{SwingAnalysis, SwingPipeline};
pub use scaler::FeatureScaler;
pub use sequence::{PoseSequence, SwingWindow};
