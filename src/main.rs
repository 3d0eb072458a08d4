// src/main.rs
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use swing_kinematics::phase::{phase_segments, PhaseSegment};
use swing_kinematics::pipeline::SwingMetrics;
use swing_kinematics::quality::QualityMetrics;
use swing_kinematics::{FeatureScaler, PipelineConfig, RecordedDetections, SwingPipeline, SwingWindow};

#[derive(Debug, Serialize)]
struct AnalysisReport {
    source: PathBuf,
    frames: usize,
    window: SwingWindow,
    used_full_clip: bool,
    scaled: bool,
    metrics: SwingMetrics,
    quality: QualityMetrics,
    interpolation_ratio: f32,
    phases: Vec<PhaseSegment>,
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let Some(detections_path) = args.next().map(PathBuf::from) else {
        bail!("usage: swing_kinematics <detections.json> [config.json]");
    };

    let config = match args.next() {
        Some(path) => PipelineConfig::from_json(Path::new(&path))
            .with_context(|| format!("loading config {path}"))?,
        None => PipelineConfig::default(),
    };

    let recording = RecordedDetections::from_json(&detections_path)
        .with_context(|| format!("loading detections {}", detections_path.display()))?;
    let raw = recording.to_sequence(config.target_fps)?;

    let scaler_path = config.output.scaler_path();
    let mut pipeline = SwingPipeline::new(config)?;
    if scaler_path.exists() {
        let scaler = FeatureScaler::load(&scaler_path)
            .with_context(|| format!("loading scaler {}", scaler_path.display()))?;
        tracing::info!(path = %scaler_path.display(), "applying feature scaler");
        pipeline = pipeline.with_scaler(scaler);
    }

    let analysis = pipeline.analyze(&raw)?;
    let report = AnalysisReport {
        source: detections_path,
        frames: raw.num_frames(),
        window: analysis.window,
        used_full_clip: analysis.used_full_clip,
        scaled: analysis.scaled,
        metrics: analysis.metrics,
        interpolation_ratio: analysis.prepared.sequence.interpolation_ratio(),
        quality: analysis.prepared.quality,
        phases: phase_segments(&analysis.phases),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
