// src/dataset.rs
//! Training dataset assembly: per-sample bundles, video-level splits,
//! leakage-safe scaler fitting and metadata export.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::features::SampleFeatures;
use crate::pipeline::SwingPipeline;
use crate::quality::QualityMetrics;
use crate::scaler::{FeatureScaler, ScalerAccumulator};
use crate::sequence::PoseSequence;
use chrono::Local;
use csv::Writer;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array2, Array3};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const SPLIT_MANIFEST: &str = "dataset_splits.json";
pub const METADATA_CSV: &str = "processed_metadata.csv";
const BUNDLE_EXT: &str = "json.gz";
const DROPOUT_SUFFIX: &str = "dropout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

/// Per-sample artifact: features, label and diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBundle {
    #[serde(rename = "X_joint")]
    pub joint: Array3<f32>,
    #[serde(rename = "X_global")]
    pub global: Array2<f32>,
    pub y: i64,
    pub band_str: String,
    pub env: String,
    pub video_id: String,
    pub low_quality: bool,
    pub interpolation_ratio: f32,
    pub quality: QualityMetrics,
}

/// Interpolation mask stored next to a sample under the same name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskBundle {
    pub interpolation_mask: Array2<bool>,
}

/// One row of the dataset metadata table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub sample_name: String,
    /// Base video id, shared by every variant of the same video.
    pub video_id: String,
    pub augmented: bool,
    pub env: String,
    pub band: String,
    pub band_id: i64,
    /// Relative to the output root.
    pub sequence_path: String,
    pub interpolation_mask_path: String,
    pub low_quality: bool,
    pub valid_ratio: f32,
    pub mean_visibility: f32,
    pub longest_dropout: usize,
    pub interpolation_ratio: f32,
    pub build: String,
    pub split: Option<Split>,
}

pub struct DatasetBuilder {
    config: PipelineConfig,
    pipeline: SwingPipeline,
    build_name: String,
    records: Vec<SampleRecord>,
    /// Statistics from the last `fit_scaler`, consumed by `finalize_scaler`.
    accumulator: Option<ScalerAccumulator>,
    rng: StdRng,
}

impl DatasetBuilder {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let pipeline = SwingPipeline::new(config.clone())?;
        let build_name = format!("build_{}", Local::now().format("%Y%m%d_%H%M%S"));
        Ok(Self {
            rng: StdRng::seed_from_u64(config.augmentation.seed),
            config,
            pipeline,
            build_name,
            records: Vec::new(),
            accumulator: None,
        })
    }

    pub fn with_build_name(mut self, name: impl Into<String>) -> Self {
        self.build_name = name.into();
        self
    }

    pub fn build_name(&self) -> &str {
        &self.build_name
    }

    pub fn records(&self) -> &[SampleRecord] {
        &self.records
    }

    /// Process one raw clip into a base sample and, if requested, a dropout
    /// variant. Failures are logged and the clip is skipped; returns the
    /// number of samples written.
    pub fn add_video(
        &mut self,
        video_id: &str,
        env: &str,
        band: &str,
        raw: &PoseSequence,
        augment: bool,
    ) -> usize {
        match self.try_add_video(video_id, env, band, raw, augment) {
            Ok(names) => names.len(),
            Err(e) => {
                warn!(video_id, error = %e, "skipping sample");
                0
            }
        }
    }

    pub fn try_add_video(
        &mut self,
        video_id: &str,
        env: &str,
        band: &str,
        raw: &PoseSequence,
        augment: bool,
    ) -> Result<Vec<String>> {
        self.band_id(band)?;
        self.check_env(env)?;

        let window = self.pipeline.detect_window(raw);
        let (sliced, _) = self.pipeline.slice_to_window(raw, &window);
        let prepared = self.pipeline.prepare_sequence(&sliced)?;
        let features = self.pipeline.compute_features(&prepared);
        let mask = &prepared.sequence.interpolation_mask;

        let mut names = vec![self.save_sample(
            video_id,
            env,
            band,
            &features,
            mask,
            &prepared.quality,
            None,
        )?];
        if augment {
            let dropped = self
                .pipeline
                .feature_engineer()
                .augment_missingness_dropout(&features, &mut self.rng);
            names.push(self.save_sample(
                video_id,
                env,
                band,
                &dropped,
                mask,
                &prepared.quality,
                Some(DROPOUT_SUFFIX),
            )?);
        }
        Ok(names)
    }

    /// Write the sequence and mask bundles of one sample and record it.
    /// Returns the sample name `<video>[__<suffix>]__<env>__<band>`.
    #[allow(clippy::too_many_arguments)]
    pub fn save_sample(
        &mut self,
        video_id: &str,
        env: &str,
        band: &str,
        features: &SampleFeatures,
        interpolation_mask: &Array2<bool>,
        quality: &QualityMetrics,
        augmented_suffix: Option<&str>,
    ) -> Result<String> {
        self.check_env(env)?;
        let band_id = self.band_id(band)?;

        let interpolation_ratio = if interpolation_mask.is_empty() {
            0.0
        } else {
            interpolation_mask.iter().filter(|&&m| m).count() as f32
                / interpolation_mask.len() as f32
        };
        let suffix = augmented_suffix
            .filter(|s| !s.is_empty())
            .map(|s| format!("__{s}"))
            .unwrap_or_default();
        let sample_name = format!("{video_id}{suffix}__{env}__{band}");

        let layout = &self.config.output;
        let sequence_rel = Path::new(&layout.sequence_subdir).join(bundle_file(&sample_name));
        let mask_rel = Path::new(&layout.mask_subdir).join(bundle_file(&sample_name));

        let bundle = SampleBundle {
            joint: features.joint.clone(),
            global: features.global.clone(),
            y: band_id,
            band_str: band.to_string(),
            env: env.to_string(),
            video_id: video_id.to_string(),
            low_quality: quality.low_quality,
            interpolation_ratio,
            quality: quality.clone(),
        };
        write_gz_json(&layout.root.join(&sequence_rel), &bundle)?;
        write_gz_json(
            &layout.root.join(&mask_rel),
            &MaskBundle {
                interpolation_mask: interpolation_mask.clone(),
            },
        )?;

        debug!(sample = %sample_name, interpolation_ratio, "saved sample");
        self.records.push(SampleRecord {
            sample_name: sample_name.clone(),
            video_id: video_id.to_string(),
            augmented: !suffix.is_empty(),
            env: env.to_string(),
            band: band.to_string(),
            band_id,
            sequence_path: sequence_rel.to_string_lossy().into_owned(),
            interpolation_mask_path: mask_rel.to_string_lossy().into_owned(),
            low_quality: quality.low_quality,
            valid_ratio: quality.valid_ratio,
            mean_visibility: quality.mean_visibility,
            longest_dropout: quality.longest_dropout,
            interpolation_ratio,
            build: self.build_name.clone(),
            split: None,
        });
        Ok(sample_name)
    }

    /// Seeded video-level split. Variants take their base video's split.
    pub fn assign_splits(&mut self) -> BTreeMap<String, Split> {
        let mut base_ids: Vec<String> = self
            .records
            .iter()
            .filter(|r| !r.augmented)
            .map(|r| r.video_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut rng = StdRng::seed_from_u64(self.config.dataset.split_seed);
        base_ids.shuffle(&mut rng);

        let total = base_ids.len();
        let train_cut = (total as f64 * self.config.dataset.train_ratio) as usize;
        let val_cut = train_cut + (total as f64 * self.config.dataset.val_ratio) as usize;
        let split_map: BTreeMap<String, Split> = base_ids
            .into_iter()
            .enumerate()
            .map(|(idx, vid)| {
                let split = if idx < train_cut {
                    Split::Train
                } else if idx < val_cut {
                    Split::Val
                } else {
                    Split::Test
                };
                (vid, split)
            })
            .collect();

        for record in &mut self.records {
            let split = match split_map.get(&record.video_id) {
                Some(&split) => split,
                None => {
                    warn!(sample = %record.sample_name, "variant without a base video, assigning to train");
                    Split::Train
                }
            };
            record.split = Some(split);
        }
        info!(videos = total, train = train_cut, val = val_cut - train_cut, "assigned splits");
        split_map
    }

    /// Assign splits and write the manifest.
    pub fn export_splits(&mut self) -> Result<PathBuf> {
        let split_map = self.assign_splits();
        let dir = self.config.output.split_dir();
        std::fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        let path = dir.join(SPLIT_MANIFEST);
        let json = serde_json::to_string_pretty(&split_map)?;
        std::fs::write(&path, json).map_err(|e| PipelineError::io(&path, e))?;
        Ok(path)
    }

    /// Accumulate scaler statistics over eligible saved samples: train split,
    /// not augmented, not low quality (when configured) and interpolation
    /// ratio within the threshold. Returns the number of samples used.
    ///
    /// Every record must already carry a split. A fit that finds no eligible
    /// sample leaves nothing to finalize.
    pub fn fit_scaler(&mut self) -> Result<usize> {
        if let Some(record) = self.records.iter().find(|r| r.split.is_none()) {
            return Err(PipelineError::SplitNotAssigned {
                sample: record.sample_name.clone(),
            });
        }

        let root = &self.config.output.root;
        let dataset = &self.config.dataset;
        let mut accumulator = ScalerAccumulator::new();
        for record in &self.records {
            let eligible = record.split == Some(Split::Train)
                && !record.augmented
                && !(dataset.exclude_low_quality && record.low_quality)
                && record.interpolation_ratio <= dataset.interpolation_threshold;
            if !eligible {
                continue;
            }

            let sequence_path = root.join(&record.sequence_path);
            if !sequence_path.exists() {
                warn!(path = %sequence_path.display(), "saved sequence missing, skipping");
                continue;
            }
            let bundle: SampleBundle = read_gz_json(&sequence_path)?;
            let mask_path = root.join(&record.interpolation_mask_path);
            let mask = if mask_path.exists() {
                read_gz_json::<MaskBundle>(&mask_path)?.interpolation_mask
            } else {
                warn!(path = %mask_path.display(), "mask missing, using every frame");
                Array2::from_elem((bundle.joint.shape()[0], bundle.joint.shape()[1]), false)
            };
            let features = SampleFeatures {
                joint: bundle.joint,
                global: bundle.global,
            };
            accumulator.observe(&features, &mask)?;
        }

        let used = accumulator.samples();
        if used == 0 {
            warn!(total = self.records.len(), "no eligible samples for the scaler fit");
            self.accumulator = None;
        } else {
            info!(used, total = self.records.len(), "fitted scaler statistics");
            self.accumulator = Some(accumulator);
        }
        Ok(used)
    }

    /// Turn the fitted statistics into a scaler and write it to disk. Each fit
    /// can be finalized once; the scaler file is never written without one.
    pub fn finalize_scaler(&mut self) -> Result<FeatureScaler> {
        let accumulator = self.accumulator.take().ok_or(PipelineError::ScalerNotFitted)?;
        let scaler = accumulator.finalize(self.config.features.variance_floor);
        let path = self.config.output.scaler_path();
        scaler.save(&path)?;
        info!(path = %path.display(), "wrote feature scaler");
        Ok(scaler)
    }

    /// Standardize every sample this builder saved, in place.
    pub fn normalize_saved_sequences(&self, scaler: &FeatureScaler) -> Result<usize> {
        let root = &self.config.output.root;
        let mut normalized = 0;
        for record in &self.records {
            let path = root.join(&record.sequence_path);
            if !path.exists() {
                continue;
            }
            let mut bundle: SampleBundle = read_gz_json(&path)?;
            let scaled = scaler.apply(&SampleFeatures {
                joint: bundle.joint,
                global: bundle.global,
            })?;
            bundle.joint = scaled.joint;
            bundle.global = scaled.global;
            write_gz_json(&path, &bundle)?;
            normalized += 1;
        }
        Ok(normalized)
    }

    pub fn export_metadata(&self) -> Result<PathBuf> {
        let dir = self.config.output.metadata_dir();
        std::fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
        let path = dir.join(METADATA_CSV);
        let file = File::create(&path).map_err(|e| PipelineError::io(&path, e))?;
        let mut writer = Writer::from_writer(file);
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush().map_err(|e| PipelineError::io(&path, e))?;
        Ok(path)
    }

    fn check_env(&self, env: &str) -> Result<()> {
        if self.config.dataset.environments.iter().any(|e| e == env) {
            Ok(())
        } else {
            Err(PipelineError::UnknownEnvironment(env.to_string()))
        }
    }

    fn band_id(&self, band: &str) -> Result<i64> {
        self.config
            .dataset
            .bands
            .get(band)
            .copied()
            .ok_or_else(|| PipelineError::UnknownBand(band.to_string()))
    }
}

fn bundle_file(sample_name: &str) -> String {
    format!("{sample_name}.{BUNDLE_EXT}")
}

/// Gzip-compressed JSON, written to a temporary file and renamed into place.
pub fn write_gz_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    let tmp = dir.join(format!(".{}.tmp", Uuid::new_v4()));

    let file = File::create(&tmp).map_err(|e| PipelineError::io(&tmp, e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut encoder, value)?;
    encoder
        .finish()
        .and_then(|mut w| w.flush())
        .map_err(|e| PipelineError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| PipelineError::io(path, e))
}

pub fn read_gz_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let decoder = GzDecoder::new(BufReader::new(file));
    Ok(serde_json::from_reader(decoder)?)
}
