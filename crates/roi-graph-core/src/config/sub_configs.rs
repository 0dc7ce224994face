//! Sub-configuration structures for the tracking pipeline.
//!
//! This module contains the individual section structs that make up the
//! main `Config` structure. Every struct rejects unknown fields.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::clustering::{LinkageParams, SearchBounds, SearchBudget};
use crate::error::{TrackingError, TrackingResult};
use crate::fusion::{DistanceTransform, FusionRule, ModalityWeighting};
use crate::types::Modality;

/// General run settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    /// Seed for every pseudo-random draw in the pipeline.
    #[serde(default)]
    pub random_seed: u64,
    /// Name recorded in the results metadata.
    #[serde(default = "default_run_name")]
    pub run_name: String,
}

fn default_run_name() -> String {
    "roi_tracking".to_string()
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            random_seed: 0,
            run_name: default_run_name(),
        }
    }
}

/// Where session data comes from.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// One JSON file per session in `dir_outer`, sessions ordered by file name.
    Json,
    /// Deterministically generated sessions.
    #[default]
    Synthetic,
}

/// Generator settings for `data_kind = "synthetic"`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SyntheticConfig {
    #[serde(default = "default_n_sessions")]
    pub n_sessions: usize,
    #[serde(default = "default_max_rois_per_session")]
    pub max_rois_per_session: usize,
    /// Size of the underlying cell population.
    #[serde(default = "default_n_identities")]
    pub n_identities: usize,
    #[serde(default = "default_fov")]
    pub fov_height: usize,
    #[serde(default = "default_fov")]
    pub fov_width: usize,
    /// Radius of each footprint blob in pixels.
    #[serde(default = "default_blob_radius")]
    pub blob_radius: usize,
    /// Standard deviation of per-session position drift in pixels.
    #[serde(default = "default_position_jitter")]
    pub position_jitter: f32,
    /// Probability that a cell is detected in a given session.
    #[serde(default = "default_presence_probability")]
    pub presence_probability: f64,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default = "default_wavelet_dim")]
    pub wavelet_dim: usize,
    /// Standard deviation of per-session feature noise.
    #[serde(default = "default_feature_noise")]
    pub feature_noise: f32,
}

// ============================================================================
// Serde Default Functions for SyntheticConfig
// ============================================================================

fn default_n_sessions() -> usize {
    10
}

fn default_max_rois_per_session() -> usize {
    100
}

fn default_n_identities() -> usize {
    110
}

fn default_fov() -> usize {
    128
}

fn default_blob_radius() -> usize {
    3
}

fn default_position_jitter() -> f32 {
    0.7
}

fn default_presence_probability() -> f64 {
    0.85
}

fn default_embedding_dim() -> usize {
    32
}

fn default_wavelet_dim() -> usize {
    16
}

fn default_feature_noise() -> f32 {
    0.35
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            n_sessions: default_n_sessions(),
            max_rois_per_session: default_max_rois_per_session(),
            n_identities: default_n_identities(),
            fov_height: default_fov(),
            fov_width: default_fov(),
            blob_radius: default_blob_radius(),
            position_jitter: default_position_jitter(),
            presence_probability: default_presence_probability(),
            embedding_dim: default_embedding_dim(),
            wavelet_dim: default_wavelet_dim(),
            feature_noise: default_feature_noise(),
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> TrackingResult<()> {
        let p = "data_loading.synthetic";
        if self.n_sessions == 0 || self.max_rois_per_session == 0 || self.n_identities == 0 {
            return Err(TrackingError::config(format!(
                "{}.n_sessions, max_rois_per_session and n_identities must be greater than 0",
                p
            )));
        }
        let min_fov = 2 * self.blob_radius + 1;
        if self.fov_height < min_fov || self.fov_width < min_fov {
            return Err(TrackingError::config(format!(
                "{}: FOV {}x{} cannot hold a blob of radius {}",
                p, self.fov_height, self.fov_width, self.blob_radius
            )));
        }
        if !(self.presence_probability > 0.0 && self.presence_probability <= 1.0) {
            return Err(TrackingError::config(format!(
                "{}.presence_probability must be in (0, 1], got {}",
                p, self.presence_probability
            )));
        }
        if self.embedding_dim == 0 || self.wavelet_dim == 0 {
            return Err(TrackingError::config(format!(
                "{}.embedding_dim and wavelet_dim must be greater than 0",
                p
            )));
        }
        for (name, v) in [("position_jitter", self.position_jitter), ("feature_noise", self.feature_noise)] {
            if !(v.is_finite() && v >= 0.0) {
                return Err(TrackingError::config(format!("{}.{} must be >= 0, got {}", p, name, v)));
            }
        }
        Ok(())
    }
}

/// Data loading configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DataLoadingConfig {
    /// Directory holding session files (required for `json`).
    #[serde(default)]
    pub dir_outer: Option<PathBuf>,
    #[serde(default)]
    pub data_kind: DataKind,
    #[serde(default)]
    pub synthetic: SyntheticConfig,
}

impl DataLoadingConfig {
    pub fn validate(&self) -> TrackingResult<()> {
        match self.data_kind {
            DataKind::Json if self.dir_outer.is_none() => Err(TrackingError::config(
                "data_loading.dir_outer is required when data_kind = \"json\"",
            )),
            DataKind::Json => Ok(()),
            DataKind::Synthetic => self.synthetic.validate(),
        }
    }
}

/// Similarity computation settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SimilarityConfig {
    /// Modalities to compute, in any order.
    #[serde(default = "default_modalities")]
    pub modalities: Vec<Modality>,
    /// Largest session-index distance of a candidate pair; every pair when unset.
    #[serde(default)]
    pub max_session_gap: Option<usize>,
    /// Footprint overlap a pair must exceed to become a candidate.
    #[serde(default)]
    pub min_footprint_overlap: f32,
    /// Exponent applied to footprint weights before normalization.
    #[serde(default = "default_sf_mask_power")]
    pub sf_mask_power: f32,
    /// Subtract the population mean before cosine similarity.
    #[serde(default = "default_center_features")]
    pub center_features: bool,
}

fn default_modalities() -> Vec<Modality> {
    Modality::all().to_vec()
}

fn default_sf_mask_power() -> f32 {
    1.0
}

fn default_center_features() -> bool {
    true
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            modalities: default_modalities(),
            max_session_gap: None,
            min_footprint_overlap: 0.0,
            sf_mask_power: default_sf_mask_power(),
            center_features: default_center_features(),
        }
    }
}

impl SimilarityConfig {
    pub fn validate(&self) -> TrackingResult<()> {
        if self.modalities.is_empty() {
            return Err(TrackingError::config("similarity.modalities must not be empty"));
        }
        let mut seen = self.modalities.clone();
        seen.sort();
        seen.dedup();
        if seen.len() != self.modalities.len() {
            return Err(TrackingError::config("similarity.modalities contains duplicates"));
        }
        if !(self.min_footprint_overlap.is_finite() && (0.0..1.0).contains(&self.min_footprint_overlap)) {
            return Err(TrackingError::config(format!(
                "similarity.min_footprint_overlap must be in [0, 1), got {}",
                self.min_footprint_overlap
            )));
        }
        if !(self.sf_mask_power.is_finite() && self.sf_mask_power > 0.0) {
            return Err(TrackingError::config(format!(
                "similarity.sf_mask_power must be > 0, got {}",
                self.sf_mask_power
            )));
        }
        Ok(())
    }
}

/// Fusion policy: per-modality weighting, combination rule and distance.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FusionConfig {
    #[serde(default)]
    pub spatial_footprint: ModalityWeighting,
    #[serde(default)]
    pub embedding: ModalityWeighting,
    #[serde(default)]
    pub wavelet: ModalityWeighting,
    #[serde(default)]
    pub rule: FusionRule,
    #[serde(default)]
    pub distance: DistanceTransform,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            spatial_footprint: ModalityWeighting::default(),
            embedding: ModalityWeighting::default(),
            wavelet: ModalityWeighting::default(),
            rule: FusionRule::default(),
            distance: DistanceTransform::default(),
        }
    }
}

impl FusionConfig {
    pub fn weighting(&self, modality: Modality) -> &ModalityWeighting {
        match modality {
            Modality::SpatialFootprint => &self.spatial_footprint,
            Modality::Embedding => &self.embedding,
            Modality::Wavelet => &self.wavelet,
        }
    }

    pub fn weighting_mut(&mut self, modality: Modality) -> &mut ModalityWeighting {
        match modality {
            Modality::SpatialFootprint => &mut self.spatial_footprint,
            Modality::Embedding => &mut self.embedding,
            Modality::Wavelet => &mut self.wavelet,
        }
    }

    pub fn validate(&self) -> TrackingResult<()> {
        for m in Modality::all() {
            let w = self.weighting(m);
            if !(w.weight.is_finite() && w.weight >= 0.0) {
                return Err(TrackingError::config(format!(
                    "fusion.{}.weight must be >= 0, got {}",
                    m, w.weight
                )));
            }
            if w.required && !w.enabled {
                return Err(TrackingError::config(format!(
                    "fusion.{} is required but not enabled",
                    m
                )));
            }
        }
        if !Modality::all()
            .iter()
            .any(|&m| self.weighting(m).enabled && self.weighting(m).weight > 0.0)
        {
            return Err(TrackingError::config(
                "fusion needs at least one enabled modality with a positive weight",
            ));
        }
        Ok(())
    }
}

/// Automatic mixing-parameter search settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AutomaticMixingConfig {
    #[serde(rename = "kwargs_findParameters", default)]
    pub find_parameters: SearchBudget,
    /// Parallel trial workers. Values above 1 break reproducibility.
    #[serde(rename = "n_jobs_findParameters", default = "default_n_jobs")]
    pub n_jobs: usize,
    #[serde(default)]
    pub bounds: SearchBounds,
    /// Histogram bins of the separation objective.
    #[serde(default = "default_n_bins")]
    pub n_bins: usize,
}

fn default_n_jobs() -> usize {
    1
}

fn default_n_bins() -> usize {
    50
}

impl Default for AutomaticMixingConfig {
    fn default() -> Self {
        Self {
            find_parameters: SearchBudget::default(),
            n_jobs: default_n_jobs(),
            bounds: SearchBounds::default(),
            n_bins: default_n_bins(),
        }
    }
}

/// Clustering configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ClusteringConfig {
    #[serde(default)]
    pub automatic_mixing: AutomaticMixingConfig,
    #[serde(default)]
    pub linkage: LinkageParams,
}

impl ClusteringConfig {
    pub fn validate(&self) -> TrackingResult<()> {
        let mixing = &self.automatic_mixing;
        mixing.find_parameters.validate()?;
        mixing.bounds.validate()?;
        if mixing.n_jobs == 0 {
            return Err(TrackingError::config(
                "clustering.automatic_mixing.n_jobs_findParameters must be greater than 0",
            ));
        }
        if mixing.n_bins < 4 {
            return Err(TrackingError::config(format!(
                "clustering.automatic_mixing.n_bins must be >= 4, got {}",
                mixing.n_bins
            )));
        }
        self.linkage
            .validate()
            .map_err(|e| TrackingError::config(format!("clustering.linkage: {}", e)))
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub include_location: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            include_location: false,
        }
    }
}
