//! Consumer-facing results and diagnostic run data.
//!
//! `results.json` holds what downstream tools need: labels, ROI metadata, a
//! summary of the input, quality metrics and the search history.
//! `run_data.json` holds every intermediate matrix so runs can be compared
//! by content hash.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clustering::{ClusterLabeling, QualityMetrics, SearchOutcome};
use crate::config::DataKind;
use crate::error::{TrackingError, TrackingResult};
use crate::sparse::SparseMatrix;
use crate::types::Modality;

pub const RESULTS_FILE: &str = "results.json";
pub const RUN_DATA_FILE: &str = "run_data.json";
pub const RUN_DATA_HASHES_FILE: &str = "run_data_hashes.json";

/// Non-fatal conditions recorded alongside the results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// Trials ran in parallel; proposals depended on completion order.
    Reproducibility { n_jobs: usize },
    /// No same-session candidate pairs; the objective had no null reference.
    EmptyNullDistribution,
}

/// Per-ROI metadata in global index order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiSummary {
    pub n_sessions: usize,
    pub n_rois_total: usize,
    pub n_rois_per_session: Vec<usize>,
    pub fov_height: usize,
    pub fov_width: usize,
    pub session_of: Vec<usize>,
    /// Weighted `(y, x)` centre of each footprint.
    pub centroids: Vec<Option<(f32, f32)>>,
    /// `n_rois x n_sessions` membership.
    pub session_bool: SparseMatrix<bool>,
}

/// What the run was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSummary {
    pub data_kind: DataKind,
    pub dir_outer: Option<PathBuf>,
    pub session_names: Vec<String>,
    pub modalities: Vec<Modality>,
    /// SHA-256 of the serialized sessions.
    pub digest: String,
}

impl InputSummary {
    pub fn is_empty(&self) -> bool {
        self.session_names.is_empty() || self.modalities.is_empty() || self.digest.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub run_name: String,
    pub random_seed: u64,
    pub n_jobs: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub version: String,
}

/// Final output of one tracking run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingResults {
    pub clusters: ClusterLabeling,
    #[serde(rename = "ROIs")]
    pub rois: RoiSummary,
    pub input_data: InputSummary,
    pub quality_metrics: QualityMetrics,
    pub search: SearchOutcome,
    pub warnings: Vec<PipelineWarning>,
    pub metadata: RunMetadata,
}

impl TrackingResults {
    /// Fail with `EmptyOutput` naming the first empty section.
    pub fn check_non_empty(&self) -> TrackingResult<()> {
        let n_clusters = self.clusters.n_clusters();
        let empty = if n_clusters == 0 {
            Some("clusters")
        } else if self.rois.n_rois_total == 0 {
            Some("ROIs")
        } else if self.input_data.is_empty() {
            Some("input_data")
        } else if self.quality_metrics.cluster_intra_means.len() != n_clusters {
            Some("quality_metrics")
        } else {
            None
        };
        match empty {
            Some(field) => Err(TrackingError::EmptyOutput {
                field: field.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// Similarity-stage matrices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimRunData {
    /// Raw modality matrices keyed `s_sf`, `s_NN`, `s_SWT`, plus `<key>_z`
    /// for z-scored variants.
    #[serde(flatten)]
    pub matrices: BTreeMap<String, SparseMatrix<f32>>,
    pub s_sesh: SparseMatrix<bool>,
}

/// Clustering-stage matrices.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClustererRunData {
    #[serde(rename = "sConj")]
    pub s_conj: SparseMatrix<f32>,
    #[serde(rename = "dConj")]
    pub d_conj: SparseMatrix<f32>,
    #[serde(rename = "sConj_pruned")]
    pub s_conj_pruned: SparseMatrix<f32>,
    #[serde(rename = "dConj_pruned")]
    pub d_conj_pruned: SparseMatrix<f32>,
    /// Pruned modality matrices keyed `<key>_pruned`.
    #[serde(flatten)]
    pub pruned_modalities: BTreeMap<String, SparseMatrix<f32>>,
}

/// Every intermediate matrix of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunData {
    pub sim: SimRunData,
    pub clusterer: ClustererRunData,
}

impl RunData {
    /// Content hash of every matrix, keyed `<stage>.<name>`.
    pub fn hashes(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for (name, m) in &self.sim.matrices {
            out.insert(format!("sim.{}", name), m.content_hash());
        }
        out.insert("sim.s_sesh".to_string(), self.sim.s_sesh.content_hash());

        let c = &self.clusterer;
        out.insert("clusterer.sConj".to_string(), c.s_conj.content_hash());
        out.insert("clusterer.dConj".to_string(), c.d_conj.content_hash());
        out.insert("clusterer.sConj_pruned".to_string(), c.s_conj_pruned.content_hash());
        out.insert("clusterer.dConj_pruned".to_string(), c.d_conj_pruned.content_hash());
        for (name, m) in &c.pruned_modalities {
            out.insert(format!("clusterer.{}", name), m.content_hash());
        }
        out
    }
}

/// Results plus run data of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub results: TrackingResults,
    pub run_data: RunData,
}

impl PipelineOutput {
    /// Write `results.json`, `run_data.json` and `run_data_hashes.json` into `dir`.
    pub fn write_to(&self, dir: &Path) -> TrackingResult<Vec<PathBuf>> {
        fs::create_dir_all(dir).map_err(|e| TrackingError::io(dir, e))?;
        let files = [
            (RESULTS_FILE, serde_json::to_string_pretty(&self.results)?),
            (RUN_DATA_FILE, serde_json::to_string(&self.run_data)?),
            (RUN_DATA_HASHES_FILE, serde_json::to_string_pretty(&self.run_data.hashes())?),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (name, content) in files {
            let path = dir.join(name);
            fs::write(&path, content).map_err(|e| TrackingError::io(&path, e))?;
            written.push(path);
        }
        Ok(written)
    }
}
