//! End-to-end tracking pipeline.
//!
//! Stage order:
//!
//! ```text
//! similarities -> session masks -> normalize -> parameter search
//!     -> fuse -> prune -> final clustering -> quality metrics
//! ```
//!
//! Stages borrow their inputs; the orchestrator owns every intermediate and
//! moves them into [`RunData`] at the end.

pub mod results;

use std::collections::BTreeMap;

use chrono::Utc;
use tracing::{info, warn};

use crate::clustering::{AutoMixingClusterer, QualityMetrics};
use crate::config::Config;
use crate::context::PipelineContext;
use crate::data::load_dataset;
use crate::error::{TrackingError, TrackingResult};
use crate::fusion::SimilarityFuser;
use crate::pruning::GraphPruner;
use crate::similarity::SparseSimilarityBuilder;
use crate::types::{Modality, RoiDataset};

pub use results::{
    ClustererRunData, InputSummary, PipelineOutput, PipelineWarning, RoiSummary, RunData, RunMetadata, SimRunData,
    TrackingResults, RESULTS_FILE, RUN_DATA_FILE, RUN_DATA_HASHES_FILE,
};

/// Runs every stage for one validated configuration.
#[derive(Debug, Clone)]
pub struct PipelineOrchestrator {
    config: Config,
    context: PipelineContext,
}

impl PipelineOrchestrator {
    pub fn new(config: Config) -> TrackingResult<Self> {
        config.validate()?;
        let context = PipelineContext::from_config(&config);
        Ok(Self { config, context })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Load the configured dataset and run the pipeline on it.
    pub fn run(&self) -> TrackingResult<PipelineOutput> {
        let dataset = load_dataset(&self.config.data_loading, self.config.general.random_seed)?;
        self.run_on(&dataset)
    }

    /// Run every stage on `dataset`. No partial output is returned on failure.
    pub fn run_on(&self, dataset: &RoiDataset) -> TrackingResult<PipelineOutput> {
        let started_at = Utc::now();
        let session_of = dataset.session_of();
        let mut warnings = Vec::new();
        info!(
            run_id = %self.context.run_id,
            n_sessions = dataset.n_sessions(),
            n_rois = dataset.n_rois_total(),
            "Starting tracking run"
        );

        let builder = SparseSimilarityBuilder::new(self.config.similarity.clone());
        let raw = builder.build(dataset)?;
        let candidates = raw
            .iter()
            .next()
            .map(|(_, m)| m.support())
            .ok_or_else(|| TrackingError::EmptyOutput {
                field: "similarities".to_string(),
            })?;

        let masker = *builder.masker();
        let masks = masker.build(session_of, &candidates)?;
        info!(
            eligible_pairs = masks.eligible.nnz(),
            null_pairs = masks.null.nnz(),
            "Built session masks"
        );
        if masks.null.nnz() == 0 {
            warn!("No same-session candidate pairs; separation quality has no null reference");
            warnings.push(PipelineWarning::EmptyNullDistribution);
        }

        let fuser = SimilarityFuser::new(self.config.fusion.clone())?;
        let normalized = fuser.normalize(&raw)?;
        let eligible = normalized.masked(&masks.eligible);
        let null = normalized.masked(&masks.null);
        let active = fuser.active_modalities(&eligible);

        if !self.context.is_reproducible() {
            warnings.push(PipelineWarning::Reproducibility {
                n_jobs: self.context.n_jobs,
            });
        }
        let pruner = GraphPruner::new(self.config.pruning)?;
        let clusterer = AutoMixingClusterer::new(
            &self.context,
            &self.config.clustering,
            fuser,
            pruner,
            masker,
            active,
        )?;
        let search = clusterer.find_parameters(&eligible, &null, session_of)?;

        let graph = clusterer.fuser().fuse(&eligible, search.best_params())?;
        let pruned = clusterer.pruner().prune(&graph, &raw, search.d_cutoff())?;
        let labeling = clusterer.fit(&pruned, session_of, dataset.offsets())?;
        let quality_metrics = QualityMetrics::compute(&labeling, &graph.s_conj, &graph.d_conj);
        info!(
            n_clusters = quality_metrics.n_clusters,
            mean_silhouette = quality_metrics.mean_silhouette(),
            "Computed quality metrics"
        );

        let (fov_height, fov_width) = dataset.fov();
        let results = TrackingResults {
            clusters: labeling,
            rois: RoiSummary {
                n_sessions: dataset.n_sessions(),
                n_rois_total: dataset.n_rois_total(),
                n_rois_per_session: dataset.n_rois_per_session(),
                fov_height,
                fov_width,
                session_of: session_of.to_vec(),
                centroids: dataset.centroids(),
                session_bool: dataset.session_bool()?,
            },
            input_data: InputSummary {
                data_kind: self.config.data_loading.data_kind,
                dir_outer: self.config.data_loading.dir_outer.clone(),
                session_names: dataset.sessions().iter().map(|s| s.name.clone()).collect(),
                modalities: raw.modalities().collect(),
                digest: dataset.digest()?,
            },
            quality_metrics,
            search,
            warnings,
            metadata: RunMetadata {
                run_id: self.context.run_id,
                run_name: self.config.general.run_name.clone(),
                random_seed: self.context.random_seed,
                n_jobs: self.context.n_jobs,
                started_at,
                finished_at: Utc::now(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        results.check_non_empty()?;

        let mut sim_matrices: BTreeMap<String, _> = raw
            .iter()
            .map(|(m, matrix)| (m.key().to_string(), matrix.clone()))
            .collect();
        for modality in Modality::all() {
            if clusterer.fuser().config().weighting(modality).z_score {
                if let Some(z) = normalized.get(modality) {
                    sim_matrices.insert(format!("{}_z", modality.key()), z.clone());
                }
            }
        }
        let pruned_modalities = pruned
            .modalities
            .iter()
            .map(|(m, matrix)| (format!("{}_pruned", m.key()), matrix.clone()))
            .collect();
        let run_data = RunData {
            sim: SimRunData {
                matrices: sim_matrices,
                s_sesh: masks.eligible,
            },
            clusterer: ClustererRunData {
                s_conj: graph.s_conj,
                d_conj: graph.d_conj,
                s_conj_pruned: pruned.s_conj,
                d_conj_pruned: pruned.d_conj,
                pruned_modalities,
            },
        };

        info!(
            n_clusters = results.clusters.n_clusters(),
            n_unclustered = results.clusters.n_unclustered(),
            "Tracking run complete"
        );
        Ok(PipelineOutput { results, run_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::generate_sessions;

    fn small_config() -> Config {
        let mut config = Config::default();
        let synth = &mut config.data_loading.synthetic;
        synth.n_sessions = 3;
        synth.n_identities = 12;
        synth.max_rois_per_session = 12;
        synth.fov_height = 40;
        synth.fov_width = 40;
        let budget = &mut config.clustering.automatic_mixing.find_parameters;
        budget.max_trials = 8;
        budget.n_startup_trials = 4;
        config
    }

    #[test]
    fn test_run_produces_consistent_output() {
        let orchestrator = PipelineOrchestrator::new(small_config()).expect("valid config");
        let output = orchestrator.run().expect("pipeline run");
        let results = &output.results;

        assert!(results.clusters.n_clusters() > 0, "expected at least one cluster");
        assert_eq!(results.rois.n_rois_total, results.clusters.labels.len());
        assert_eq!(
            results.quality_metrics.cluster_intra_means.len(),
            results.clusters.n_clusters()
        );
        assert!(
            !results
                .warnings
                .iter()
                .any(|w| matches!(w, PipelineWarning::Reproducibility { .. })),
            "sequential run must not warn about reproducibility"
        );
        assert!(results.search.reproducible);
        assert!(
            output.run_data.clusterer.s_conj_pruned.support_is_subset_of(&output.run_data.clusterer.s_conj),
            "pruned sConj must be a subset of sConj"
        );
        println!("[PASS] pipeline output is consistent");
    }

    #[test]
    fn test_parallel_run_records_warning() {
        let mut config = small_config();
        config.clustering.automatic_mixing.n_jobs = 2;
        let orchestrator = PipelineOrchestrator::new(config).expect("valid config");
        let output = orchestrator.run().expect("pipeline run");

        assert!(output
            .results
            .warnings
            .contains(&PipelineWarning::Reproducibility { n_jobs: 2 }));
        assert!(!output.results.search.reproducible);
    }

    #[test]
    fn test_run_data_hash_keys() {
        let mut config = small_config();
        config.fusion.embedding.z_score = true;
        let orchestrator = PipelineOrchestrator::new(config.clone()).expect("valid config");
        let synth = generate_sessions(&config.data_loading.synthetic, 5).expect("generate");
        let dataset = RoiDataset::new(synth.sessions).expect("dataset");
        let output = orchestrator.run_on(&dataset).expect("pipeline run");

        let hashes = output.run_data.hashes();
        for key in [
            "sim.s_sf",
            "sim.s_NN",
            "sim.s_NN_z",
            "sim.s_SWT",
            "sim.s_sesh",
            "clusterer.sConj",
            "clusterer.dConj",
            "clusterer.sConj_pruned",
            "clusterer.dConj_pruned",
            "clusterer.s_sf_pruned",
        ] {
            let hash = hashes.get(key).unwrap_or_else(|| panic!("missing hash {}", key));
            assert_eq!(hash.len(), 16, "{} hash must be 16 hex digits", key);
        }
        assert!(!hashes.contains_key("sim.s_sf_z"), "only z-scored modalities get a variant");
    }

    #[test]
    fn test_write_to_creates_three_files() {
        let orchestrator = PipelineOrchestrator::new(small_config()).expect("valid config");
        let output = orchestrator.run().expect("pipeline run");
        let dir = tempfile::tempdir().expect("tempdir");

        let written = output.write_to(dir.path()).expect("write outputs");
        assert_eq!(written.len(), 3);
        for name in [RESULTS_FILE, RUN_DATA_FILE, RUN_DATA_HASHES_FILE] {
            assert!(dir.path().join(name).is_file(), "{} must exist", name);
        }

        let text = std::fs::read_to_string(dir.path().join(RESULTS_FILE)).expect("read results");
        let value: serde_json::Value = serde_json::from_str(&text).expect("results are JSON");
        for key in ["clusters", "ROIs", "input_data", "quality_metrics", "search", "metadata"] {
            assert!(value.get(key).is_some(), "results.json must carry '{}'", key);
        }
        assert!(value["clusters"].get("labels_bool_bySession").is_some());
    }
}
