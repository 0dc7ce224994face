//! Automatic mixing-parameter search and final clustering.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::labels::{resolve_violations, ClusterLabeling};
use super::linkage::SessionAwareLinkage;
use super::objective::separation_objective;
use super::search::{
    best_trial, AdaptiveRandomSearch, SearchBudget, SearchState, SearchStrategy, TrialOutcome, TrialRecord,
};
use crate::config::ClusteringConfig;
use crate::context::PipelineContext;
use crate::error::{TrackingError, TrackingResult};
use crate::fusion::{MixingParams, SimilarityFuser};
use crate::pruning::{GraphPruner, PrunedGraph};
use crate::similarity::{SessionConstraintMasker, SimilaritySet};
use crate::sparse::SparseMatrix;
use crate::types::Modality;

/// Result of [`AutoMixingClusterer::find_parameters`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Terminal state: `Converged` or `Exhausted`.
    pub state: SearchState,
    /// Best scored trial.
    pub best: TrialRecord,
    /// Every trial, in the order it entered the history.
    pub trials: Vec<TrialRecord>,
    /// False when trials ran in parallel.
    pub reproducible: bool,
}

impl SearchOutcome {
    pub fn best_params(&self) -> &MixingParams {
        &self.best.params
    }

    /// Distance cutoff found by the best trial.
    pub fn d_cutoff(&self) -> Option<f32> {
        match self.best.outcome {
            TrialOutcome::Scored { d_cutoff, .. } => Some(d_cutoff),
            TrialOutcome::Failed { .. } => None,
        }
    }

    pub fn best_quality(&self) -> Option<f64> {
        self.best.outcome.quality()
    }
}

/// Bookkeeping of the search state machine.
struct SearchTracker<'a> {
    budget: &'a SearchBudget,
    history: Vec<TrialRecord>,
    best_quality: Option<f64>,
    stale: usize,
    state: SearchState,
}

impl<'a> SearchTracker<'a> {
    fn new(budget: &'a SearchBudget) -> Self {
        let state = if budget.max_trials == 0 {
            SearchState::Exhausted
        } else {
            SearchState::Init
        };
        Self {
            budget,
            history: Vec::new(),
            best_quality: None,
            stale: 0,
            state,
        }
    }

    /// Record one finished trial and advance the state.
    fn record(&mut self, index: usize, params: MixingParams, outcome: TrialOutcome) {
        self.state = SearchState::Trial { index };
        let quality = outcome.quality();
        let improved = quality.map_or(false, |q| self.budget.is_improvement(q, self.best_quality));
        if let Some(q) = quality {
            if self.best_quality.map_or(true, |b| q > b) {
                self.best_quality = Some(q);
            }
        }
        self.stale = if improved { 0 } else { self.stale + 1 };

        debug!(
            trial = index,
            quality = ?quality,
            improved,
            stale = self.stale,
            "Trial finished"
        );
        self.history.push(TrialRecord {
            index,
            params,
            outcome,
            improved,
        });

        self.state = if self.stale >= self.budget.n_patience {
            SearchState::Converged
        } else if self.history.len() >= self.budget.max_trials {
            SearchState::Exhausted
        } else {
            SearchState::Continue
        };
    }
}

/// Searches mixing parameters that best separate matches from non-matches,
/// then clusters the pruned graph into ROI identities.
pub struct AutoMixingClusterer {
    config: ClusteringConfig,
    linkage: SessionAwareLinkage,
    fuser: SimilarityFuser,
    pruner: GraphPruner,
    masker: SessionConstraintMasker,
    context: PipelineContext,
    strategy: Box<dyn SearchStrategy>,
}

impl AutoMixingClusterer {
    /// Create a clusterer using [`AdaptiveRandomSearch`] over `modalities`.
    pub fn new(
        context: &PipelineContext,
        config: &ClusteringConfig,
        fuser: SimilarityFuser,
        pruner: GraphPruner,
        masker: SessionConstraintMasker,
        modalities: Vec<Modality>,
    ) -> TrackingResult<Self> {
        config.validate()?;
        let mixing = &config.automatic_mixing;
        let strategy = AdaptiveRandomSearch::new(
            mixing.bounds.clone(),
            modalities,
            context.random_seed,
            mixing.find_parameters.n_startup_trials,
        );
        Ok(Self {
            config: config.clone(),
            linkage: SessionAwareLinkage::new(config.linkage.clone(), masker)?,
            fuser,
            pruner,
            masker,
            context: context.clone(),
            strategy: Box::new(strategy),
        })
    }

    /// Replace the search strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: impl SearchStrategy + 'static) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    #[inline]
    pub fn fuser(&self) -> &SimilarityFuser {
        &self.fuser
    }

    #[inline]
    pub fn pruner(&self) -> &GraphPruner {
        &self.pruner
    }

    /// Run the search loop over the eligible and null similarity sets.
    ///
    /// # Errors
    ///
    /// `TrackingError::ClusteringFailed` if no trial produced a valid labeling,
    /// including when `max_trials` is zero.
    pub fn find_parameters(
        &self,
        eligible: &SimilaritySet,
        null: &SimilaritySet,
        session_of: &[usize],
    ) -> TrackingResult<SearchOutcome> {
        let budget = &self.config.automatic_mixing.find_parameters;
        let n_jobs = self.context.n_jobs.max(1);
        info!(
            n_patience = budget.n_patience,
            max_trials = budget.max_trials,
            n_jobs,
            eligible_pairs = eligible.iter().next().map_or(0, |(_, m)| m.nnz()),
            "Starting mixing-parameter search"
        );

        let mut tracker = SearchTracker::new(budget);
        if n_jobs == 1 {
            while !tracker.state.is_terminal() {
                let index = tracker.history.len();
                let params = self.strategy.propose(&tracker.history, index);
                let outcome = self.evaluate_trial(&params, eligible, null, session_of);
                tracker.record(index, params, outcome);
            }
        } else {
            warn!(
                n_jobs,
                "Parallel trial search: results depend on completion order and are not reproducible"
            );
            self.run_parallel(&mut tracker, n_jobs, eligible, null, session_of)?;
        }

        let state = tracker.state;
        let trials = tracker.history;
        let Some(best) = best_trial(&trials).cloned() else {
            return Err(TrackingError::ClusteringFailed {
                message: format!("no valid labeling found (search ended {:?})", state),
                trials,
            });
        };
        info!(
            state = ?state,
            n_trials = trials.len(),
            best_trial = best.index,
            best_quality = ?best.outcome.quality(),
            "Search finished"
        );
        Ok(SearchOutcome {
            state,
            best,
            trials,
            reproducible: n_jobs == 1,
        })
    }

    fn run_parallel(
        &self,
        tracker: &mut SearchTracker<'_>,
        n_jobs: usize,
        eligible: &SimilaritySet,
        null: &SimilaritySet,
        session_of: &[usize],
    ) -> TrackingResult<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_jobs)
            .build()
            .map_err(|e| TrackingError::invalid_parameter(format!("failed to build worker pool: {}", e)))?;

        let mut next_index = 0usize;
        while !tracker.state.is_terminal() {
            let remaining = tracker.budget.max_trials.saturating_sub(tracker.history.len());
            let round = n_jobs.min(remaining);
            let proposals: Vec<(usize, MixingParams)> = (next_index..next_index + round)
                .map(|i| (i, self.strategy.propose(&tracker.history, i)))
                .collect();
            next_index += round;

            let ticket = AtomicUsize::new(0);
            let mut finished: Vec<(usize, usize, MixingParams, TrialOutcome)> = pool.install(|| {
                proposals
                    .into_par_iter()
                    .map(|(index, params)| {
                        let outcome = self.evaluate_trial(&params, eligible, null, session_of);
                        (ticket.fetch_add(1, Ordering::SeqCst), index, params, outcome)
                    })
                    .collect()
            });
            finished.sort_by_key(|entry| entry.0);

            // Every evaluated trial enters the history; a terminal state only
            // stops the next round from being proposed.
            for (_, index, params, outcome) in finished {
                tracker.record(index, params, outcome);
            }
        }
        Ok(())
    }

    /// Score one point. Errors are recorded as failed trials.
    pub fn evaluate_trial(
        &self,
        params: &MixingParams,
        eligible: &SimilaritySet,
        null: &SimilaritySet,
        session_of: &[usize],
    ) -> TrialOutcome {
        match self.try_trial(params, eligible, null, session_of) {
            Ok(outcome) => outcome,
            Err(e) => TrialOutcome::Failed { reason: e.to_string() },
        }
    }

    fn try_trial(
        &self,
        params: &MixingParams,
        eligible: &SimilaritySet,
        null: &SimilaritySet,
        session_of: &[usize],
    ) -> TrackingResult<TrialOutcome> {
        let graph = self.fuser.fuse(eligible, params)?;
        let null_graph = self.fuser.fuse(null, params)?;
        let score = separation_objective(
            &upper_triangle(&graph.d_conj),
            &upper_triangle(&null_graph.d_conj),
            self.config.automatic_mixing.n_bins,
        )?;

        let keep = self.pruner.keep_mask(&graph.d_conj, Some(score.d_cutoff))?;
        let labels = self.linkage.fit(&graph.d_conj.mask_with(&keep), session_of)?;
        let n_clusters = labels.iter().filter(|&&l| l >= 0).max().map_or(0, |&m| m as usize + 1);
        if n_clusters == 0 {
            return Ok(TrialOutcome::Failed {
                reason: "labeling has no clusters".into(),
            });
        }
        Ok(TrialOutcome::Scored {
            quality: score.quality,
            d_cutoff: score.d_cutoff,
            n_clusters,
        })
    }

    /// Cluster the final pruned graph: linkage, violation pass, squeezing.
    pub fn fit(&self, pruned: &PrunedGraph, session_of: &[usize], offsets: &[usize]) -> TrackingResult<ClusterLabeling> {
        let mut labels = self.linkage.fit(&pruned.d_conj, session_of)?;
        let violations = resolve_violations(
            &mut labels,
            session_of,
            &self.masker,
            &pruned.s_conj,
            self.config.linkage.min_cluster_size,
        );
        let labeling = ClusterLabeling::new(&labels, offsets, violations)?;
        info!(
            n_clusters = labeling.n_clusters(),
            n_unclustered = labeling.n_unclustered(),
            n_violations = labeling.violations_labels.len(),
            "Final clustering complete"
        );
        Ok(labeling)
    }
}

/// Stored values with `i < j`.
fn upper_triangle(matrix: &SparseMatrix<f32>) -> Vec<f32> {
    matrix.iter().filter(|&(i, j, _)| i < j).map(|(_, _, v)| v).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clustering::search::SearchBounds;
    use crate::config::{ClusteringConfig, FusionConfig};
    use crate::pruning::PrunePolicy;
    use crate::sparse::TripletBuilder;

    /// Three identities seen in three sessions, plus same-session non-matches.
    fn sets() -> (SimilaritySet, SimilaritySet, Vec<usize>) {
        let session_of = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];
        let identity = |g: usize| g % 3;
        let mut sf = TripletBuilder::new((9, 9));
        let mut nn = TripletBuilder::new((9, 9));
        for i in 0..9 {
            for j in (i + 1)..9 {
                let same = identity(i) == identity(j);
                let neighbour = identity(i).abs_diff(identity(j)) == 1;
                if !(same || neighbour) {
                    continue;
                }
                let (s, e) = if same { (0.8, 0.9) } else { (0.2, 0.1) };
                sf.push_symmetric(i, j, s).unwrap();
                nn.push_symmetric(i, j, e).unwrap();
            }
        }
        let mut all = SimilaritySet::new();
        all.insert(Modality::SpatialFootprint, sf.build()).unwrap();
        all.insert(Modality::Embedding, nn.build()).unwrap();
        let support = all.get(Modality::SpatialFootprint).unwrap().clone();
        let masks = SessionConstraintMasker::default().build(&session_of, &support).unwrap();
        (all.masked(&masks.eligible), all.masked(&masks.null), session_of)
    }

    fn clusterer(max_trials: usize, n_patience: usize, n_jobs: usize) -> AutoMixingClusterer {
        let mut config = ClusteringConfig::default();
        config.automatic_mixing.find_parameters.max_trials = max_trials;
        config.automatic_mixing.find_parameters.n_patience = n_patience;
        config.automatic_mixing.find_parameters.n_startup_trials = 2;
        config.automatic_mixing.n_bins = 10;
        let context = PipelineContext::new(0, n_jobs);
        AutoMixingClusterer::new(
            &context,
            &config,
            SimilarityFuser::new(FusionConfig::default()).unwrap(),
            GraphPruner::new(PrunePolicy::AutoCutoff).unwrap(),
            SessionConstraintMasker::default(),
            vec![Modality::SpatialFootprint, Modality::Embedding],
        )
        .unwrap()
    }

    #[test]
    fn test_zero_trials_fails() {
        let (eligible, null, session_of) = sets();
        let err = clusterer(0, 5, 1).find_parameters(&eligible, &null, &session_of).unwrap_err();
        match err {
            TrackingError::ClusteringFailed { trials, .. } => assert!(trials.is_empty()),
            other => panic!("expected ClusteringFailed, got {:?}", other),
        }
        println!("[PASS] max_trials=0 -> ClusteringFailed");
    }

    #[test]
    fn test_patience_beyond_budget_exhausts() {
        let (eligible, null, session_of) = sets();
        let outcome = clusterer(6, 50, 1).find_parameters(&eligible, &null, &session_of).unwrap();
        assert_eq!(outcome.state, SearchState::Exhausted);
        assert_eq!(outcome.trials.len(), 6);
        assert!(outcome.reproducible);
    }

    #[test]
    fn test_small_patience_converges() {
        let (eligible, null, session_of) = sets();
        let outcome = clusterer(100, 2, 1).find_parameters(&eligible, &null, &session_of).unwrap();
        assert_eq!(outcome.state, SearchState::Converged);
        assert!(outcome.trials.len() < 100);
        let tail: Vec<_> = outcome.trials.iter().rev().take(2).collect();
        assert!(tail.iter().all(|t| !t.improved));
    }

    #[test]
    fn test_sequential_search_is_deterministic() {
        let (eligible, null, session_of) = sets();
        let a = clusterer(8, 4, 1).find_parameters(&eligible, &null, &session_of).unwrap();
        let b = clusterer(8, 4, 1).find_parameters(&eligible, &null, &session_of).unwrap();
        assert_eq!(a, b, "same seed and n_jobs=1 must replay exactly");
    }

    #[test]
    fn test_parallel_search_flags_non_reproducible() {
        let (eligible, null, session_of) = sets();
        let outcome = clusterer(6, 50, 3).find_parameters(&eligible, &null, &session_of).unwrap();
        assert!(!outcome.reproducible);
        assert_eq!(outcome.state, SearchState::Exhausted);
        assert_eq!(outcome.trials.len(), 6);
    }

    /// Counts proposals, each of which is evaluated exactly once.
    struct CountingSearch {
        inner: AdaptiveRandomSearch,
        proposed: Arc<AtomicUsize>,
    }

    impl SearchStrategy for CountingSearch {
        fn propose(&self, history: &[TrialRecord], trial_index: usize) -> MixingParams {
            self.proposed.fetch_add(1, Ordering::SeqCst);
            self.inner.propose(history, trial_index)
        }
    }

    #[test]
    fn test_parallel_round_records_every_evaluated_trial() {
        let (eligible, null, session_of) = sets();
        let proposed = Arc::new(AtomicUsize::new(0));
        let strategy = CountingSearch {
            inner: AdaptiveRandomSearch::new(
                SearchBounds::default(),
                vec![Modality::SpatialFootprint, Modality::Embedding],
                0,
                2,
            ),
            proposed: Arc::clone(&proposed),
        };
        // Patience of one converges inside the first round of four.
        let outcome = clusterer(6, 1, 4)
            .with_strategy(strategy)
            .find_parameters(&eligible, &null, &session_of)
            .unwrap();

        let evaluated = proposed.load(Ordering::SeqCst);
        println!(
            "[STATE] evaluated = {}, recorded = {}, state = {:?}",
            evaluated,
            outcome.trials.len(),
            outcome.state
        );
        assert_eq!(outcome.trials.len(), evaluated, "no finished trial may be dropped");
        assert!(evaluated >= 4, "the first round runs n_jobs trials");
        assert!(evaluated <= 6, "rounds never exceed max_trials");
        let mut indices: Vec<usize> = outcome.trials.iter().map(|t| t.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, (0..evaluated).collect::<Vec<_>>());
        assert!(outcome.state.is_terminal());
        println!("[PASS] parallel rounds keep every evaluated trial");
    }

    #[test]
    fn test_fit_recovers_identities() {
        let (eligible, null, session_of) = sets();
        let c = clusterer(10, 5, 1);
        let outcome = c.find_parameters(&eligible, &null, &session_of).unwrap();
        let graph = c.fuser().fuse(&eligible, outcome.best_params()).unwrap();
        let pruned = c.pruner().prune(&graph, &eligible, outcome.d_cutoff()).unwrap();
        let labeling = c.fit(&pruned, &session_of, &[0, 3, 6, 9]).unwrap();
        assert!(labeling.n_clusters() >= 1);
        assert!(labeling.violations_labels.is_empty());
        for members in labeling.labels_dict.values() {
            let mut sessions: Vec<_> = members.iter().map(|&m| session_of[m]).collect();
            sessions.dedup();
            assert_eq!(sessions.len(), members.len(), "one ROI per session per cluster");
        }
    }
}
