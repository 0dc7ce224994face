//! Edge pruning of the conjunctive graph.
//!
//! The kept edge set is decided once, on `dConj`, and then applied to `sConj`,
//! `dConj` and every modality matrix so that all pruned matrices stay indexed
//! consistently. Shapes never change, and pruning only removes edges.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{TrackingError, TrackingResult};
use crate::fusion::ConjunctiveGraph;
use crate::similarity::SimilaritySet;
use crate::sparse::{SparseMatrix, TripletBuilder};

/// How weak edges are removed.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum PrunePolicy {
    /// Keep `d <= d_cutoff`, where the cutoff comes from the parameter search.
    #[default]
    AutoCutoff,
    /// Keep `d <= max_distance`.
    DistanceThreshold { max_distance: f32 },
    /// Keep the union of every row's `k` nearest neighbours.
    KNearest { k: usize },
    /// Keep distances at or below the given percentile (0 to 100) of `dConj`.
    Percentile { percentile: f32 },
}

impl PrunePolicy {
    pub fn validate(&self) -> TrackingResult<()> {
        match *self {
            PrunePolicy::AutoCutoff => Ok(()),
            PrunePolicy::DistanceThreshold { max_distance } if !max_distance.is_finite() => {
                Err(TrackingError::config(format!(
                    "pruning.max_distance must be finite, got {}",
                    max_distance
                )))
            }
            PrunePolicy::KNearest { k: 0 } => {
                Err(TrackingError::config("pruning.k must be greater than 0"))
            }
            PrunePolicy::Percentile { percentile } if !(0.0..=100.0).contains(&percentile) => {
                Err(TrackingError::config(format!(
                    "pruning.percentile must be in [0, 100], got {}",
                    percentile
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Pruned counterpart of a [`ConjunctiveGraph`] plus the modality matrices.
#[derive(Debug, Clone, PartialEq)]
pub struct PrunedGraph {
    pub s_conj: SparseMatrix<f32>,
    pub d_conj: SparseMatrix<f32>,
    pub modalities: SimilaritySet,
    /// The retained edge set.
    pub keep: SparseMatrix<bool>,
}

/// Applies a [`PrunePolicy`] consistently to every matrix of the graph.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphPruner {
    policy: PrunePolicy,
}

impl GraphPruner {
    pub fn new(policy: PrunePolicy) -> TrackingResult<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    #[inline]
    pub fn policy(&self) -> PrunePolicy {
        self.policy
    }

    /// Prune `graph` and `modalities` to one retained edge set.
    ///
    /// `d_cutoff` is required by [`PrunePolicy::AutoCutoff`] and ignored otherwise.
    pub fn prune(
        &self,
        graph: &ConjunctiveGraph,
        modalities: &SimilaritySet,
        d_cutoff: Option<f32>,
    ) -> TrackingResult<PrunedGraph> {
        let keep = self.keep_mask(&graph.d_conj, d_cutoff)?;
        let pruned = PrunedGraph {
            s_conj: graph.s_conj.mask_with(&keep),
            d_conj: graph.d_conj.mask_with(&keep),
            modalities: modalities.masked(&keep),
            keep,
        };
        info!(
            policy = ?self.policy,
            nnz_before = graph.nnz(),
            nnz_after = pruned.s_conj.nnz(),
            "Pruned conjunctive graph"
        );
        Ok(pruned)
    }

    /// Boolean mask of the edges of `d_conj` to keep.
    pub fn keep_mask(&self, d_conj: &SparseMatrix<f32>, d_cutoff: Option<f32>) -> TrackingResult<SparseMatrix<bool>> {
        let keep = match self.policy {
            PrunePolicy::AutoCutoff => {
                let cutoff = d_cutoff.ok_or_else(|| {
                    TrackingError::invalid_parameter("auto_cutoff pruning requires a distance cutoff")
                })?;
                threshold_mask(d_conj, cutoff)
            }
            PrunePolicy::DistanceThreshold { max_distance } => threshold_mask(d_conj, max_distance),
            PrunePolicy::Percentile { percentile } => {
                let cutoff = percentile_of(d_conj, percentile);
                threshold_mask(d_conj, cutoff)
            }
            PrunePolicy::KNearest { k } => k_nearest_mask(d_conj, k)?,
        };
        Ok(keep)
    }
}

fn threshold_mask(d_conj: &SparseMatrix<f32>, cutoff: f32) -> SparseMatrix<bool> {
    d_conj.filter(|i, j, d| i == j || d <= cutoff).support()
}

/// Union of each row's `k` smallest distances, ties broken by column.
fn k_nearest_mask(d_conj: &SparseMatrix<f32>, k: usize) -> TrackingResult<SparseMatrix<bool>> {
    let mut keep = TripletBuilder::new(d_conj.shape());
    let mut row_entries: Vec<(usize, f32)> = Vec::new();
    for i in 0..d_conj.nrows() {
        row_entries.clear();
        for (j, d) in d_conj.row(i) {
            if i == j {
                keep.push(i, j, true)?;
            } else {
                row_entries.push((j, d));
            }
        }
        row_entries.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        for &(j, _) in row_entries.iter().take(k) {
            keep.push(i, j, true)?;
            if d_conj.contains(j, i) {
                keep.push(j, i, true)?;
            }
        }
    }
    Ok(keep.build())
}

/// Linear-interpolated percentile of the off-diagonal stored values.
fn percentile_of(d_conj: &SparseMatrix<f32>, percentile: f32) -> f32 {
    let mut values: Vec<f32> = d_conj.iter().filter(|&(i, j, _)| i != j).map(|(_, _, d)| d).collect();
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f32::total_cmp);
    let pos = (percentile / 100.0) * (values.len() - 1) as f32;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f32;
    values[lo] + (values[hi] - values[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Modality;

    fn graph() -> (ConjunctiveGraph, SimilaritySet) {
        let s = SparseMatrix::from_triplets(
            (4, 4),
            vec![
                (0, 1, 0.9f32),
                (1, 0, 0.9),
                (0, 2, 0.5),
                (2, 0, 0.5),
                (1, 3, 0.1),
                (3, 1, 0.1),
                (2, 3, 0.7),
                (3, 2, 0.7),
            ],
        )
        .unwrap();
        let d = s.map_values(|v| 1.0 - v);
        let mut set = SimilaritySet::new();
        set.insert(Modality::SpatialFootprint, s.clone()).unwrap();
        set.insert(Modality::Embedding, s.map_values(|v| v * 0.5)).unwrap();
        (ConjunctiveGraph { s_conj: s, d_conj: d }, set)
    }

    fn assert_consistent(pruned: &PrunedGraph, graph: &ConjunctiveGraph, set: &SimilaritySet) {
        assert!(pruned.s_conj.support_is_subset_of(&graph.s_conj));
        assert!(pruned.d_conj.support_is_subset_of(&graph.d_conj));
        assert!(pruned.s_conj.same_support(&pruned.d_conj));
        for (m, s) in pruned.modalities.iter() {
            let Some(original) = set.get(m) else {
                panic!("modality {} lost during pruning", m);
            };
            assert!(s.support_is_subset_of(original), "{} gained edges", m);
        }
        assert!(pruned.s_conj.is_symmetric(), "pruning must preserve symmetry");
        assert_eq!(pruned.s_conj.shape(), graph.s_conj.shape());
    }

    #[test]
    fn test_distance_threshold() {
        let (g, set) = graph();
        let pruner = GraphPruner::new(PrunePolicy::DistanceThreshold { max_distance: 0.45 }).unwrap();
        let pruned = pruner.prune(&g, &set, None).unwrap();
        assert_eq!(pruned.s_conj.nnz(), 4);
        assert!(pruned.s_conj.contains(2, 3));
        assert!(!pruned.s_conj.contains(1, 3));
        assert_consistent(&pruned, &g, &set);
        println!("[PASS] distance threshold keeps consistent subgraph");
    }

    #[test]
    fn test_k_nearest_union_is_symmetric() {
        let (g, set) = graph();
        let pruner = GraphPruner::new(PrunePolicy::KNearest { k: 1 }).unwrap();
        let pruned = pruner.prune(&g, &set, None).unwrap();
        // nearest: 0->1, 1->0, 2->3, 3->2
        assert_eq!(pruned.s_conj.nnz(), 4);
        assert_consistent(&pruned, &g, &set);
    }

    #[test]
    fn test_percentile_and_auto_cutoff() {
        let (g, set) = graph();
        let all = GraphPruner::new(PrunePolicy::Percentile { percentile: 100.0 })
            .unwrap()
            .prune(&g, &set, None)
            .unwrap();
        assert_eq!(all.s_conj.nnz(), g.s_conj.nnz());

        let auto = GraphPruner::new(PrunePolicy::AutoCutoff).unwrap();
        assert!(auto.prune(&g, &set, None).is_err(), "auto_cutoff needs a cutoff");
        let pruned = auto.prune(&g, &set, Some(0.5)).unwrap();
        assert_eq!(pruned.s_conj.nnz(), 6);
        assert_consistent(&pruned, &g, &set);
    }

    #[test]
    fn test_diagonal_always_kept() {
        let s = SparseMatrix::from_triplets((2, 2), vec![(0, 0, 0.0f32), (0, 1, 0.2), (1, 0, 0.2)]).unwrap();
        let d = s.map_values(|v| 1.0 - v);
        let g = ConjunctiveGraph { s_conj: s, d_conj: d };
        for policy in [
            PrunePolicy::DistanceThreshold { max_distance: 0.0 },
            PrunePolicy::KNearest { k: 1 },
            PrunePolicy::Percentile { percentile: 0.0 },
        ] {
            let pruned = GraphPruner::new(policy).unwrap().prune(&g, &SimilaritySet::new(), None).unwrap();
            assert!(pruned.s_conj.contains(0, 0), "{:?} removed self identity", policy);
        }
    }

    #[test]
    fn test_invalid_policies_rejected() {
        assert!(GraphPruner::new(PrunePolicy::KNearest { k: 0 }).is_err());
        assert!(GraphPruner::new(PrunePolicy::Percentile { percentile: 120.0 }).is_err());
        assert!(GraphPruner::new(PrunePolicy::DistanceThreshold { max_distance: f32::NAN }).is_err());
    }
}
