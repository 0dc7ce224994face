//! Fusion of per-modality similarities into the conjunctive graph.
//!
//! [`SimilarityFuser`] turns a masked [`SimilaritySet`] into `sConj` and its
//! distance dual `dConj`:
//!
//! 1. optional z-scoring of each modality over its explicit entries
//!    ([`SimilarityFuser::normalize`])
//! 2. per-modality activation and exponent from the trial's [`MixingParams`]
//! 3. combination by the configured [`FusionRule`] on the intersection of the
//!    required modalities' supports
//! 4. distance by the configured [`DistanceTransform`]

mod params;

pub use params::{
    Activation, DistanceTransform, FusionRule, MixingParams, ModalityMixing, ModalityWeighting,
};

use tracing::debug;

use crate::config::FusionConfig;
use crate::error::{TrackingError, TrackingResult};
use crate::similarity::SimilaritySet;
use crate::sparse::{SparseMatrix, TripletBuilder};
use crate::types::Modality;

/// Fused similarity `sConj` and its distance dual `dConj`, on one support.
#[derive(Debug, Clone, PartialEq)]
pub struct ConjunctiveGraph {
    pub s_conj: SparseMatrix<f32>,
    pub d_conj: SparseMatrix<f32>,
}

impl ConjunctiveGraph {
    #[inline]
    pub fn n_rois(&self) -> usize {
        self.s_conj.nrows()
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.s_conj.nnz()
    }
}

/// Combines modality matrices into a [`ConjunctiveGraph`].
#[derive(Debug, Clone)]
pub struct SimilarityFuser {
    config: FusionConfig,
}

impl SimilarityFuser {
    pub fn new(config: FusionConfig) -> TrackingResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Enabled modalities present in `set`, in canonical order.
    pub fn active_modalities(&self, set: &SimilaritySet) -> Vec<Modality> {
        set.modalities()
            .filter(|&m| self.config.weighting(m).enabled)
            .collect()
    }

    /// Z-score every modality flagged `z_score`, over its explicit entries only.
    ///
    /// Absent entries stay absent; the support of every matrix is unchanged.
    pub fn normalize(&self, set: &SimilaritySet) -> TrackingResult<SimilaritySet> {
        let mut out = SimilaritySet::new();
        for (modality, matrix) in set.iter() {
            let matrix = if self.config.weighting(modality).z_score {
                let z = z_score(matrix);
                debug!(modality = modality.key(), nnz = z.nnz(), "Z-scored modality");
                z
            } else {
                matrix.clone()
            };
            out.insert(modality, matrix)?;
        }
        Ok(out)
    }

    /// Fuse `set` (already masked) under one trial's mixing parameters.
    ///
    /// # Errors
    ///
    /// - `TrackingError::InvalidParameter` if `params` is invalid
    /// - `TrackingError::InvalidInput` if no enabled modality is present
    pub fn fuse(&self, set: &SimilaritySet, params: &MixingParams) -> TrackingResult<ConjunctiveGraph> {
        params.validate()?;
        let active = self.active_modalities(set);
        if active.is_empty() {
            return Err(TrackingError::invalid_input(
                "no enabled modality available for fusion",
            ));
        }

        let matrices: Vec<(Modality, &SparseMatrix<f32>, f32)> = active
            .iter()
            .filter_map(|&m| set.get(m).map(|s| (m, s, self.config.weighting(m).weight)))
            .collect();
        let support = self.fused_support(&matrices)?;

        let mixing: Vec<ModalityMixing> = matrices
            .iter()
            .map(|&(m, _, _)| params.get(m).cloned().unwrap_or_else(|| ModalityMixing::identity(m)))
            .collect();

        let mut terms = Vec::with_capacity(matrices.len());
        let s_conj = support.map_indexed(|i, j, _| {
            terms.clear();
            for ((_, matrix, weight), mix) in matrices.iter().zip(&mixing) {
                if *weight <= 0.0 {
                    continue;
                }
                if let Some(x) = matrix.get(i, j) {
                    terms.push((mix.activate(x), *weight));
                }
            }
            self.config.rule.combine(&terms, params.p_norm)
        });
        let transform = self.config.distance;
        let d_conj = s_conj.map_values(|s| transform.apply(s));

        Ok(ConjunctiveGraph { s_conj, d_conj })
    }

    /// Intersection of required supports, or the union of all supports when
    /// no active modality is required.
    fn fused_support(
        &self,
        matrices: &[(Modality, &SparseMatrix<f32>, f32)],
    ) -> TrackingResult<SparseMatrix<bool>> {
        let mut required = matrices
            .iter()
            .filter(|(m, _, _)| self.config.weighting(*m).required)
            .map(|(_, s, _)| *s);

        if let Some(first) = required.next() {
            let support = required.fold(first.support(), |acc, s| acc.restrict_to_support(s));
            return Ok(support);
        }

        let shape = matrices
            .first()
            .map(|(_, s, _)| s.shape())
            .unwrap_or((0, 0));
        let mut union = TripletBuilder::new(shape);
        for (_, s, _) in matrices {
            for (i, j, _) in s.iter() {
                union.push(i, j, true)?;
            }
        }
        Ok(union.build())
    }
}

/// Z-score of the stored values; a constant matrix maps to all zeros.
fn z_score(matrix: &SparseMatrix<f32>) -> SparseMatrix<f32> {
    let n = matrix.nnz();
    if n == 0 {
        return matrix.clone();
    }
    let mean = matrix.data().iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let var = matrix
        .data()
        .iter()
        .map(|&v| (v as f64 - mean).powi(2))
        .sum::<f64>()
        / n as f64;
    let std = var.sqrt();
    if std > 0.0 {
        matrix.map_values(|v| ((v as f64 - mean) / std) as f32)
    } else {
        matrix.map_values(|_| 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_of(entries: &[(Modality, Vec<(usize, usize, f32)>)]) -> SimilaritySet {
        let mut set = SimilaritySet::new();
        for (m, triplets) in entries {
            set.insert(*m, SparseMatrix::from_triplets((3, 3), triplets.clone()).unwrap())
                .unwrap();
        }
        set
    }

    fn fuser(rule: FusionRule) -> SimilarityFuser {
        SimilarityFuser::new(FusionConfig {
            rule,
            ..FusionConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_support_is_intersection_of_required() {
        let set = set_of(&[
            (Modality::SpatialFootprint, vec![(0, 1, 0.8), (0, 2, 0.4)]),
            (Modality::Embedding, vec![(0, 1, 0.6)]),
        ]);
        let g = fuser(FusionRule::WeightedSum)
            .fuse(&set, &MixingParams::identity(Modality::all()))
            .unwrap();
        assert_eq!(g.s_conj.nnz(), 1);
        assert!((g.s_conj.get(0, 1).unwrap() - 0.7).abs() < 1e-6);
        assert!((g.d_conj.get(0, 1).unwrap() - 0.3).abs() < 1e-6);
        assert!(g.s_conj.same_support(&g.d_conj));
    }

    #[test]
    fn test_optional_modality_contributes_where_present() {
        let set = set_of(&[
            (Modality::SpatialFootprint, vec![(0, 1, 0.8), (0, 2, 0.4)]),
            (Modality::Embedding, vec![(0, 1, 0.6)]),
        ]);
        let mut config = FusionConfig {
            rule: FusionRule::WeightedSum,
            ..FusionConfig::default()
        };
        config.embedding.required = false;
        let g = SimilarityFuser::new(config)
            .unwrap()
            .fuse(&set, &MixingParams::identity(Modality::all()))
            .unwrap();
        assert_eq!(g.s_conj.nnz(), 2);
        assert!((g.s_conj.get(0, 2).unwrap() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_support_within_union_of_inputs() {
        let set = set_of(&[
            (Modality::SpatialFootprint, vec![(0, 1, 0.8)]),
            (Modality::Wavelet, vec![(1, 2, 0.5)]),
        ]);
        let mut config = FusionConfig::default();
        config.spatial_footprint.required = false;
        config.wavelet.required = false;
        let g = SimilarityFuser::new(config)
            .unwrap()
            .fuse(&set, &MixingParams::identity(Modality::all()))
            .unwrap();
        for (i, j, _) in g.s_conj.iter() {
            assert!(set.iter().any(|(_, s)| s.contains(i, j)));
        }
        assert_eq!(g.s_conj.nnz(), 2);
    }

    #[test]
    fn test_z_score_only_touches_explicit_entries() {
        let set = set_of(&[(Modality::Embedding, vec![(0, 1, 0.2), (1, 0, 0.2), (0, 2, 0.8)])]);
        let mut config = FusionConfig::default();
        config.embedding.z_score = true;
        let normalized = SimilarityFuser::new(config).unwrap().normalize(&set).unwrap();
        let z = normalized.get(Modality::Embedding).unwrap();
        assert!(z.same_support(set.get(Modality::Embedding).unwrap()));
        let mean: f32 = z.data().iter().sum::<f32>() / z.nnz() as f32;
        assert!(mean.abs() < 1e-5, "z-scored mean should be 0, got {}", mean);
        assert_eq!(z.get(2, 2), None);
    }

    #[test]
    fn test_disabled_modalities_ignored() {
        let set = set_of(&[(Modality::Embedding, vec![(0, 1, 0.6)])]);
        let mut config = FusionConfig::default();
        config.embedding.enabled = false;
        let err = SimilarityFuser::new(config)
            .unwrap()
            .fuse(&set, &MixingParams::identity(Modality::all()))
            .unwrap_err();
        assert!(matches!(err, TrackingError::InvalidInput { .. }));
    }
}
