//! Sparse per-modality similarity computation.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info, warn};

use super::{SessionConstraintMasker, SimilaritySet};
use crate::config::SimilarityConfig;
use crate::error::{TrackingError, TrackingResult};
use crate::sparse::{SparseMatrix, TripletBuilder};
use crate::types::{Modality, RoiDataset, SpatialFootprint};

/// Computes one similarity matrix per configured modality.
///
/// All matrices share the global ROI index of the dataset and exactly the
/// same support: the candidate pairs. A pair `(i, j)`, `i != j`, is a
/// candidate when the normalized footprints overlap by more than
/// `min_footprint_overlap` and the sessions pass the adjacency rule.
#[derive(Debug, Clone)]
pub struct SparseSimilarityBuilder {
    config: SimilarityConfig,
    masker: SessionConstraintMasker,
}

impl SparseSimilarityBuilder {
    pub fn new(config: SimilarityConfig) -> Self {
        let masker = SessionConstraintMasker::new(config.max_session_gap);
        Self { config, masker }
    }

    #[inline]
    pub fn masker(&self) -> &SessionConstraintMasker {
        &self.masker
    }

    /// Compute every configured modality from the features stored on the ROIs.
    ///
    /// # Errors
    ///
    /// `TrackingError::ShapeMismatch` if a feature-based modality is requested
    /// but some ROIs lack the feature, or feature dimensions disagree.
    pub fn build(&self, dataset: &RoiDataset) -> TrackingResult<SimilaritySet> {
        let mut features = BTreeMap::new();
        for &modality in &self.config.modalities {
            let column: Vec<Vec<f32>> = match modality {
                Modality::SpatialFootprint => continue,
                Modality::Embedding => dataset.rois().filter_map(|r| r.embedding.clone()).collect(),
                Modality::Wavelet => dataset.rois().filter_map(|r| r.wavelet.clone()).collect(),
            };
            features.insert(modality, column);
        }
        let footprints: Vec<&SpatialFootprint> = dataset.rois().map(|r| &r.footprint).collect();
        self.build_from_parts(&footprints, dataset.session_of(), dataset.fov(), &features)
    }

    /// Compute similarities from footprints and externally supplied feature
    /// tables (one row per ROI, global index order). `fov` is
    /// `(fov_height, fov_width)`; footprint pixels index its flattened grid.
    ///
    /// # Errors
    ///
    /// `TrackingError::InvalidInput` if a footprint pixel lies outside the FOV,
    /// `TrackingError::ShapeMismatch` for inconsistent feature tables.
    pub fn build_from_parts(
        &self,
        footprints: &[&SpatialFootprint],
        session_of: &[usize],
        fov: (usize, usize),
        features: &BTreeMap<Modality, Vec<Vec<f32>>>,
    ) -> TrackingResult<SimilaritySet> {
        let n = footprints.len();
        if session_of.len() != n {
            return Err(TrackingError::shape_mismatch("session_of", n, session_of.len()));
        }
        let n_pixels = fov.0.checked_mul(fov.1).ok_or_else(|| {
            TrackingError::invalid_input(format!("FOV {}x{} overflows the pixel index", fov.0, fov.1))
        })?;
        if let Some((roi, pixel)) = footprints
            .iter()
            .enumerate()
            .find_map(|(roi, fp)| fp.max_pixel().filter(|&p| p >= n_pixels).map(|p| (roi, p)))
        {
            return Err(TrackingError::invalid_input(format!(
                "footprint of ROI {} has pixel {} outside the {}x{} FOV",
                roi, pixel, fov.0, fov.1
            )));
        }
        for &modality in self.config.modalities.iter().filter(|m| m.is_feature_based()) {
            let table = features
                .get(&modality)
                .ok_or_else(|| TrackingError::shape_mismatch(modality.key(), n, 0))?;
            validate_feature_table(modality, table, n)?;
        }

        let s_sf = self.footprint_similarity(footprints, session_of, n_pixels)?;
        info!(
            n_rois = n,
            n_candidates = s_sf.nnz(),
            "Computed candidate pairs from footprint overlap"
        );
        if s_sf.is_empty() && n > 1 {
            warn!("No overlapping footprints found; similarity graph is empty");
        }

        let mut set = SimilaritySet::new();
        for &modality in &self.config.modalities {
            let matrix = match modality {
                Modality::SpatialFootprint => s_sf.clone(),
                _ => {
                    // Presence checked above.
                    let table = features
                        .get(&modality)
                        .ok_or_else(|| TrackingError::shape_mismatch(modality.key(), n, 0))?;
                    feature_similarity(table, &s_sf, self.config.center_features)
                }
            };
            debug!(modality = modality.key(), nnz = matrix.nnz(), "Built similarity matrix");
            set.insert(modality, matrix)?;
        }
        Ok(set)
    }

    /// `s_sf`: dot products of power-scaled, L2-normalized footprints.
    fn footprint_similarity(
        &self,
        footprints: &[&SpatialFootprint],
        session_of: &[usize],
        n_pixels: usize,
    ) -> TrackingResult<SparseMatrix<f32>> {
        let n = footprints.len();
        let normalized: Vec<Vec<f32>> = footprints
            .iter()
            .map(|fp| fp.normalized_weights(self.config.sf_mask_power))
            .collect();

        // Pixels were checked against the FOV by the caller.
        let mut inverted: Vec<Vec<(usize, f32)>> = vec![Vec::new(); n_pixels];
        for (roi, (fp, weights)) in footprints.iter().zip(&normalized).enumerate() {
            for (&pixel, &w) in fp.pixels().iter().zip(weights) {
                if w > 0.0 {
                    inverted[pixel].push((roi, w));
                }
            }
        }

        let mut overlap: HashMap<(usize, usize), f32> = HashMap::new();
        for owners in &inverted {
            for (a, &(i, wi)) in owners.iter().enumerate() {
                for &(j, wj) in &owners[a + 1..] {
                    if self.masker.is_candidate_pair(session_of[i], session_of[j]) {
                        *overlap.entry((i, j)).or_insert(0.0) += wi * wj;
                    }
                }
            }
        }

        let mut builder = TripletBuilder::with_capacity((n, n), overlap.len() * 2);
        for ((i, j), s) in overlap {
            if s > self.config.min_footprint_overlap {
                builder.push_symmetric(i, j, s.min(1.0))?;
            }
        }
        Ok(builder.build())
    }
}

fn validate_feature_table(modality: Modality, table: &[Vec<f32>], n: usize) -> TrackingResult<()> {
    if table.len() != n {
        return Err(TrackingError::shape_mismatch(modality.key(), n, table.len()));
    }
    if let Some(first) = table.first() {
        let dim = first.len();
        if let Some(bad) = table.iter().find(|row| row.len() != dim) {
            return Err(TrackingError::shape_mismatch(
                format!("{} feature dimension", modality.key()),
                dim,
                bad.len(),
            ));
        }
        if let Some(row) = table.iter().position(|row| row.iter().any(|v| !v.is_finite())) {
            return Err(TrackingError::invalid_input(format!(
                "{} features of ROI {} are not finite",
                modality.key(),
                row
            )));
        }
    }
    Ok(())
}

/// Cosine similarity of feature rows on the stored support of `support`.
fn feature_similarity(table: &[Vec<f32>], support: &SparseMatrix<f32>, center: bool) -> SparseMatrix<f32> {
    let dim = table.first().map_or(0, Vec::len);
    let mean: Vec<f32> = if center && !table.is_empty() {
        let mut mean = vec![0.0f32; dim];
        for row in table {
            for (m, v) in mean.iter_mut().zip(row) {
                *m += v;
            }
        }
        mean.iter_mut().for_each(|m| *m /= table.len() as f32);
        mean
    } else {
        vec![0.0; dim]
    };
    support.map_indexed(|i, j, _| cosine_centered(&table[i], &table[j], &mean))
}

/// Cosine similarity of `a - mean` and `b - mean`; zero if either is zero.
pub fn cosine_centered(a: &[f32], b: &[f32], mean: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for ((&x, &y), &m) in a.iter().zip(b).zip(mean) {
        let (x, y) = (x - m, y - m);
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = (na * nb).sqrt();
    if denom > 0.0 {
        (dot / denom).clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RoiRecord, SessionData};

    fn config(modalities: Vec<Modality>) -> SimilarityConfig {
        SimilarityConfig {
            modalities,
            ..SimilarityConfig::default()
        }
    }

    fn roi(pixels: Vec<usize>, emb: Vec<f32>) -> RoiRecord {
        let weights = vec![1.0; pixels.len()];
        RoiRecord::new(SpatialFootprint::new(pixels, weights).unwrap())
            .with_embedding(emb.clone())
            .with_wavelet(emb)
    }

    fn dataset() -> RoiDataset {
        let s0 = SessionData {
            name: "s0".into(),
            fov_height: 4,
            fov_width: 4,
            rois: vec![roi(vec![0, 1], vec![1.0, 0.0]), roi(vec![1, 2], vec![0.0, 1.0])],
        };
        let s1 = SessionData {
            name: "s1".into(),
            fov_height: 4,
            fov_width: 4,
            rois: vec![roi(vec![0, 1], vec![1.0, 0.1]), roi(vec![10, 11], vec![0.5, 0.5])],
        };
        RoiDataset::new(vec![s0, s1]).unwrap()
    }

    #[test]
    fn test_footprint_overlap_values() {
        let builder = SparseSimilarityBuilder::new(config(vec![Modality::SpatialFootprint]));
        let set = builder.build(&dataset()).unwrap();
        let sf = set.get(Modality::SpatialFootprint).unwrap();

        assert!((sf.get(0, 2).unwrap() - 1.0).abs() < 1e-6, "identical footprints");
        assert!((sf.get(0, 1).unwrap() - 0.5).abs() < 1e-6, "one shared pixel of two");
        assert_eq!(sf.get(0, 3), None, "disjoint footprints are not candidates");
        assert_eq!(sf.get(0, 0), None, "diagonal is not stored");
        assert!(sf.is_symmetric());
    }

    #[test]
    fn test_all_modalities_share_support() {
        let builder = SparseSimilarityBuilder::new(config(Modality::all().to_vec()));
        let set = builder.build(&dataset()).unwrap();
        let sf = set.get(Modality::SpatialFootprint).unwrap();
        for m in Modality::all() {
            assert!(set.get(m).unwrap().same_support(sf), "{} support differs", m);
        }
    }

    #[test]
    fn test_missing_features_is_shape_mismatch() {
        let mut ds_sessions = dataset().sessions().to_vec();
        ds_sessions[1].rois[0].embedding = None;
        let ds = RoiDataset::new(ds_sessions).unwrap();
        let builder = SparseSimilarityBuilder::new(config(vec![Modality::Embedding]));
        let err = builder.build(&ds).unwrap_err();
        assert!(matches!(
            err,
            TrackingError::ShapeMismatch { expected: 4, actual: 3, .. }
        ));
    }

    #[test]
    fn test_external_feature_table_checked() {
        let ds = dataset();
        let footprints: Vec<_> = ds.rois().map(|r| &r.footprint).collect();
        let mut features = BTreeMap::new();
        features.insert(Modality::Wavelet, vec![vec![1.0, 2.0]; 3]);
        let builder = SparseSimilarityBuilder::new(config(vec![Modality::Wavelet]));
        let err = builder
            .build_from_parts(&footprints, ds.session_of(), ds.fov(), &features)
            .unwrap_err();
        assert!(err.to_string().contains("s_SWT"));
    }

    #[test]
    fn test_pixels_outside_fov_rejected_before_indexing() {
        let ds = dataset();
        let stray = SpatialFootprint::new(vec![3, usize::MAX - 1], vec![1.0, 1.0]).unwrap();
        let mut footprints: Vec<_> = ds.rois().map(|r| &r.footprint).collect();
        footprints[2] = &stray;
        let builder = SparseSimilarityBuilder::new(config(vec![Modality::SpatialFootprint]));

        let err = builder
            .build_from_parts(&footprints, ds.session_of(), ds.fov(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, TrackingError::InvalidInput { .. }), "got {:?}", err);
        assert!(err.to_string().contains("ROI 2"), "error names the ROI: {}", err);

        let err = builder
            .build_from_parts(&footprints[..2], &ds.session_of()[..2], (usize::MAX, 2), &BTreeMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("overflows"), "{}", err);
        println!("[PASS] out-of-FOV footprints rejected");
    }

    #[test]
    fn test_session_gap_limits_candidates() {
        let mut cfg = config(vec![Modality::SpatialFootprint]);
        cfg.max_session_gap = Some(0);
        let set = SparseSimilarityBuilder::new(cfg).build(&dataset()).unwrap();
        let sf = set.get(Modality::SpatialFootprint).unwrap();
        assert_eq!(sf.get(0, 2), None, "cross-session pair beyond the gap");
        assert!(sf.contains(0, 1), "same-session overlap stays a candidate");
    }

    #[test]
    fn test_cosine_centered() {
        assert!((cosine_centered(&[1.0, 0.0], &[2.0, 0.0], &[0.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_centered(&[1.0, 0.0], &[0.0, 1.0], &[0.0, 0.0]).abs() < 1e-6);
        assert_eq!(cosine_centered(&[1.0, 1.0], &[1.0, 1.0], &[1.0, 1.0]), 0.0);
    }
}
