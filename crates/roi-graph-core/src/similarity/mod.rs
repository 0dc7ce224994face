//! Pairwise similarity between ROIs across sessions.
//!
//! # Components
//!
//! - [`SessionConstraintMasker`]: session-adjacency rules and the `s_sesh`
//!   eligibility mask
//! - [`SparseSimilarityBuilder`]: one sparse matrix per [`Modality`], computed
//!   only on candidate pairs
//! - [`SimilaritySet`]: ordered collection of per-modality matrices sharing one
//!   global ROI index
//!
//! Candidate pairs are found through an inverted pixel index, so the work is
//! proportional to the number of overlapping footprints rather than to the
//! square of the ROI count.

mod builder;
mod session_mask;

pub use builder::{cosine_centered, SparseSimilarityBuilder};
pub use session_mask::{SessionConstraintMasker, SessionMasks};

use std::collections::BTreeMap;

use crate::error::{TrackingError, TrackingResult};
use crate::sparse::SparseMatrix;
use crate::types::Modality;

/// Per-modality similarity matrices over one global ROI index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimilaritySet {
    matrices: BTreeMap<Modality, SparseMatrix<f32>>,
}

impl SimilaritySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a modality matrix.
    ///
    /// # Errors
    ///
    /// `TrackingError::ShapeMismatch` if the matrix is not square or its size
    /// differs from matrices already in the set.
    pub fn insert(&mut self, modality: Modality, matrix: SparseMatrix<f32>) -> TrackingResult<()> {
        let (nrows, ncols) = matrix.shape();
        if nrows != ncols {
            return Err(TrackingError::shape_mismatch(modality.key(), nrows, ncols));
        }
        if let Some(n) = self.n_rois() {
            if n != nrows {
                return Err(TrackingError::shape_mismatch(modality.key(), n, nrows));
            }
        }
        self.matrices.insert(modality, matrix);
        Ok(())
    }

    #[inline]
    pub fn get(&self, modality: Modality) -> Option<&SparseMatrix<f32>> {
        self.matrices.get(&modality)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Modality, &SparseMatrix<f32>)> + '_ {
        self.matrices.iter().map(|(m, s)| (*m, s))
    }

    pub fn modalities(&self) -> impl Iterator<Item = Modality> + '_ {
        self.matrices.keys().copied()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.matrices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.matrices.is_empty()
    }

    /// Side length shared by all matrices, if any are present.
    pub fn n_rois(&self) -> Option<usize> {
        self.matrices.values().next().map(|m| m.nrows())
    }

    /// Every matrix restricted to the `true` entries of `mask`.
    ///
    /// Values outside the mask become absent, never zero.
    pub fn masked(&self, mask: &SparseMatrix<bool>) -> Self {
        self.map(|m| m.mask_with(mask))
    }

    /// Every matrix restricted to the stored positions of `support`.
    pub fn restricted(&self, support: &SparseMatrix<bool>) -> Self {
        self.map(|m| m.restrict_to_support(support))
    }

    fn map(&self, f: impl Fn(&SparseMatrix<f32>) -> SparseMatrix<f32>) -> Self {
        Self {
            matrices: self.matrices.iter().map(|(m, s)| (*m, f(s))).collect(),
        }
    }
}

impl IntoIterator for SimilaritySet {
    type Item = (Modality, SparseMatrix<f32>);
    type IntoIter = std::collections::btree_map::IntoIter<Modality, SparseMatrix<f32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.matrices.into_iter()
    }
}
