//! Coordinate-format builder for [`SparseMatrix`].

use sprs::{CsMat, TriMat};

use super::{SparseMatrix, SparseValue};
use crate::error::{TrackingError, TrackingResult};

/// Accumulates `(row, col, value)` triplets in an `sprs::TriMat` and
/// compresses them into CSR.
///
/// Triplets may arrive in any order. Pushing one position more than once
/// accumulates the values (see [`SparseValue::Accum`]).
#[derive(Debug)]
pub struct TripletBuilder<T: SparseValue> {
    tri: TriMat<T::Accum>,
}

impl<T: SparseValue> TripletBuilder<T> {
    pub fn new(shape: (usize, usize)) -> Self {
        Self { tri: TriMat::new(shape) }
    }

    pub fn with_capacity(shape: (usize, usize), nnz: usize) -> Self {
        Self {
            tri: TriMat::with_capacity(shape, nnz),
        }
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.tri.shape()
    }

    /// Number of pushed triplets (duplicates included).
    #[inline]
    pub fn len(&self) -> usize {
        self.tri.nnz()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tri.nnz() == 0
    }

    /// Add one entry.
    ///
    /// # Errors
    ///
    /// `TrackingError::InvalidParameter` if the position is out of bounds.
    pub fn push(&mut self, row: usize, col: usize, value: T) -> TrackingResult<()> {
        let (nrows, ncols) = self.tri.shape();
        if row >= nrows || col >= ncols {
            return Err(TrackingError::invalid_parameter(format!(
                "entry ({}, {}) out of bounds for shape {:?}",
                row,
                col,
                self.tri.shape()
            )));
        }
        self.tri.add_triplet(row, col, value.to_accum());
        Ok(())
    }

    /// Add `(row, col)` and, off the diagonal, its mirror `(col, row)`.
    pub fn push_symmetric(&mut self, row: usize, col: usize, value: T) -> TrackingResult<()> {
        self.push(row, col, value)?;
        if row != col {
            self.push(col, row, value)?;
        }
        Ok(())
    }

    /// Compress into CSR with sorted column indices.
    pub fn build(self) -> SparseMatrix<T> {
        let csr: CsMat<T::Accum> = self.tri.to_csr();
        SparseMatrix::from_csmat(csr.map(|&acc| T::from_accum(acc)))
    }
}
