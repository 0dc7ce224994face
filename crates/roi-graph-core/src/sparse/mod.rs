//! Compressed sparse row storage for similarity graphs and masks.
//!
//! Every similarity, distance and mask matrix in the pipeline is a square
//! [`SparseMatrix`] over the global ROI index, stored as an `sprs::CsMat` in
//! CSR order. A stored entry means "this pair was computed"; its value may
//! legitimately be `0.0` or `false`. Absence means "no relation computed",
//! which is a different thing from zero similarity. `sprs` keeps explicit
//! zeros, so the support survives every operation below.
//!
//! # Layout
//!
//! ```text
//! indptr  : [0, 2, 2, 3]        (nrows + 1)
//! indices : [1, 2, 0]           (nnz, strictly increasing within a row)
//! data    : [0.8, 0.1, 0.8]     (nnz)
//! ```
//!
//! The raw buffers are exposed read-only so that regression tests can hash
//! them; see [`SparseMatrix::content_hash`].

mod triplets;

pub use triplets::TripletBuilder;

use std::fmt;
use std::ops::{Add, Range};

use serde::{Deserialize, Serialize};
use sprs::CsMat;
use xxhash_rust::xxh64::xxh64;

use crate::error::{TrackingError, TrackingResult};

/// Value types that can live in a [`SparseMatrix`].
pub trait SparseValue: Copy + PartialEq + Default + fmt::Debug + Send + Sync + 'static {
    /// Scalar that triplets are accumulated in before compression.
    /// Duplicate positions are summed in this type.
    type Accum: Copy + Default + fmt::Debug + Add<Output = Self::Accum> + Send + Sync + 'static;

    fn to_accum(self) -> Self::Accum;

    fn from_accum(acc: Self::Accum) -> Self;

    /// Append the little-endian byte representation used for content hashing.
    fn write_le(&self, out: &mut Vec<u8>);
}

impl SparseValue for f32 {
    type Accum = f32;

    #[inline]
    fn to_accum(self) -> f32 {
        self
    }

    #[inline]
    fn from_accum(acc: f32) -> f32 {
        acc
    }

    #[inline]
    fn write_le(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.to_le_bytes());
    }
}

/// Masks count pushes per position; any positive count is `true`.
impl SparseValue for bool {
    type Accum = u32;

    #[inline]
    fn to_accum(self) -> u32 {
        u32::from(self)
    }

    #[inline]
    fn from_accum(acc: u32) -> bool {
        acc > 0
    }

    #[inline]
    fn write_le(&self, out: &mut Vec<u8>) {
        out.push(u8::from(*self));
    }
}

/// CSR sparse matrix with explicit support tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SparseMatrix<T> {
    inner: CsMat<T>,
}

impl<T: SparseValue> SparseMatrix<T> {
    /// Create a matrix with no stored entries.
    pub fn empty(shape: (usize, usize)) -> Self {
        Self::from_csr_parts(shape, vec![0; shape.0 + 1], Vec::new(), Vec::new())
    }

    /// Create a matrix from raw CSR buffers, validating the layout.
    ///
    /// # Errors
    ///
    /// `TrackingError::InvalidParameter` if the buffers are inconsistent:
    /// wrong `indptr` length, non-monotone row pointers, buffer lengths that
    /// disagree with `indptr`, or columns out of bounds.
    pub fn try_new(
        shape: (usize, usize),
        indptr: Vec<usize>,
        indices: Vec<usize>,
        data: Vec<T>,
    ) -> TrackingResult<Self> {
        if indptr.len() != shape.0 + 1 {
            return Err(TrackingError::invalid_parameter(format!(
                "indptr length must be nrows + 1 = {}, got {}",
                shape.0 + 1,
                indptr.len()
            )));
        }
        let inner = CsMat::try_new(shape, indptr, indices, data).map_err(|(_, _, _, e)| {
            TrackingError::invalid_parameter(format!("invalid CSR layout for shape {:?}: {}", shape, e))
        })?;
        Ok(Self { inner })
    }

    /// Build a matrix from `(row, col, value)` triplets.
    ///
    /// Duplicate positions are accumulated: summed for `f32`, or-ed for `bool`.
    pub fn from_triplets(
        shape: (usize, usize),
        triplets: impl IntoIterator<Item = (usize, usize, T)>,
    ) -> TrackingResult<Self> {
        let mut builder = TripletBuilder::new(shape);
        for (row, col, value) in triplets {
            builder.push(row, col, value)?;
        }
        Ok(builder.build())
    }

    /// Wrap buffers that are valid CSR by construction.
    fn from_csr_parts(shape: (usize, usize), indptr: Vec<usize>, indices: Vec<usize>, data: Vec<T>) -> Self {
        Self {
            inner: CsMat::new(shape, indptr, indices, data),
        }
    }

    pub(crate) fn from_csmat(inner: CsMat<T>) -> Self {
        if inner.is_csr() {
            Self { inner }
        } else {
            Self { inner: inner.to_csr() }
        }
    }

    /// Underlying `sprs` matrix.
    #[inline]
    pub fn as_csmat(&self) -> &CsMat<T> {
        &self.inner
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        self.inner.shape()
    }

    #[inline]
    pub fn nrows(&self) -> usize {
        self.inner.rows()
    }

    #[inline]
    pub fn ncols(&self) -> usize {
        self.inner.cols()
    }

    /// Number of stored entries.
    #[inline]
    pub fn nnz(&self) -> usize {
        self.inner.nnz()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.nnz() == 0
    }

    /// Row pointer buffer (length `nrows + 1`).
    #[inline]
    pub fn indptr(&self) -> &[usize] {
        self.inner.indptr().into_raw_storage()
    }

    /// Column index buffer (length `nnz`).
    #[inline]
    pub fn indices(&self) -> &[usize] {
        self.inner.indices()
    }

    /// Value buffer (length `nnz`).
    #[inline]
    pub fn data(&self) -> &[T] {
        self.inner.data()
    }

    /// Mutable value buffer. The support cannot be changed through it.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [T] {
        self.inner.data_mut()
    }

    /// Position range of `row` inside `indices` / `data`.
    #[inline]
    pub fn row_range(&self, row: usize) -> Range<usize> {
        let indptr = self.indptr();
        indptr[row]..indptr[row + 1]
    }

    /// Number of stored entries in `row`.
    #[inline]
    pub fn row_nnz(&self, row: usize) -> usize {
        self.row_range(row).len()
    }

    /// Stored `(col, value)` pairs of `row`, in column order.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, T)> + '_ {
        let range = self.row_range(row);
        self.indices()[range.clone()]
            .iter()
            .copied()
            .zip(self.data()[range].iter().copied())
    }

    /// All stored `(row, col, value)` triplets in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, T)> + '_ {
        (0..self.nrows()).flat_map(move |row| self.row(row).map(move |(col, v)| (row, col, v)))
    }

    /// Stored value at `(row, col)`, if any.
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row >= self.nrows() || col >= self.ncols() {
            return None;
        }
        self.inner.get(row, col).copied()
    }

    /// True if `(row, col)` is part of the stored support.
    #[inline]
    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.get(row, col).is_some()
    }

    /// Apply `f` to every stored value, keeping the support unchanged.
    pub fn map_values<U: SparseValue>(&self, mut f: impl FnMut(T) -> U) -> SparseMatrix<U> {
        SparseMatrix {
            inner: self.inner.map(|&v| f(v)),
        }
    }

    /// Like [`Self::map_values`], with the entry's position passed to `f`.
    pub fn map_indexed<U: SparseValue>(&self, mut f: impl FnMut(usize, usize, T) -> U) -> SparseMatrix<U> {
        SparseMatrix::from_csr_parts(
            self.shape(),
            self.indptr().to_vec(),
            self.indices().to_vec(),
            self.iter().map(|(r, c, v)| f(r, c, v)).collect(),
        )
    }

    /// Keep only the entries for which `keep(row, col, value)` is true.
    pub fn filter(&self, mut keep: impl FnMut(usize, usize, T) -> bool) -> Self {
        let mut indptr = Vec::with_capacity(self.nrows() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for row in 0..self.nrows() {
            for (col, value) in self.row(row) {
                if keep(row, col, value) {
                    indices.push(col);
                    data.push(value);
                }
            }
            indptr.push(indices.len());
        }
        Self::from_csr_parts(self.shape(), indptr, indices, data)
    }

    /// Keep only the entries whose position is stored in `other` (any value).
    pub fn restrict_to_support<U: SparseValue>(&self, other: &SparseMatrix<U>) -> Self {
        self.merge_filter(other, |_| true)
    }

    /// Keep only the entries where `mask` stores `true`.
    pub fn mask_with(&self, mask: &SparseMatrix<bool>) -> Self {
        self.merge_filter(mask, |m| m)
    }

    fn merge_filter<U: SparseValue>(&self, other: &SparseMatrix<U>, accept: impl Fn(U) -> bool) -> Self {
        let mut indptr = Vec::with_capacity(self.nrows() + 1);
        let mut indices = Vec::new();
        let mut data = Vec::new();
        indptr.push(0);
        for row in 0..self.nrows() {
            if row < other.nrows() {
                let mut theirs = other.row(row).peekable();
                for (col, value) in self.row(row) {
                    while matches!(theirs.peek(), Some(&(c, _)) if c < col) {
                        theirs.next();
                    }
                    if let Some(&(c, u)) = theirs.peek() {
                        if c == col && accept(u) {
                            indices.push(col);
                            data.push(value);
                        }
                    }
                }
            }
            indptr.push(indices.len());
        }
        Self::from_csr_parts(self.shape(), indptr, indices, data)
    }

    /// True if every stored position of `self` is also stored in `other`.
    pub fn support_is_subset_of<U: SparseValue>(&self, other: &SparseMatrix<U>) -> bool {
        self.shape() == other.shape() && self.iter().all(|(r, c, _)| other.contains(r, c))
    }

    /// True if both matrices store exactly the same positions.
    pub fn same_support<U: SparseValue>(&self, other: &SparseMatrix<U>) -> bool {
        self.shape() == other.shape() && self.indptr() == other.indptr() && self.indices() == other.indices()
    }

    /// Support of this matrix as a boolean matrix of `true` entries.
    pub fn support(&self) -> SparseMatrix<bool> {
        self.map_values(|_| true)
    }

    /// True if the matrix is square and `A[i,j] == A[j,i]` for every stored entry.
    pub fn is_symmetric(&self) -> bool {
        self.nrows() == self.ncols() && self.iter().all(|(r, c, v)| self.get(c, r) == Some(v))
    }

    /// Transposed copy in CSR order.
    pub fn transpose(&self) -> Self {
        Self::from_csmat(self.inner.transpose_view().to_csr())
    }

    /// Dense copy, absent entries filled with `T::default()`. Intended for tests
    /// and small diagnostics only.
    pub fn to_dense(&self) -> Vec<Vec<T>> {
        let mut dense = vec![vec![T::default(); self.ncols()]; self.nrows()];
        for (r, c, v) in self.iter() {
            dense[r][c] = v;
        }
        dense
    }

    /// Raw little-endian bytes of shape, indptr, indices and data.
    pub fn raw_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16 + 8 * (self.indptr().len() + self.nnz()) + 4 * self.nnz());
        out.extend_from_slice(&(self.nrows() as u64).to_le_bytes());
        out.extend_from_slice(&(self.ncols() as u64).to_le_bytes());
        for &p in self.indptr() {
            out.extend_from_slice(&(p as u64).to_le_bytes());
        }
        for &i in self.indices() {
            out.extend_from_slice(&(i as u64).to_le_bytes());
        }
        for v in self.data() {
            v.write_le(&mut out);
        }
        out
    }

    /// xxh64 of [`Self::raw_bytes`] as 16 lowercase hex digits.
    ///
    /// Identical buffers always give identical hashes, so two runs of the
    /// pipeline with the same inputs and seed can be compared byte for byte.
    pub fn content_hash(&self) -> String {
        format!("{:016x}", xxh64(&self.raw_bytes(), 0))
    }
}

impl SparseMatrix<f32> {
    /// Check that every stored value is finite.
    pub fn validate_finite(&self, name: &str) -> TrackingResult<()> {
        if let Some((r, c, v)) = self.iter().find(|(_, _, v)| !v.is_finite()) {
            return Err(TrackingError::invalid_parameter(format!(
                "{}[{}][{}] is not finite: {}",
                name, r, c, v
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SparseMatrix<f32> {
        SparseMatrix::from_triplets(
            (3, 3),
            vec![(0, 1, 0.8), (1, 0, 0.8), (0, 2, 0.1), (2, 0, 0.1), (1, 2, 0.0), (2, 1, 0.0)],
        )
        .unwrap()
    }

    #[test]
    fn test_triplets_sorted_into_csr() {
        let m = sample();
        assert_eq!(m.indptr(), &[0, 2, 4, 6]);
        assert_eq!(m.indices(), &[1, 2, 0, 2, 0, 1]);
        assert_eq!(m.nnz(), 6);
        assert_eq!(m.get(0, 1), Some(0.8));
        assert_eq!(m.get(0, 0), None);
        assert_eq!(m.get(7, 0), None, "out-of-range lookups are absent, not a panic");
        assert!(m.as_csmat().is_csr());
    }

    #[test]
    fn test_explicit_zero_is_stored() {
        let m = sample();
        assert_eq!(m.get(1, 2), Some(0.0), "explicit zero must stay in the support");
        assert!(m.contains(2, 1));
        assert_eq!(m.map_values(|v| v * 2.0).nnz(), 6, "mapping keeps explicit zeros");
    }

    #[test]
    fn test_try_new_rejects_bad_layout() {
        assert!(SparseMatrix::<f32>::try_new((2, 2), vec![0, 1], vec![0], vec![1.0]).is_err());
        assert!(SparseMatrix::<f32>::try_new((2, 2), vec![0, 2, 1], vec![0, 1], vec![1.0, 1.0]).is_err());
        assert!(SparseMatrix::<f32>::try_new((2, 2), vec![0, 1, 1], vec![5], vec![1.0]).is_err());
        assert!(SparseMatrix::<f32>::try_new((2, 2), vec![0, 1, 2], vec![0], vec![1.0]).is_err());
        assert!(SparseMatrix::<f32>::try_new((2, 2), vec![0, 1, 2], vec![1, 0], vec![1.0, 2.0]).is_ok());
    }

    #[test]
    fn test_empty_has_row_pointers() {
        let m = SparseMatrix::<bool>::empty((3, 2));
        assert_eq!(m.indptr(), &[0, 0, 0, 0]);
        assert!(m.is_empty());
        assert_eq!(m.shape(), (3, 2));
    }

    #[test]
    fn test_mask_with_keeps_true_entries_only() {
        let m = sample();
        let mask =
            SparseMatrix::from_triplets((3, 3), vec![(0, 1, true), (0, 2, false), (2, 1, true)]).unwrap();
        let masked = m.mask_with(&mask);
        assert_eq!(masked.nnz(), 2);
        assert_eq!(masked.get(0, 1), Some(0.8));
        assert_eq!(masked.get(2, 1), Some(0.0));
        assert!(masked.support_is_subset_of(&m));
    }

    #[test]
    fn test_restrict_to_support_ignores_mask_values() {
        let m = sample();
        let other = SparseMatrix::from_triplets((3, 3), vec![(0, 2, false), (1, 0, true)]).unwrap();
        let restricted = m.restrict_to_support(&other);
        assert_eq!(restricted.nnz(), 2);
        assert!(restricted.contains(0, 2));
    }

    #[test]
    fn test_symmetry_and_transpose() {
        let m = sample();
        assert!(m.is_symmetric());
        assert_eq!(m.transpose(), m);

        let asym = SparseMatrix::from_triplets((2, 3), vec![(0, 2, 1.0), (1, 0, 2.0)]).unwrap();
        assert!(!asym.is_symmetric());
        let t = asym.transpose();
        assert_eq!(t.shape(), (3, 2));
        assert_eq!(t.get(2, 0), Some(1.0));
        assert_eq!(t.get(0, 1), Some(2.0));
        assert_eq!(
            t.to_dense(),
            vec![vec![0.0, 2.0], vec![0.0, 0.0], vec![1.0, 0.0]],
            "absent entries densify to zero"
        );
    }

    #[test]
    fn test_filter_and_subset() {
        let m = sample();
        let strong = m.filter(|_, _, v| v > 0.5);
        assert_eq!(strong.nnz(), 2);
        assert!(strong.support_is_subset_of(&m));
        assert!(!m.support_is_subset_of(&strong));
    }

    #[test]
    fn test_content_hash_is_stable_and_sensitive() {
        let a = sample();
        let b = sample();
        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(a.content_hash().len(), 16);

        let mut c = sample();
        c.data_mut()[0] = 0.7;
        assert_ne!(a.content_hash(), c.content_hash());
    }

    #[test]
    fn test_serde_keeps_support() {
        let m = sample();
        let text = serde_json::to_string(&m).unwrap();
        let back: SparseMatrix<f32> = serde_json::from_str(&text).unwrap();
        assert_eq!(back.content_hash(), m.content_hash());
    }

    #[test]
    fn test_validate_finite() {
        let mut m = sample();
        assert!(m.validate_finite("m").is_ok());
        m.data_mut()[3] = f32::NAN;
        let err = m.validate_finite("m").unwrap_err().to_string();
        assert!(err.contains("not finite"));
    }
}
