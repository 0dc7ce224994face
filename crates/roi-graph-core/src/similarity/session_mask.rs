//! Session-adjacency rules and the `s_sesh` eligibility mask.

use crate::error::{TrackingError, TrackingResult};
use crate::sparse::{SparseMatrix, SparseValue, TripletBuilder};

/// Enforces which ROI pairs may be compared and matched across sessions.
///
/// Two sessions are *adjacent* when their indices differ by at most
/// `max_session_gap` (every pair of sessions when unset). Candidate pairs
/// are adjacent pairs, including pairs inside one session; eligible pairs
/// are candidate pairs from different sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionConstraintMasker {
    max_session_gap: Option<usize>,
}

/// Masks derived from the candidate support.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionMasks {
    /// `s_sesh`: `true` for every candidate pair from different sessions.
    pub eligible: SparseMatrix<bool>,
    /// Same-session candidate pairs. These are known non-matches and serve as
    /// the reference distribution for the clustering objective.
    pub null: SparseMatrix<bool>,
}

impl SessionConstraintMasker {
    pub fn new(max_session_gap: Option<usize>) -> Self {
        Self { max_session_gap }
    }

    #[inline]
    pub fn max_session_gap(&self) -> Option<usize> {
        self.max_session_gap
    }

    /// Adjacency rule only. Same-session pairs pass.
    #[inline]
    pub fn is_candidate_pair(&self, si: usize, sj: usize) -> bool {
        self.max_session_gap.map_or(true, |gap| si.abs_diff(sj) <= gap)
    }

    /// True iff ROIs from sessions `si` and `sj` may be matched.
    #[inline]
    pub fn is_eligible(&self, si: usize, sj: usize) -> bool {
        si != sj && self.is_candidate_pair(si, sj)
    }

    /// Split the candidate support into eligible and null masks.
    ///
    /// Diagonal entries are never stored in either mask.
    ///
    /// # Errors
    ///
    /// `TrackingError::ShapeMismatch` if `candidates` is not
    /// `session_of.len()` square.
    pub fn build<T: SparseValue>(
        &self,
        session_of: &[usize],
        candidates: &SparseMatrix<T>,
    ) -> TrackingResult<SessionMasks> {
        let n = session_of.len();
        if candidates.shape() != (n, n) {
            return Err(TrackingError::shape_mismatch(
                "s_sesh",
                n,
                candidates.nrows().max(candidates.ncols()),
            ));
        }

        let mut eligible = TripletBuilder::new((n, n));
        let mut null = TripletBuilder::new((n, n));
        for (i, j, _) in candidates.iter() {
            if i == j {
                continue;
            }
            let (si, sj) = (session_of[i], session_of[j]);
            if self.is_eligible(si, sj) {
                eligible.push(i, j, true)?;
            } else if si == sj {
                null.push(i, j, true)?;
            }
        }

        Ok(SessionMasks {
            eligible: eligible.build(),
            null: null.build(),
        })
    }
}
