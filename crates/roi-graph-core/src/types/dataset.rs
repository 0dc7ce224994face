//! ROI records, sessions and the concatenated multi-session dataset.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::footprint::SpatialFootprint;
use crate::error::{TrackingError, TrackingResult};
use crate::sparse::SparseMatrix;

/// One detected region in one session. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiRecord {
    pub footprint: SpatialFootprint,
    /// Latent vector from the embedding network, if computed.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Wavelet-transform descriptor, if computed.
    #[serde(default)]
    pub wavelet: Option<Vec<f32>>,
}

impl RoiRecord {
    pub fn new(footprint: SpatialFootprint) -> Self {
        Self {
            footprint,
            embedding: None,
            wavelet: None,
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    #[must_use]
    pub fn with_wavelet(mut self, wavelet: Vec<f32>) -> Self {
        self.wavelet = Some(wavelet);
        self
    }
}

/// All ROIs detected in one imaging session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionData {
    pub name: String,
    pub fov_height: usize,
    pub fov_width: usize,
    pub rois: Vec<RoiRecord>,
}

impl SessionData {
    #[inline]
    pub fn n_pixels(&self) -> usize {
        self.fov_height * self.fov_width
    }
}

/// Sessions concatenated in input order into one global ROI index.
///
/// Global index `g` of ROI `r` in session `s` is `offsets[s] + r`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoiDataset {
    sessions: Vec<SessionData>,
    offsets: Vec<usize>,
    session_of: Vec<usize>,
}

impl RoiDataset {
    /// Build and validate a dataset.
    ///
    /// # Errors
    ///
    /// `TrackingError::InvalidInput` if there are no sessions, the sessions
    /// disagree on FOV size, or a footprint reaches outside its FOV.
    pub fn new(sessions: Vec<SessionData>) -> TrackingResult<Self> {
        let first = sessions
            .first()
            .ok_or_else(|| TrackingError::invalid_input("dataset has no sessions"))?;
        let (height, width) = (first.fov_height, first.fov_width);
        if height == 0 || width == 0 {
            return Err(TrackingError::invalid_input(format!(
                "FOV must be non-empty, got {}x{}",
                height, width
            )));
        }

        let mut offsets = Vec::with_capacity(sessions.len() + 1);
        let mut session_of = Vec::new();
        offsets.push(0);
        for (s, session) in sessions.iter().enumerate() {
            if (session.fov_height, session.fov_width) != (height, width) {
                return Err(TrackingError::invalid_input(format!(
                    "session '{}' has FOV {}x{}, expected {}x{}",
                    session.name, session.fov_height, session.fov_width, height, width
                )));
            }
            let n_pixels = session.n_pixels();
            for (r, roi) in session.rois.iter().enumerate() {
                if let Some(p) = roi.footprint.max_pixel() {
                    if p >= n_pixels {
                        return Err(TrackingError::invalid_input(format!(
                            "ROI {} of session '{}' has pixel {} outside FOV of {} pixels",
                            r, session.name, p, n_pixels
                        )));
                    }
                }
            }
            session_of.extend(std::iter::repeat(s).take(session.rois.len()));
            offsets.push(session_of.len());
        }

        Ok(Self {
            sessions,
            offsets,
            session_of,
        })
    }

    #[inline]
    pub fn sessions(&self) -> &[SessionData] {
        &self.sessions
    }

    #[inline]
    pub fn n_sessions(&self) -> usize {
        self.sessions.len()
    }

    #[inline]
    pub fn n_rois_total(&self) -> usize {
        self.session_of.len()
    }

    pub fn n_rois_per_session(&self) -> Vec<usize> {
        self.sessions.iter().map(|s| s.rois.len()).collect()
    }

    /// Session index of every global ROI.
    #[inline]
    pub fn session_of(&self) -> &[usize] {
        &self.session_of
    }

    /// Start offsets of each session in the global index, plus the total.
    #[inline]
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    #[inline]
    pub fn fov(&self) -> (usize, usize) {
        (self.sessions[0].fov_height, self.sessions[0].fov_width)
    }

    /// ROIs in global index order.
    pub fn rois(&self) -> impl Iterator<Item = &RoiRecord> + '_ {
        self.sessions.iter().flat_map(|s| s.rois.iter())
    }

    /// `n_rois x n_sessions` membership matrix: `(g, s)` is true iff ROI `g`
    /// belongs to session `s`.
    ///
    /// Every row stores exactly one entry, so the CSR buffers are written
    /// directly: `indptr = 0..=n`, `indices = session_of`.
    pub fn session_bool(&self) -> TrackingResult<SparseMatrix<bool>> {
        let n = self.n_rois_total();
        SparseMatrix::try_new(
            (n, self.n_sessions()),
            (0..=n).collect(),
            self.session_of.clone(),
            vec![true; n],
        )
    }

    /// Footprint centroids `(y, x)` in global index order.
    pub fn centroids(&self) -> Vec<Option<(f32, f32)>> {
        let width = self.fov().1;
        self.rois().map(|roi| roi.footprint.centroid(width)).collect()
    }

    /// SHA-256 over the canonical JSON serialization of all sessions.
    pub fn digest(&self) -> TrackingResult<String> {
        let bytes = serde_json::to_vec(&self.sessions)?;
        let hash = Sha256::digest(&bytes);
        Ok(hash.iter().map(|b| format!("{:02x}", b)).collect())
    }
}
