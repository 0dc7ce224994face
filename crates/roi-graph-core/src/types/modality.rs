//! Similarity modalities compared between ROIs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One independent similarity signal between ROI pairs.
///
/// # Example
///
/// ```
/// use roi_graph_core::types::Modality;
///
/// assert_eq!(Modality::Embedding.key(), "s_NN");
/// assert_eq!(Modality::all().len(), 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    /// Overlap of normalized spatial footprints.
    SpatialFootprint,
    /// Cosine similarity of embedding-network latents.
    Embedding,
    /// Cosine similarity of wavelet-transform descriptors.
    Wavelet,
}

impl Modality {
    /// All modalities in canonical order.
    pub fn all() -> [Modality; 3] {
        [Modality::SpatialFootprint, Modality::Embedding, Modality::Wavelet]
    }

    /// Key used for this modality's matrix in run data.
    pub fn key(&self) -> &'static str {
        match self {
            Modality::SpatialFootprint => "s_sf",
            Modality::Embedding => "s_NN",
            Modality::Wavelet => "s_SWT",
        }
    }

    /// Snake-case name as used in configuration files.
    pub fn name(&self) -> &'static str {
        match self {
            Modality::SpatialFootprint => "spatial_footprint",
            Modality::Embedding => "embedding",
            Modality::Wavelet => "wavelet",
        }
    }

    /// True for modalities computed from per-ROI feature vectors.
    pub fn is_feature_based(&self) -> bool {
        !matches!(self, Modality::SpatialFootprint)
    }
}

impl fmt::Display for Modality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
