//! Spatial footprints: sparse 2D weight masks over the field of view.

use serde::{Deserialize, Serialize};

use crate::error::{TrackingError, TrackingResult};

/// Sparse weight mask locating one ROI inside a field of view.
///
/// Pixels are flattened row-major (`y * fov_width + x`), stored sorted and
/// unique, with one non-negative weight each.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialFootprint {
    pixels: Vec<usize>,
    weights: Vec<f32>,
}

impl SpatialFootprint {
    /// Create a footprint from parallel pixel / weight arrays.
    ///
    /// Pixels are sorted here; duplicates are rejected.
    ///
    /// # Errors
    ///
    /// `TrackingError::InvalidInput` if the arrays differ in length, a pixel
    /// repeats, or a weight is negative or not finite.
    pub fn new(pixels: Vec<usize>, weights: Vec<f32>) -> TrackingResult<Self> {
        if pixels.len() != weights.len() {
            return Err(TrackingError::invalid_input(format!(
                "footprint has {} pixels but {} weights",
                pixels.len(),
                weights.len()
            )));
        }
        if let Some(w) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(TrackingError::invalid_input(format!(
                "footprint weights must be finite and >= 0, got {}",
                w
            )));
        }

        let mut pairs: Vec<(usize, f32)> = pixels.into_iter().zip(weights).collect();
        pairs.sort_by_key(|&(p, _)| p);
        if pairs.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(TrackingError::invalid_input("footprint contains duplicate pixels"));
        }

        let (pixels, weights): (Vec<usize>, Vec<f32>) = pairs.into_iter().unzip();
        Ok(Self { pixels, weights })
    }

    /// Footprint from `(y, x, weight)` coordinates in a FOV of width `fov_width`.
    pub fn from_coords(
        coords: impl IntoIterator<Item = (usize, usize, f32)>,
        fov_width: usize,
    ) -> TrackingResult<Self> {
        let (pixels, weights): (Vec<usize>, Vec<f32>) = coords
            .into_iter()
            .map(|(y, x, w)| (y * fov_width + x, w))
            .unzip();
        Self::new(pixels, weights)
    }

    #[inline]
    pub fn pixels(&self) -> &[usize] {
        &self.pixels
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.pixels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    /// Largest flattened pixel index, if any.
    #[inline]
    pub fn max_pixel(&self) -> Option<usize> {
        self.pixels.last().copied()
    }

    /// Weights raised to `power` and scaled to unit L2 norm.
    ///
    /// An all-zero footprint stays all zero.
    pub fn normalized_weights(&self, power: f32) -> Vec<f32> {
        let powered: Vec<f32> = self.weights.iter().map(|w| w.powf(power)).collect();
        let norm = powered.iter().map(|w| w * w).sum::<f32>().sqrt();
        if norm > 0.0 {
            powered.iter().map(|w| w / norm).collect()
        } else {
            powered
        }
    }

    /// Weighted centroid `(y, x)`; unweighted if all weights are zero.
    pub fn centroid(&self, fov_width: usize) -> Option<(f32, f32)> {
        if self.is_empty() || fov_width == 0 {
            return None;
        }
        let total: f32 = self.weights.iter().sum();
        let (mut cy, mut cx) = (0.0f32, 0.0f32);
        for (&p, &w) in self.pixels.iter().zip(&self.weights) {
            let w = if total > 0.0 { w / total } else { 1.0 / self.nnz() as f32 };
            cy += (p / fov_width) as f32 * w;
            cx += (p % fov_width) as f32 * w;
        }
        Some((cy, cx))
    }
}
