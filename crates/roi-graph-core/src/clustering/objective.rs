//! Separation objective scored by every search trial.
//!
//! Same-session candidate pairs are known non-matches. Their distance
//! histogram, scaled to the eligible histogram on the upper half of the
//! distance range, estimates how many eligible pairs are also non-matches.
//! What remains is the estimated "same ROI" distribution; the objective
//! rewards mixing parameters that pull it away from the non-match one.

use serde::{Deserialize, Serialize};

use crate::error::{TrackingError, TrackingResult};

/// Result of [`separation_objective`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeparationScore {
    /// `1 - overlap / mass` of the estimated same-ROI distribution, in `[0, 1]`.
    pub quality: f64,
    /// Distance below which eligible pairs are likely matches.
    pub d_cutoff: f32,
}

/// Score how well eligible distances separate from null distances.
///
/// # Errors
///
/// `TrackingError::InvalidParameter` when `n_bins < 2`, when there are no
/// eligible distances, when all distances are zero, or when the eligible
/// distribution is fully explained by the null one.
pub fn separation_objective(eligible: &[f32], null: &[f32], n_bins: usize) -> TrackingResult<SeparationScore> {
    if n_bins < 2 {
        return Err(TrackingError::invalid_parameter(format!("n_bins must be >= 2, got {}", n_bins)));
    }
    if eligible.is_empty() {
        return Err(TrackingError::invalid_parameter("no eligible pairs to score"));
    }
    let upper = eligible
        .iter()
        .chain(null)
        .copied()
        .filter(|d| d.is_finite())
        .fold(0.0f32, f32::max);
    if upper <= 0.0 {
        return Err(TrackingError::invalid_parameter("all distances are zero"));
    }

    let all = histogram(eligible, upper, n_bins);
    let nul = histogram(null, upper, n_bins);

    let half = n_bins / 2;
    let (all_upper, null_upper): (f64, f64) = (all[half..].iter().sum(), nul[half..].iter().sum());
    let null_total: f64 = nul.iter().sum();
    let scale = if null_upper > 0.0 {
        all_upper / null_upper
    } else if null_total > 0.0 {
        all.iter().sum::<f64>() / null_total
    } else {
        0.0
    };
    let scaled_null: Vec<f64> = nul.iter().map(|c| c * scale).collect();
    let same: Vec<f64> = all.iter().zip(&scaled_null).map(|(a, n)| (a - n).max(0.0)).collect();

    let same_mass: f64 = same.iter().sum();
    if same_mass <= 0.0 {
        return Err(TrackingError::invalid_parameter(
            "eligible distances are indistinguishable from same-session distances",
        ));
    }
    let overlap: f64 = same.iter().zip(&scaled_null).map(|(s, n)| s.min(*n)).sum();
    let quality = (1.0 - overlap / same_mass).clamp(0.0, 1.0);

    let width = upper / n_bins as f32;
    let peak = same
        .iter()
        .enumerate()
        .fold(0usize, |best, (i, v)| if *v > same[best] { i } else { best });
    let d_cutoff = (peak + 1..n_bins)
        .find(|&b| scaled_null[b] > 0.0 && scaled_null[b] >= same[b])
        .map_or(upper, |b| (b as f32 + 0.5) * width);

    Ok(SeparationScore { quality, d_cutoff })
}

fn histogram(values: &[f32], upper: f32, n_bins: usize) -> Vec<f64> {
    let mut counts = vec![0.0f64; n_bins];
    for &v in values.iter().filter(|v| v.is_finite()) {
        let bin = ((v.max(0.0) / upper) * n_bins as f32) as usize;
        counts[bin.min(n_bins - 1)] += 1.0;
    }
    counts
}
