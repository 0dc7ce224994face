//! Fusion policy types: per-modality weighting, per-trial mixing parameters,
//! combination rules and distance transforms.

use serde::{Deserialize, Serialize};

use crate::error::{TrackingError, TrackingResult};
use crate::types::Modality;

/// Static per-modality fusion settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModalityWeighting {
    /// Whether the modality contributes to `sConj` at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Required modalities define the fused support (intersection).
    #[serde(default = "default_true")]
    pub required: bool,
    /// Relative weight in the combination rule.
    #[serde(default = "default_weight")]
    pub weight: f32,
    /// Z-score explicit entries before activation.
    #[serde(default)]
    pub z_score: bool,
}

fn default_true() -> bool {
    true
}

fn default_weight() -> f32 {
    1.0
}

impl Default for ModalityWeighting {
    fn default() -> Self {
        Self {
            enabled: true,
            required: true,
            weight: 1.0,
            z_score: false,
        }
    }
}

/// Rule combining activated modality values into one similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionRule {
    /// Weighted power mean with exponent `p_norm`.
    ///
    /// Negative exponents are conjunctive: one weak modality pulls the
    /// result towards zero. `|p_norm| < 1e-6` is the weighted geometric mean.
    #[default]
    GeneralizedMean,
    /// Weighted arithmetic mean.
    WeightedSum,
    /// Weighted geometric mean.
    Product,
    /// Smallest activated value.
    Min,
    /// Largest activated value.
    Max,
}

impl FusionRule {
    /// Combine `(value, weight)` terms. Values are expected in `[0, 1]`.
    pub fn combine(&self, terms: &[(f32, f32)], p_norm: f32) -> f32 {
        let total: f32 = terms.iter().map(|&(_, w)| w).sum();
        if terms.is_empty() || total <= 0.0 {
            return 0.0;
        }
        let value = match self {
            FusionRule::GeneralizedMean => generalized_mean(terms, total, p_norm),
            FusionRule::Product => geometric_mean(terms, total),
            FusionRule::WeightedSum => terms.iter().map(|&(v, w)| v * w).sum::<f32>() / total,
            FusionRule::Min => terms.iter().map(|&(v, _)| v).fold(f32::INFINITY, f32::min),
            FusionRule::Max => terms.iter().map(|&(v, _)| v).fold(f32::NEG_INFINITY, f32::max),
        };
        if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

fn geometric_mean(terms: &[(f32, f32)], total: f32) -> f32 {
    if terms.iter().any(|&(v, _)| v <= 0.0) {
        return 0.0;
    }
    (terms.iter().map(|&(v, w)| w * v.ln()).sum::<f32>() / total).exp()
}

fn generalized_mean(terms: &[(f32, f32)], total: f32, p: f32) -> f32 {
    if p.abs() < 1e-6 {
        return geometric_mean(terms, total);
    }
    if p < 0.0 && terms.iter().any(|&(v, _)| v <= 0.0) {
        return 0.0;
    }
    let mean = terms.iter().map(|&(v, w)| w * v.powf(p)).sum::<f32>() / total;
    mean.powf(1.0 / p)
}

/// Monotone map from fused similarity to distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceTransform {
    /// `1 - s`
    #[default]
    OneMinus,
    /// `-ln(max(s, 1e-12))`
    NegLog,
}

impl DistanceTransform {
    pub const NEG_LOG_EPS: f32 = 1e-12;

    #[inline]
    pub fn apply(&self, s: f32) -> f32 {
        match self {
            DistanceTransform::OneMinus => 1.0 - s,
            DistanceTransform::NegLog => -(s.max(Self::NEG_LOG_EPS)).ln(),
        }
    }
}

/// Sigmoid activation `1 / (1 + exp(-b (x - mu)))`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    pub mu: f32,
    pub b: f32,
}

impl Activation {
    #[inline]
    pub fn apply(&self, x: f32) -> f32 {
        1.0 / (1.0 + (-self.b * (x - self.mu)).exp())
    }
}

/// Mixing parameters for one modality within one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModalityMixing {
    pub modality: Modality,
    /// Exponent applied after activation.
    pub power: f32,
    /// Sigmoid activation; `None` clamps the raw value to `[0, 1]`.
    pub activation: Option<Activation>,
}

impl ModalityMixing {
    /// Identity mixing: clamp only, exponent 1.
    pub fn identity(modality: Modality) -> Self {
        Self {
            modality,
            power: 1.0,
            activation: None,
        }
    }

    /// Activated value in `[0, 1]`.
    pub fn activate(&self, x: f32) -> f32 {
        let a = match self.activation {
            Some(act) => act.apply(x),
            None => x,
        };
        let a = if a.is_finite() { a.clamp(0.0, 1.0) } else { 0.0 };
        a.powf(self.power)
    }
}

/// One point in the search space: how to mix modalities for one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixingParams {
    pub modalities: Vec<ModalityMixing>,
    /// Exponent of the generalized mean.
    pub p_norm: f32,
}

impl MixingParams {
    /// Identity mixing for `modalities` with an arithmetic mean.
    pub fn identity(modalities: impl IntoIterator<Item = Modality>) -> Self {
        Self {
            modalities: modalities.into_iter().map(ModalityMixing::identity).collect(),
            p_norm: 1.0,
        }
    }

    /// Mixing for `modality`, if present.
    pub fn get(&self, modality: Modality) -> Option<&ModalityMixing> {
        self.modalities.iter().find(|m| m.modality == modality)
    }

    /// Reject non-finite values and non-positive exponents.
    pub fn validate(&self) -> TrackingResult<()> {
        if !self.p_norm.is_finite() {
            return Err(TrackingError::invalid_parameter(format!(
                "p_norm must be finite, got {}",
                self.p_norm
            )));
        }
        for m in &self.modalities {
            if !(m.power.is_finite() && m.power > 0.0) {
                return Err(TrackingError::invalid_parameter(format!(
                    "power for {} must be finite and > 0, got {}",
                    m.modality, m.power
                )));
            }
            if let Some(act) = m.activation {
                if !(act.mu.is_finite() && act.b.is_finite()) {
                    return Err(TrackingError::invalid_parameter(format!(
                        "activation for {} must be finite, got mu={} b={}",
                        m.modality, act.mu, act.b
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generalized_mean_special_cases() {
        let terms = [(0.25, 1.0), (1.0, 1.0)];
        let arith = FusionRule::GeneralizedMean.combine(&terms, 1.0);
        assert!((arith - 0.625).abs() < 1e-6);

        let geo = FusionRule::GeneralizedMean.combine(&terms, 0.0);
        assert!((geo - 0.5).abs() < 1e-6, "p=0 must be the geometric mean, got {}", geo);

        let harm = FusionRule::GeneralizedMean.combine(&terms, -1.0);
        assert!((harm - 0.4).abs() < 1e-6, "p=-1 must be the harmonic mean, got {}", harm);
    }

    #[test]
    fn test_negative_p_with_zero_term_is_zero() {
        let terms = [(0.0, 1.0), (0.9, 1.0)];
        assert_eq!(FusionRule::GeneralizedMean.combine(&terms, -2.0), 0.0);
        assert_eq!(FusionRule::Product.combine(&terms, 0.0), 0.0);
        assert!(FusionRule::GeneralizedMean.combine(&terms, 1.0) > 0.0);
    }

    #[test]
    fn test_other_rules() {
        let terms = [(0.2, 3.0), (0.6, 1.0)];
        assert!((FusionRule::WeightedSum.combine(&terms, 1.0) - 0.3).abs() < 1e-6);
        assert_eq!(FusionRule::Min.combine(&terms, 1.0), 0.2);
        assert_eq!(FusionRule::Max.combine(&terms, 1.0), 0.6);
        assert_eq!(FusionRule::Max.combine(&[], 1.0), 0.0);
    }

    #[test]
    fn test_distance_transforms_are_decreasing() {
        for t in [DistanceTransform::OneMinus, DistanceTransform::NegLog] {
            assert!(t.apply(0.9) < t.apply(0.1), "{:?} must be decreasing", t);
        }
        assert!(DistanceTransform::NegLog.apply(0.0).is_finite());
    }

    #[test]
    fn test_activation_and_power() {
        let m = ModalityMixing {
            modality: Modality::Embedding,
            power: 2.0,
            activation: Some(Activation { mu: 0.5, b: 10.0 }),
        };
        assert!((m.activate(0.5) - 0.25).abs() < 1e-6);
        assert!(m.activate(1.0) > m.activate(0.2));

        let clamp = ModalityMixing::identity(Modality::SpatialFootprint);
        assert_eq!(clamp.activate(-0.3), 0.0);
        assert_eq!(clamp.activate(1.7), 1.0);
    }

    #[test]
    fn test_mixing_validate() {
        let mut p = MixingParams::identity(Modality::all());
        assert!(p.validate().is_ok());
        p.modalities[1].power = 0.0;
        assert!(p.validate().is_err());
    }
}
