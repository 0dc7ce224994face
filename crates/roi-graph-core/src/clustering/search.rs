//! Hyperparameter search: budgets, bounds, trial records and strategies.
//!
//! A [`SearchStrategy`] is a pure function of the trial history and the trial
//! index. It never sees completion timing, so sequential execution replays
//! exactly for a fixed seed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::error::{TrackingError, TrackingResult};
use crate::fusion::{Activation, MixingParams, ModalityMixing};
use crate::types::Modality;

/// Trial and patience budget of the search loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchBudget {
    /// Consecutive non-improving trials before CONVERGED.
    #[serde(default = "default_n_patience")]
    pub n_patience: usize,
    /// Trials before EXHAUSTED.
    #[serde(default = "default_max_trials")]
    pub max_trials: usize,
    /// Relative improvement a trial must beat the best score by.
    #[serde(default = "default_tol_frac")]
    pub tol_frac: f64,
    /// Uniformly sampled trials before the strategy starts exploiting.
    #[serde(default = "default_n_startup_trials")]
    pub n_startup_trials: usize,
}

fn default_n_patience() -> usize {
    30
}

fn default_max_trials() -> usize {
    100
}

fn default_tol_frac() -> f64 {
    0.05
}

fn default_n_startup_trials() -> usize {
    10
}

impl Default for SearchBudget {
    fn default() -> Self {
        Self {
            n_patience: default_n_patience(),
            max_trials: default_max_trials(),
            tol_frac: default_tol_frac(),
            n_startup_trials: default_n_startup_trials(),
        }
    }
}

impl SearchBudget {
    pub fn validate(&self) -> TrackingResult<()> {
        if self.n_patience == 0 {
            return Err(TrackingError::config(
                "clustering.automatic_mixing.kwargs_findParameters.n_patience must be greater than 0",
            ));
        }
        if !(self.tol_frac.is_finite() && self.tol_frac >= 0.0) {
            return Err(TrackingError::config(format!(
                "clustering.automatic_mixing.kwargs_findParameters.tol_frac must be >= 0, got {}",
                self.tol_frac
            )));
        }
        Ok(())
    }

    /// True if `quality` improves on `best` by more than the tolerance.
    pub fn is_improvement(&self, quality: f64, best: Option<f64>) -> bool {
        match best {
            None => true,
            Some(best) => quality > best + self.tol_frac * best.abs(),
        }
    }
}

/// Sigmoid activation ranges for one modality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActivationBounds {
    pub mu: [f32; 2],
    pub b: [f32; 2],
}

/// Search ranges for one modality's mixing parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModalityBounds {
    pub power: [f32; 2],
    /// No activation is searched (values are clamped) when unset.
    #[serde(default)]
    pub activation: Option<ActivationBounds>,
}

/// Search ranges for every mixing parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchBounds {
    pub spatial_footprint: ModalityBounds,
    pub embedding: ModalityBounds,
    pub wavelet: ModalityBounds,
    pub p_norm: [f32; 2],
}

impl Default for SearchBounds {
    fn default() -> Self {
        Self {
            spatial_footprint: ModalityBounds {
                power: [0.3, 2.0],
                activation: None,
            },
            embedding: ModalityBounds {
                power: [0.2, 2.0],
                activation: Some(ActivationBounds {
                    mu: [0.0, 0.8],
                    b: [2.0, 20.0],
                }),
            },
            wavelet: ModalityBounds {
                power: [0.1, 1.0],
                activation: Some(ActivationBounds {
                    mu: [0.0, 0.8],
                    b: [2.0, 20.0],
                }),
            },
            p_norm: [-5.0, -0.1],
        }
    }
}

impl SearchBounds {
    pub fn for_modality(&self, modality: Modality) -> &ModalityBounds {
        match modality {
            Modality::SpatialFootprint => &self.spatial_footprint,
            Modality::Embedding => &self.embedding,
            Modality::Wavelet => &self.wavelet,
        }
    }

    pub fn validate(&self) -> TrackingResult<()> {
        let prefix = "clustering.automatic_mixing.bounds";
        for m in Modality::all() {
            let b = self.for_modality(m);
            check_range(&format!("{}.{}.power", prefix, m), b.power)?;
            if b.power[0] <= 0.0 {
                return Err(TrackingError::config(format!(
                    "{}.{}.power must be > 0, got {:?}",
                    prefix, m, b.power
                )));
            }
            if let Some(act) = &b.activation {
                check_range(&format!("{}.{}.activation.mu", prefix, m), act.mu)?;
                check_range(&format!("{}.{}.activation.b", prefix, m), act.b)?;
            }
        }
        check_range(&format!("{}.p_norm", prefix), self.p_norm)
    }
}

fn check_range(name: &str, range: [f32; 2]) -> TrackingResult<()> {
    if !(range[0].is_finite() && range[1].is_finite() && range[0] <= range[1]) {
        return Err(TrackingError::config(format!(
            "{} must be a finite [low, high] range, got {:?}",
            name, range
        )));
    }
    Ok(())
}

/// States of the search loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchState {
    Init,
    Trial { index: usize },
    Continue,
    /// No improvement for `n_patience` consecutive trials.
    Converged,
    /// `max_trials` reached first.
    Exhausted,
}

impl SearchState {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, SearchState::Converged | SearchState::Exhausted)
    }
}

/// Outcome of one trial. Failed trials are recorded, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialOutcome {
    Scored {
        quality: f64,
        d_cutoff: f32,
        n_clusters: usize,
    },
    Failed {
        reason: String,
    },
}

impl TrialOutcome {
    pub fn quality(&self) -> Option<f64> {
        match self {
            TrialOutcome::Scored { quality, .. } => Some(*quality),
            TrialOutcome::Failed { .. } => None,
        }
    }
}

/// Diagnostics of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    /// Index the trial was proposed under.
    pub index: usize,
    pub params: MixingParams,
    pub outcome: TrialOutcome,
    /// Whether this trial beat the best score by more than the tolerance.
    pub improved: bool,
}

/// Best scored trial: maximum quality, ties broken by the earliest index.
pub fn best_trial(history: &[TrialRecord]) -> Option<&TrialRecord> {
    history
        .iter()
        .filter_map(|r| r.outcome.quality().map(|q| (q, r)))
        .fold(None, |best: Option<(f64, &TrialRecord)>, (q, r)| match best {
            Some((bq, br)) if bq > q || (bq == q && br.index < r.index) => Some((bq, br)),
            _ => Some((q, r)),
        })
        .map(|(_, r)| r)
}

/// Proposes the next point to evaluate.
///
/// Implementations must be pure: the same `history` and `trial_index`
/// always produce the same proposal.
pub trait SearchStrategy: Send + Sync {
    fn propose(&self, history: &[TrialRecord], trial_index: usize) -> MixingParams;
}

/// Uniform sampling for a startup phase, then Gaussian perturbation around
/// the best trial with a step that shrinks while no trial improves.
#[derive(Debug, Clone)]
pub struct AdaptiveRandomSearch {
    bounds: SearchBounds,
    modalities: Vec<Modality>,
    seed: u64,
    n_startup_trials: usize,
}

impl AdaptiveRandomSearch {
    /// Probability of a uniform draw after the startup phase.
    pub const EXPLORATION_PROB: f64 = 0.2;
    const INITIAL_SCALE: f32 = 0.25;
    const MIN_SCALE: f32 = 0.02;

    pub fn new(bounds: SearchBounds, modalities: Vec<Modality>, seed: u64, n_startup_trials: usize) -> Self {
        Self {
            bounds,
            modalities,
            seed,
            n_startup_trials,
        }
    }

    fn rng_for(&self, trial_index: usize) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        rng.set_stream(trial_index as u64);
        rng
    }

    fn uniform(&self, rng: &mut ChaCha8Rng) -> MixingParams {
        let modalities = self
            .modalities
            .iter()
            .map(|&m| {
                let b = self.bounds.for_modality(m);
                let power = sample_uniform(rng, b.power);
                let activation = b.activation.as_ref().map(|a| Activation {
                    mu: sample_uniform(rng, a.mu),
                    b: sample_uniform(rng, a.b),
                });
                ModalityMixing {
                    modality: m,
                    power,
                    activation,
                }
            })
            .collect();
        MixingParams {
            modalities,
            p_norm: sample_uniform(rng, self.bounds.p_norm),
        }
    }

    fn perturb(&self, rng: &mut ChaCha8Rng, center: &MixingParams, scale: f32) -> MixingParams {
        let modalities = self
            .modalities
            .iter()
            .map(|&m| {
                let b = self.bounds.for_modality(m);
                let current = center.get(m);
                let power = sample_near(rng, current.map(|c| c.power), b.power, scale);
                let activation = b.activation.as_ref().map(|a| {
                    let prev = current.and_then(|c| c.activation);
                    Activation {
                        mu: sample_near(rng, prev.map(|p| p.mu), a.mu, scale),
                        b: sample_near(rng, prev.map(|p| p.b), a.b, scale),
                    }
                });
                ModalityMixing {
                    modality: m,
                    power,
                    activation,
                }
            })
            .collect();
        MixingParams {
            modalities,
            p_norm: sample_near(rng, Some(center.p_norm), self.bounds.p_norm, scale),
        }
    }
}

impl SearchStrategy for AdaptiveRandomSearch {
    fn propose(&self, history: &[TrialRecord], trial_index: usize) -> MixingParams {
        let mut rng = self.rng_for(trial_index);
        let n_scored = history.iter().filter(|r| r.outcome.quality().is_some()).count();
        let best = match best_trial(history) {
            Some(best) if n_scored >= self.n_startup_trials => best,
            _ => return self.uniform(&mut rng),
        };
        if rng.gen_bool(Self::EXPLORATION_PROB) {
            return self.uniform(&mut rng);
        }
        let stale = history.iter().rev().take_while(|r| !r.improved).count();
        let scale = (Self::INITIAL_SCALE / (1.0 + stale as f32 / 5.0)).max(Self::MIN_SCALE);
        self.perturb(&mut rng, &best.params, scale)
    }
}

fn sample_uniform(rng: &mut ChaCha8Rng, [lo, hi]: [f32; 2]) -> f32 {
    if hi > lo {
        rng.gen_range(lo..=hi)
    } else {
        lo
    }
}

/// Gaussian step of `scale * (hi - lo)` around `center`, clamped to the range.
fn sample_near(rng: &mut ChaCha8Rng, center: Option<f32>, [lo, hi]: [f32; 2], scale: f32) -> f32 {
    let Some(center) = center else {
        return sample_uniform(rng, [lo, hi]);
    };
    let sd = scale * (hi - lo);
    let step = Normal::new(0.0f32, sd).map(|n| n.sample(rng)).unwrap_or(0.0);
    (center + step).clamp(lo, hi)
}
