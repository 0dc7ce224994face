//! Clustering of the conjunctive graph into persistent ROI identities.
//!
//! # Architecture
//!
//! - [`search`]: budgets, bounds, trial records, [`SearchStrategy`] and the
//!   default [`AdaptiveRandomSearch`]
//! - [`objective`]: the separation score every trial optimizes
//! - [`linkage`]: session-aware single linkage on mutual-reachability distances
//! - [`labels`]: [`ClusterLabeling`], label squeezing and the violation pass
//! - [`quality`]: [`QualityMetrics`] of the final labeling
//! - [`clusterer`]: [`AutoMixingClusterer`], the search state machine
//!
//! # Search state machine
//!
//! ```text
//! INIT -> TRIAL -> CONTINUE -> TRIAL -> ... -> CONVERGED | EXHAUSTED
//! ```
//!
//! CONVERGED is checked first after each trial (`n_patience` consecutive
//! trials without improvement), then EXHAUSTED (`max_trials` reached).

pub mod clusterer;
pub mod labels;
pub mod linkage;
pub mod objective;
pub mod quality;
pub mod search;

pub use clusterer::{AutoMixingClusterer, SearchOutcome};
pub use labels::{resolve_violations, squeeze_integers, ClusterLabeling, LabelLayout, UNCLUSTERED};
pub use linkage::{LinkageParams, SessionAwareLinkage};
pub use objective::{separation_objective, SeparationScore};
pub use quality::QualityMetrics;
pub use search::{
    best_trial, ActivationBounds, AdaptiveRandomSearch, ModalityBounds, SearchBounds, SearchBudget, SearchState,
    SearchStrategy, TrialOutcome, TrialRecord,
};
