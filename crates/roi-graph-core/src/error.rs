//! Error types for roi-graph-core.
//!
//! This module defines the central error type [`TrackingError`] used throughout
//! the crate, along with the [`TrackingResult<T>`] type alias.
//!
//! Fatal errors bubble unmodified to the pipeline boundary. Individual failed
//! trials inside the parameter search are recorded, not raised; only a search
//! that ends without any valid labeling surfaces as
//! [`TrackingError::ClusteringFailed`].
//!
//! # Examples
//!
//! ```rust
//! use roi_graph_core::TrackingError;
//!
//! let err = TrackingError::shape_mismatch("s_NN", 120, 119);
//! assert!(err.to_string().contains("s_NN"));
//! assert!(err.to_string().contains("120"));
//! ```

use thiserror::Error;

use crate::clustering::TrialRecord;

/// Top-level error type for ROI tracking operations.
#[derive(Debug, Error)]
pub enum TrackingError {
    /// A modality's feature count disagrees with the ROI count.
    ///
    /// # When This Occurs
    ///
    /// - Embedding or wavelet features missing for some ROIs
    /// - Feature vectors of inconsistent dimension within one modality
    /// - An externally supplied feature table with the wrong number of rows
    #[error("Shape mismatch in {modality}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Modality (or matrix) being computed
        modality: String,
        /// Expected count / dimension
        expected: usize,
        /// Actual count / dimension
        actual: usize,
    },

    /// Configuration is invalid or contains unrecognized options.
    ///
    /// Raised at startup, before any stage runs.
    #[error("Configuration error: {0}")]
    ConfigValidation(String),

    /// The parameter search ended without a single valid labeling.
    ///
    /// Carries every trial attempted so callers can inspect why each failed.
    #[error("Clustering failed after {} trials: {message}", trials.len())]
    ClusteringFailed {
        /// Summary of the failure
        message: String,
        /// Diagnostics for every trial attempted
        trials: Vec<TrialRecord>,
    },

    /// A component received an argument outside its valid domain.
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        /// Description of what's wrong with the parameter
        message: String,
    },

    /// Input data is malformed (footprint outside the FOV, negative weights, ...).
    #[error("Invalid input: {message}")]
    InvalidInput {
        /// Description of the malformed input
        message: String,
    },

    /// A required part of the pipeline output is empty.
    #[error("Pipeline produced empty output: {field}")]
    EmptyOutput {
        /// Name of the empty output field
        field: String,
    },

    /// Filesystem operation failed.
    #[error("I/O error at {path}: {message}")]
    Io {
        /// Path involved in the failed operation
        path: String,
        /// Underlying error description
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl TrackingError {
    /// Create a ShapeMismatch error.
    pub fn shape_mismatch(modality: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::ShapeMismatch {
            modality: modality.into(),
            expected,
            actual,
        }
    }

    /// Create an InvalidParameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a ConfigValidation error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigValidation(message.into())
    }

    /// Create an Io error from a path and an `std::io::Error`.
    pub fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// True for errors caused by configuration or input rather than computation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigValidation(_) | Self::InvalidInput { .. } | Self::ShapeMismatch { .. }
        )
    }
}

impl From<serde_json::Error> for TrackingError {
    fn from(err: serde_json::Error) -> Self {
        TrackingError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for TrackingError {
    fn from(err: toml::de::Error) -> Self {
        TrackingError::ConfigValidation(err.to_string())
    }
}

impl From<config::ConfigError> for TrackingError {
    fn from(err: config::ConfigError) -> Self {
        TrackingError::ConfigValidation(err.to_string())
    }
}

/// Result type alias for tracking operations.
pub type TrackingResult<T> = Result<T, TrackingError>;
