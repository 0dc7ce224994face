//! ROI Graph Core Library
//!
//! Tracks regions of interest (ROIs) across imaging sessions by fusing
//! several similarity modalities into one graph and clustering it with a
//! session-aware linkage whose mixing parameters are found automatically.
//!
//! # Architecture
//!
//! This crate defines:
//! - Sparse matrices and domain types (`SparseMatrix`, `RoiDataset`, `Modality`)
//! - The pipeline stages: similarity building, session masking, fusion,
//!   pruning and clustering
//! - The `PipelineOrchestrator` that runs them and assembles results
//! - Error types, configuration and data loading
//!
//! # Example
//!
//! ```no_run
//! use roi_graph_core::{Config, PipelineOrchestrator};
//!
//! let config = Config::default();
//! let output = PipelineOrchestrator::new(config)?.run()?;
//! println!("{} clusters", output.results.clusters.n_clusters());
//! # Ok::<(), roi_graph_core::TrackingError>(())
//! ```

pub mod clustering;
pub mod config;
pub mod context;
pub mod data;
pub mod error;
pub mod fusion;
pub mod pipeline;
pub mod pruning;
pub mod similarity;
pub mod sparse;
pub mod types;

// Re-exports for convenience
pub use clustering::{AutoMixingClusterer, ClusterLabeling, QualityMetrics, SearchOutcome};
pub use config::{merge_with_defaults, Config};
pub use context::PipelineContext;
pub use error::{TrackingError, TrackingResult};
pub use fusion::{ConjunctiveGraph, MixingParams, SimilarityFuser};
pub use pipeline::{PipelineOrchestrator, PipelineOutput, RunData, TrackingResults};
pub use pruning::{GraphPruner, PrunePolicy, PrunedGraph};
pub use similarity::{SessionConstraintMasker, SimilaritySet, SparseSimilarityBuilder};
pub use sparse::SparseMatrix;
pub use types::{Modality, RoiDataset, RoiRecord, SessionData, SpatialFootprint};
