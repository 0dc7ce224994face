//! Session data sources.
//!
//! - [`json`]: one JSON document per session, ordered by file name
//! - [`synthetic`]: seeded generator with known ground-truth identities

pub mod json;
pub mod synthetic;

use tracing::info;

use crate::config::{DataKind, DataLoadingConfig};
use crate::error::{TrackingError, TrackingResult};
use crate::types::RoiDataset;

pub use json::{read_sessions, write_sessions};
pub use synthetic::{generate_sessions, SyntheticSessions};

/// Load the dataset described by `config`.
///
/// `seed` drives the synthetic generator and is ignored for file input.
pub fn load_dataset(config: &DataLoadingConfig, seed: u64) -> TrackingResult<RoiDataset> {
    let sessions = match config.data_kind {
        DataKind::Json => {
            let dir = config.dir_outer.as_deref().ok_or_else(|| {
                TrackingError::config("data_loading.dir_outer is required when data_kind = \"json\"")
            })?;
            read_sessions(dir)?
        }
        DataKind::Synthetic => generate_sessions(&config.synthetic, seed)?.sessions,
    };

    let dataset = RoiDataset::new(sessions)?;
    info!(
        n_sessions = dataset.n_sessions(),
        n_rois = dataset.n_rois_total(),
        kind = ?config.data_kind,
        "Loaded dataset"
    );
    Ok(dataset)
}
