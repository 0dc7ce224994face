//! Explicit run context handed to every stage constructor.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;

/// Per-run settings shared by the pipeline stages.
///
/// Stages receive this by reference instead of reading process-wide state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineContext {
    pub run_id: Uuid,
    pub random_seed: u64,
    /// Worker count for trial evaluation. `1` is the only reproducible setting.
    pub n_jobs: usize,
}

impl PipelineContext {
    pub fn new(random_seed: u64, n_jobs: usize) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            random_seed,
            n_jobs,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.general.random_seed,
            config.clustering.automatic_mixing.n_jobs,
        )
    }

    #[inline]
    pub fn is_reproducible(&self) -> bool {
        self.n_jobs <= 1
    }
}
