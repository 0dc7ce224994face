//! Input data model: footprints, ROI records, sessions and modalities.

mod dataset;
mod footprint;
mod modality;

pub use dataset::{RoiDataset, RoiRecord, SessionData};
pub use footprint::SpatialFootprint;
pub use modality::Modality;
