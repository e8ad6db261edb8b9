//! Experiment tracking and model registry.
//!
//! The tracker records one run per evaluated candidate; the registry turns
//! the winning run into a numbered version and owns the stage of every
//! version. [`ProductionLoader`] is the read path the serving side uses.

pub mod loader;
pub mod registry;
pub mod store;
pub mod tracking;

pub use loader::{LoadedModel, ProductionLoader};
pub use registry::{ModelRegistry, ModelVersion, RegisteredModel, Stage};
pub use store::{FileRegistryStore, MemoryRegistryStore, RegistryStore};
pub use tracking::{
    ExperimentTracker, FileTracker, MemoryTracker, RunRecord, RunStatus, RunSubmission,
};

use bw_types::{BwError, RegistryError};

pub(crate) fn storage_error(message: impl std::fmt::Display) -> BwError {
    RegistryError::Storage {
        message: message.to_string(),
    }
    .into()
}
