//! Serving-side read path: current Production version and its artifact.

use std::sync::Arc;

use tracing::info;

use bw_models::ModelArtifact;
use bw_types::BwResult;

use crate::registry::ModelRegistry;
use crate::store::RegistryStore;
use crate::tracking::ExperimentTracker;

/// The artifact behind a registry's Production version.
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub name: String,
    pub version: u32,
    pub run_id: String,
    pub artifact: ModelArtifact,
}

impl LoadedModel {
    /// Version label recorded next to each prediction.
    pub fn version_label(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

pub struct ProductionLoader<S> {
    registry: Arc<ModelRegistry<S>>,
    tracker: Arc<dyn ExperimentTracker>,
}

impl<S: RegistryStore> ProductionLoader<S> {
    pub fn new(registry: Arc<ModelRegistry<S>>, tracker: Arc<dyn ExperimentTracker>) -> Self {
        Self { registry, tracker }
    }

    /// Load the Production artifact of `name`.
    ///
    /// Fails with `NotFound` when nothing has been promoted and with
    /// `PromotionInconsistency` while a promotion is unfinished. There is
    /// no fallback to another version.
    pub fn load_production(&self, name: &str) -> BwResult<LoadedModel> {
        let version = self.registry.production_version(name)?;
        let artifact = self.tracker.load_artifact(&version.artifact_uri)?;
        info!(
            "Loaded {} version {} ({} model from run {})",
            name, version.version, artifact.family, version.run_id
        );
        Ok(LoadedModel {
            name: name.to_string(),
            version: version.version,
            run_id: version.run_id,
            artifact,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryRegistryStore;
    use crate::tracking::tests::sample_artifact;
    use crate::tracking::{MemoryTracker, RunSubmission};
    use bw_types::{BwError, RegistryError};
    use std::collections::BTreeMap;

    const NAME: &str = "iris_best_model";

    fn setup() -> (Arc<ModelRegistry<MemoryRegistryStore>>, Arc<MemoryTracker>) {
        (
            Arc::new(ModelRegistry::new(MemoryRegistryStore::new())),
            Arc::new(MemoryTracker::new()),
        )
    }

    fn track(tracker: &MemoryTracker) -> (String, String) {
        let record = tracker
            .record_run(RunSubmission {
                experiment: "iris".to_string(),
                run_name: "decision_tree".to_string(),
                params: BTreeMap::new(),
                metrics: BTreeMap::new(),
                tags: BTreeMap::new(),
                artifact: sample_artifact(),
            })
            .unwrap();
        let uri = record.artifact_uri.clone().unwrap();
        (uri, record.run_id)
    }

    #[test]
    fn nothing_promoted_is_not_found() {
        let (registry, tracker) = setup();
        let loader = ProductionLoader::new(registry, tracker);
        assert!(matches!(
            loader.load_production(NAME),
            Err(BwError::Registry(RegistryError::NotFound { .. }))
        ));
    }

    #[test]
    fn loads_the_promoted_version() {
        let (registry, tracker) = setup();
        let (uri, run_id) = track(&tracker);
        let version = registry.register(NAME, &uri, &run_id).unwrap();
        registry.promote(NAME, version.version).unwrap();

        let loader = ProductionLoader::new(Arc::clone(&registry), tracker);
        let first = loader.load_production(NAME).unwrap();
        let second = loader.load_production(NAME).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(first.run_id, run_id);
        assert_eq!(first.version_label(), "iris_best_model/1");
        assert_eq!(second.version, first.version);
    }

    #[test]
    fn missing_artifact_is_an_error() {
        let (registry, tracker) = setup();
        registry.register(NAME, "runs:/gone/model", "gone").unwrap();
        registry.promote(NAME, 1).unwrap();
        let loader = ProductionLoader::new(registry, tracker);
        assert!(matches!(
            loader.load_production(NAME),
            Err(BwError::Registry(RegistryError::Artifact { .. }))
        ));
    }
}
