//! Model registry: numbered versions and their stages.
//!
//! Per registry name, versions are numbered 1, 2, 3, ... at registration and
//! never reused. At most one version is in `Production`. A promotion is
//! journalled first and then applied in a single document write that both
//! archives the old Production holder and promotes the new one, so a crash
//! can leave a pending journal entry but never a half-applied promotion.
//! [`ModelRegistry::recover`] finishes a journalled promotion.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use bw_types::{BwResult, RegistryError};

use crate::store::RegistryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    None,
    Staging,
    Production,
    Archived,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::None => "None",
            Stage::Staging => "Staging",
            Stage::Production => "Production",
            Stage::Archived => "Archived",
        };
        f.write_str(s)
    }
}

/// One registered version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: u32,
    pub stage: Stage,
    pub artifact_uri: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored document for one registry name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredModel {
    pub name: String,
    /// Highest version ever assigned; the next registration gets this + 1.
    pub last_version: u32,
    pub versions: Vec<ModelVersion>,
    /// Version whose promotion was started but not confirmed.
    pub pending_promotion: Option<u32>,
}

impl RegisteredModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            last_version: 0,
            versions: Vec::new(),
            pending_promotion: None,
        }
    }

    pub fn version(&self, version: u32) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.version == version)
    }

    pub fn production(&self) -> Vec<&ModelVersion> {
        self.versions
            .iter()
            .filter(|v| v.stage == Stage::Production)
            .collect()
    }

    /// Archive every Production version other than `version`, then put
    /// `version` in Production.
    fn apply_promotion(&mut self, version: u32) {
        let now = Utc::now();
        for entry in &mut self.versions {
            if entry.version == version {
                if entry.stage != Stage::Production {
                    entry.stage = Stage::Production;
                    entry.updated_at = now;
                }
            } else if entry.stage == Stage::Production {
                entry.stage = Stage::Archived;
                entry.updated_at = now;
            }
        }
        self.pending_promotion = None;
    }
}

pub struct ModelRegistry<S> {
    store: S,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<S: RegistryStore> ModelRegistry<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks.entry(name.to_string()).or_default().clone()
    }

    /// Register an artifact as the next version of `name`, in Staging.
    pub fn register(&self, name: &str, artifact_uri: &str, run_id: &str) -> BwResult<ModelVersion> {
        let lock = self.lock_for(name);
        let _guard = lock.lock();

        let mut model = self
            .store
            .load(name)?
            .unwrap_or_else(|| RegisteredModel::new(name));
        let now = Utc::now();
        let entry = ModelVersion {
            name: name.to_string(),
            version: model.last_version + 1,
            stage: Stage::Staging,
            artifact_uri: artifact_uri.to_string(),
            run_id: run_id.to_string(),
            created_at: now,
            updated_at: now,
        };
        model.last_version = entry.version;
        model.versions.push(entry.clone());
        self.store.save(&model)?;

        info!("Registered {} version {} (run {})", name, entry.version, run_id);
        Ok(entry)
    }

    /// Make `version` the only Production version of `name`.
    ///
    /// Promoting the version that already is the sole Production holder is
    /// a no-op. On error the previous Production version stays
    /// authoritative, though a journal entry may remain for [`Self::recover`].
    pub fn promote(&self, name: &str, version: u32) -> BwResult<ModelVersion> {
        let lock = self.lock_for(name);
        let _guard = lock.lock();

        let mut model = self
            .store
            .load(name)?
            .ok_or_else(|| RegistryError::VersionNotFound {
                name: name.to_string(),
                version,
            })?;
        if model.version(version).is_none() {
            return Err(RegistryError::VersionNotFound {
                name: name.to_string(),
                version,
            }
            .into());
        }

        let production = model.production();
        let already_sole = production.len() == 1 && production[0].version == version;
        if already_sole && model.pending_promotion.is_none() {
            info!("{} version {} already in Production", name, version);
            return Ok(production[0].clone());
        }

        model.pending_promotion = Some(version);
        self.store.save(&model)?;

        model.apply_promotion(version);
        self.store.save(&model)?;

        info!("Promoted {} version {} to Production", name, version);
        self.promoted_entry(&model, version)
    }

    /// Finish a journalled promotion of `name`, if one is pending.
    ///
    /// Returns the version that was repaired. Several Production versions
    /// with no journal to explain them cannot be repaired automatically and
    /// are reported as an inconsistency.
    pub fn recover(&self, name: &str) -> BwResult<Option<ModelVersion>> {
        let lock = self.lock_for(name);
        let _guard = lock.lock();

        let Some(mut model) = self.store.load(name)? else {
            return Ok(None);
        };

        if let Some(version) = model.pending_promotion {
            if model.version(version).is_none() {
                return Err(RegistryError::PromotionInconsistency {
                    name: name.to_string(),
                    message: format!("journal names unknown version {version}"),
                }
                .into());
            }
            warn!("Completing interrupted promotion of {} version {}", name, version);
            model.apply_promotion(version);
            self.store.save(&model)?;
            return self.promoted_entry(&model, version).map(Some);
        }

        let production = model.production();
        if production.len() > 1 {
            let versions: Vec<u32> = production.iter().map(|v| v.version).collect();
            return Err(RegistryError::PromotionInconsistency {
                name: name.to_string(),
                message: format!("versions {versions:?} are all in Production"),
            }
            .into());
        }
        Ok(None)
    }

    /// [`Self::recover`] for every stored name.
    pub fn recover_all(&self) -> BwResult<Vec<ModelVersion>> {
        let mut repaired = Vec::new();
        for name in self.store.names()? {
            if let Some(version) = self.recover(&name)? {
                repaired.push(version);
            }
        }
        Ok(repaired)
    }

    /// Every version of `name`, oldest first. Unknown names have none.
    pub fn search_versions(&self, name: &str) -> BwResult<Vec<ModelVersion>> {
        Ok(self
            .store
            .load(name)?
            .map(|m| m.versions)
            .unwrap_or_default())
    }

    pub fn get_version(&self, name: &str, version: u32) -> BwResult<ModelVersion> {
        self.store
            .load(name)?
            .and_then(|m| m.version(version).cloned())
            .ok_or_else(|| {
                RegistryError::VersionNotFound {
                    name: name.to_string(),
                    version,
                }
                .into()
            })
    }

    /// The current Production version of `name`.
    pub fn production_version(&self, name: &str) -> BwResult<ModelVersion> {
        let not_found = || RegistryError::NotFound {
            name: name.to_string(),
        };
        let model = self.store.load(name)?.ok_or_else(not_found)?;

        if let Some(pending) = model.pending_promotion {
            return Err(RegistryError::PromotionInconsistency {
                name: name.to_string(),
                message: format!("promotion of version {pending} was interrupted; run recovery"),
            }
            .into());
        }

        let production = model.production();
        match production.as_slice() {
            [] => Err(not_found().into()),
            [only] => Ok((*only).clone()),
            many => Err(RegistryError::PromotionInconsistency {
                name: name.to_string(),
                message: format!("{} versions are in Production", many.len()),
            }
            .into()),
        }
    }

    pub fn list_names(&self) -> BwResult<Vec<String>> {
        self.store.names()
    }

    fn promoted_entry(&self, model: &RegisteredModel, version: u32) -> BwResult<ModelVersion> {
        model.version(version).cloned().ok_or_else(|| {
            RegistryError::VersionNotFound {
                name: model.name.clone(),
                version,
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileRegistryStore, MemoryRegistryStore};
    use bw_types::BwError;
    use std::thread;
    use tempfile::TempDir;

    const NAME: &str = "iris_best_model";

    fn registry() -> ModelRegistry<MemoryRegistryStore> {
        ModelRegistry::new(MemoryRegistryStore::new())
    }

    fn register_n(registry: &ModelRegistry<MemoryRegistryStore>, n: u32) {
        for i in 1..=n {
            registry
                .register(NAME, &format!("runs:/r{i}/model"), &format!("r{i}"))
                .unwrap();
        }
    }

    fn stage_of(registry: &ModelRegistry<MemoryRegistryStore>, version: u32) -> Stage {
        registry.get_version(NAME, version).unwrap().stage
    }

    #[test]
    fn versions_are_sequential_and_start_in_staging() {
        let registry = registry();
        register_n(&registry, 3);
        registry.promote(NAME, 2).unwrap();
        let fourth = registry.register(NAME, "runs:/r4/model", "r4").unwrap();
        registry.promote(NAME, 4).unwrap();
        let fifth = registry.register(NAME, "runs:/r5/model", "r5").unwrap();

        assert_eq!(fourth.version, 4);
        assert_eq!(fifth.version, 5);
        assert_eq!(fifth.stage, Stage::Staging);
        let numbers: Vec<u32> = registry
            .search_versions(NAME)
            .unwrap()
            .iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn promoting_archives_previous_production() {
        let registry = registry();
        register_n(&registry, 5);
        registry.promote(NAME, 3).unwrap();
        registry.promote(NAME, 5).unwrap();

        assert_eq!(stage_of(&registry, 3), Stage::Archived);
        assert_eq!(stage_of(&registry, 5), Stage::Production);
        let production: Vec<_> = registry
            .search_versions(NAME)
            .unwrap()
            .into_iter()
            .filter(|v| v.stage == Stage::Production)
            .collect();
        assert_eq!(production.len(), 1);
        assert_eq!(registry.production_version(NAME).unwrap().version, 5);
    }

    #[test]
    fn archived_version_can_be_promoted_again() {
        let registry = registry();
        register_n(&registry, 2);
        registry.promote(NAME, 1).unwrap();
        registry.promote(NAME, 2).unwrap();
        registry.promote(NAME, 1).unwrap();
        assert_eq!(stage_of(&registry, 1), Stage::Production);
        assert_eq!(stage_of(&registry, 2), Stage::Archived);
    }

    #[test]
    fn promotion_is_idempotent_by_version() {
        let registry = registry();
        register_n(&registry, 1);
        let first = registry.promote(NAME, 1).unwrap();
        let again = registry.promote(NAME, 1).unwrap();
        assert_eq!(first, again);
    }

    #[test]
    fn no_production_before_first_promotion() {
        let registry = registry();
        assert!(matches!(
            registry.production_version(NAME),
            Err(BwError::Registry(RegistryError::NotFound { .. }))
        ));
        register_n(&registry, 2);
        assert!(matches!(
            registry.production_version(NAME),
            Err(BwError::Registry(RegistryError::NotFound { .. }))
        ));
    }

    #[test]
    fn unknown_version_cannot_be_promoted() {
        let registry = registry();
        register_n(&registry, 1);
        assert!(matches!(
            registry.promote(NAME, 9),
            Err(BwError::Registry(RegistryError::VersionNotFound { version: 9, .. }))
        ));
        assert!(registry.promote("other", 1).is_err());
    }

    #[test]
    fn interrupted_promotion_is_detected_and_recovered() {
        let registry = registry();
        register_n(&registry, 2);
        registry.promote(NAME, 1).unwrap();

        // Journal write succeeds, the transition write does not.
        registry.store().fail_after(1);
        assert!(registry.promote(NAME, 2).is_err());
        registry.store().heal();

        assert!(matches!(
            registry.production_version(NAME),
            Err(BwError::Registry(RegistryError::PromotionInconsistency { .. }))
        ));

        let repaired = registry.recover(NAME).unwrap().unwrap();
        assert_eq!(repaired.version, 2);
        assert_eq!(registry.production_version(NAME).unwrap().version, 2);
        assert_eq!(stage_of(&registry, 1), Stage::Archived);
        assert!(registry.recover(NAME).unwrap().is_none());
    }

    #[test]
    fn failed_journal_write_leaves_previous_production() {
        let registry = registry();
        register_n(&registry, 2);
        registry.promote(NAME, 1).unwrap();

        registry.store().fail_after(0);
        assert!(registry.promote(NAME, 2).is_err());
        registry.store().heal();

        assert_eq!(registry.production_version(NAME).unwrap().version, 1);
    }

    #[test]
    fn recovery_reports_multiple_production_versions() {
        let registry = registry();
        register_n(&registry, 2);
        let mut doc = registry.store().load(NAME).unwrap().unwrap();
        for v in &mut doc.versions {
            v.stage = Stage::Production;
        }
        registry.store().save(&doc).unwrap();

        assert!(matches!(
            registry.recover(NAME),
            Err(BwError::Registry(RegistryError::PromotionInconsistency { .. }))
        ));
        assert!(registry.production_version(NAME).is_err());
    }

    #[test]
    fn concurrent_promotions_keep_one_production() {
        let registry = Arc::new(registry());
        register_n(&registry, 8);

        let handles: Vec<_> = (1..=8)
            .map(|v| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.promote(NAME, v).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let production = registry
            .search_versions(NAME)
            .unwrap()
            .into_iter()
            .filter(|v| v.stage == Stage::Production)
            .count();
        assert_eq!(production, 1);
    }

    #[test]
    fn file_backed_registry_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let registry = ModelRegistry::new(FileRegistryStore::new(dir.path()));
            registry.register(NAME, "runs:/a/model", "a").unwrap();
            registry.register(NAME, "runs:/b/model", "b").unwrap();
            registry.promote(NAME, 2).unwrap();
        }
        let reopened = ModelRegistry::new(FileRegistryStore::new(dir.path()));
        let production = reopened.production_version(NAME).unwrap();
        assert_eq!(production.version, 2);
        assert_eq!(production.run_id, "b");
        assert_eq!(reopened.list_names().unwrap(), vec![NAME.to_string()]);
    }
}
