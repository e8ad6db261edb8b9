//! Persistence for registry documents.
//!
//! Each registry name is one document, always written whole. A store only
//! has to make a single `save` atomic; the registry builds its transitions
//! on top of that.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;

use bw_types::BwResult;

use crate::registry::RegisteredModel;
use crate::storage_error;

pub trait RegistryStore: Send + Sync {
    fn load(&self, name: &str) -> BwResult<Option<RegisteredModel>>;

    /// Replace the stored document for `model.name` in one step.
    fn save(&self, model: &RegisteredModel) -> BwResult<()>;

    /// Registry names with a stored document, sorted.
    fn names(&self) -> BwResult<Vec<String>>;
}

/// One `<root>/<name>.json` file per registry name, replaced through a
/// temp file in the same directory.
#[derive(Debug, Clone)]
pub struct FileRegistryStore {
    root: PathBuf,
}

impl FileRegistryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> BwResult<PathBuf> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
        if !valid {
            return Err(storage_error(format!("invalid registry name {name:?}")));
        }
        Ok(self.root.join(format!("{name}.json")))
    }
}

impl RegistryStore for FileRegistryStore {
    fn load(&self, name: &str) -> BwResult<Option<RegisteredModel>> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let model = serde_json::from_slice(&bytes)
            .map_err(|e| storage_error(format!("corrupt registry file {}: {e}", path.display())))?;
        Ok(Some(model))
    }

    fn save(&self, model: &RegisteredModel) -> BwResult<()> {
        let path = self.path_for(&model.name)?;
        fs::create_dir_all(&self.root)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&serde_json::to_vec_pretty(model)?)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|e| storage_error(format!("failed to replace {}: {}", path.display(), e.error)))?;
        Ok(())
    }

    fn names(&self) -> BwResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-memory store. `fail_after(n)` lets the next `n` saves succeed and
/// fails every save after that, which is how tests simulate a crash part
/// way through a transition.
#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
    models: Mutex<HashMap<String, RegisteredModel>>,
    save_budget: Mutex<Option<usize>>,
}

impl MemoryRegistryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_after(&self, saves: usize) {
        *self.save_budget.lock() = Some(saves);
    }

    pub fn heal(&self) {
        *self.save_budget.lock() = None;
    }
}

impl RegistryStore for MemoryRegistryStore {
    fn load(&self, name: &str) -> BwResult<Option<RegisteredModel>> {
        Ok(self.models.lock().get(name).cloned())
    }

    fn save(&self, model: &RegisteredModel) -> BwResult<()> {
        let mut budget = self.save_budget.lock();
        if let Some(remaining) = budget.as_mut() {
            if *remaining == 0 {
                return Err(storage_error("simulated storage failure"));
            }
            *remaining -= 1;
        }
        self.models.lock().insert(model.name.clone(), model.clone());
        Ok(())
    }

    fn names(&self) -> BwResult<Vec<String>> {
        let mut names: Vec<String> = self.models.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
