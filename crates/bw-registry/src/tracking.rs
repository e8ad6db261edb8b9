//! Experiment tracking sink.
//!
//! A run is recorded as one unit: parameters, metrics and the serialized
//! artifact land together or not at all. The run id is what the registry
//! later points a version at.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use bw_models::ModelArtifact;
use bw_types::{BwResult, RegistryError};

use crate::storage_error;

const RUN_FILE: &str = "run.json";
const MODEL_FILE: &str = "model.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Finished,
    Failed,
}

/// Metadata of one tracked run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub experiment: String,
    pub run_name: String,
    pub status: RunStatus,
    /// Parameters rendered as strings.
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    pub artifact_uri: Option<String>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl RunRecord {
    fn new(experiment: &str, run_name: &str, status: RunStatus) -> Self {
        Self {
            run_id: Uuid::new_v4().simple().to_string(),
            experiment: experiment.to_string(),
            run_name: run_name.to_string(),
            status,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tags: BTreeMap::new(),
            artifact_uri: None,
            error: None,
            recorded_at: Utc::now(),
        }
    }
}

/// Everything a successful run records.
#[derive(Debug, Clone)]
pub struct RunSubmission {
    pub experiment: String,
    pub run_name: String,
    pub params: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub tags: BTreeMap<String, String>,
    pub artifact: ModelArtifact,
}

impl RunSubmission {
    fn into_record(self) -> (RunRecord, ModelArtifact) {
        let mut record = RunRecord::new(&self.experiment, &self.run_name, RunStatus::Finished);
        record.params = self.params;
        record.metrics = self.metrics;
        record.tags = self.tags;
        record.artifact_uri = Some(artifact_uri(&record.run_id));
        (record, self.artifact)
    }
}

pub fn artifact_uri(run_id: &str) -> String {
    format!("runs:/{run_id}/model")
}

/// Run id named by a `runs:/<run_id>/model` URI.
pub fn parse_artifact_uri(uri: &str) -> BwResult<&str> {
    uri.strip_prefix("runs:/")
        .and_then(|rest| rest.strip_suffix("/model"))
        .filter(|id| !id.is_empty() && !id.contains('/'))
        .ok_or_else(|| {
            RegistryError::Artifact {
                uri: uri.to_string(),
                message: "expected runs:/<run_id>/model".to_string(),
            }
            .into()
        })
}

pub trait ExperimentTracker: Send + Sync {
    /// Record a finished run and its artifact atomically.
    fn record_run(&self, submission: RunSubmission) -> BwResult<RunRecord>;

    /// Record a run that produced no artifact.
    fn record_failure(&self, experiment: &str, run_name: &str, error: &str) -> BwResult<RunRecord>;

    fn get_run(&self, run_id: &str) -> BwResult<Option<RunRecord>>;

    fn load_artifact(&self, uri: &str) -> BwResult<ModelArtifact>;
}

// ---------------------------------------------------------------------------
// File-backed tracker
// ---------------------------------------------------------------------------

/// Tracker laid out as `<root>/<experiment>/<run_id>/{run.json, model.json}`.
///
/// A run directory is assembled under a hidden staging name and renamed
/// into place, so a reader never sees a run without its artifact.
#[derive(Debug, Clone)]
pub struct FileTracker {
    root: PathBuf,
}

impl FileTracker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn write_run(&self, record: &RunRecord, artifact: Option<&ModelArtifact>) -> BwResult<()> {
        let experiment_dir = self.root.join(&record.experiment);
        fs::create_dir_all(&experiment_dir)?;
        let staging = experiment_dir.join(format!(".staging-{}", record.run_id));
        let target = experiment_dir.join(&record.run_id);

        let result = (|| -> BwResult<()> {
            fs::create_dir_all(&staging)?;
            if let Some(artifact) = artifact {
                fs::write(staging.join(MODEL_FILE), artifact.to_json()?)?;
            }
            fs::write(staging.join(RUN_FILE), serde_json::to_vec_pretty(record)?)?;
            fs::rename(&staging, &target)?;
            Ok(())
        })();

        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_dir_all(&staging) {
                debug!("Could not remove staging dir {}: {}", staging.display(), cleanup);
            }
            return Err(storage_error(format!(
                "failed to record run {} in {}: {}",
                record.run_id,
                experiment_dir.display(),
                e
            )));
        }
        Ok(())
    }

    fn run_dir(&self, run_id: &str) -> BwResult<Option<PathBuf>> {
        if !self.root.exists() {
            return Ok(None);
        }
        for entry in fs::read_dir(&self.root)? {
            let candidate = entry?.path().join(run_id);
            if candidate.join(RUN_FILE).is_file() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }
}

impl ExperimentTracker for FileTracker {
    fn record_run(&self, submission: RunSubmission) -> BwResult<RunRecord> {
        let (record, artifact) = submission.into_record();
        self.write_run(&record, Some(&artifact))?;
        debug!("Recorded run {} ({})", record.run_id, record.run_name);
        Ok(record)
    }

    fn record_failure(&self, experiment: &str, run_name: &str, error: &str) -> BwResult<RunRecord> {
        let mut record = RunRecord::new(experiment, run_name, RunStatus::Failed);
        record.error = Some(error.to_string());
        self.write_run(&record, None)?;
        Ok(record)
    }

    fn get_run(&self, run_id: &str) -> BwResult<Option<RunRecord>> {
        match self.run_dir(run_id)? {
            Some(dir) => {
                let bytes = fs::read(dir.join(RUN_FILE))?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            None => Ok(None),
        }
    }

    fn load_artifact(&self, uri: &str) -> BwResult<ModelArtifact> {
        let run_id = parse_artifact_uri(uri)?;
        let unavailable = |message: String| RegistryError::Artifact {
            uri: uri.to_string(),
            message,
        };
        let dir = self
            .run_dir(run_id)?
            .ok_or_else(|| unavailable("run not found".to_string()))?;
        let bytes = fs::read(dir.join(MODEL_FILE))
            .map_err(|e| unavailable(format!("cannot read artifact: {e}")))?;
        ModelArtifact::from_json(&bytes)
            .map_err(|e| unavailable(format!("corrupt artifact: {e}")).into())
    }
}

// ---------------------------------------------------------------------------
// In-memory tracker
// ---------------------------------------------------------------------------

/// Tracker kept in memory. Writes can be switched off to exercise the
/// failure path.
#[derive(Debug, Default)]
pub struct MemoryTracker {
    runs: Mutex<HashMap<String, (RunRecord, Option<ModelArtifact>)>>,
    reject_writes: AtomicBool,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().len()
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self.runs.lock().values().map(|(r, _)| r.clone()).collect();
        runs.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        runs
    }

    fn insert(&self, record: RunRecord, artifact: Option<ModelArtifact>) -> BwResult<RunRecord> {
        if self.reject_writes.load(Ordering::SeqCst) {
            warn!("Tracking store rejected run {}", record.run_name);
            return Err(storage_error("tracking store is not accepting writes"));
        }
        self.runs
            .lock()
            .insert(record.run_id.clone(), (record.clone(), artifact));
        Ok(record)
    }
}

impl ExperimentTracker for MemoryTracker {
    fn record_run(&self, submission: RunSubmission) -> BwResult<RunRecord> {
        let (record, artifact) = submission.into_record();
        self.insert(record, Some(artifact))
    }

    fn record_failure(&self, experiment: &str, run_name: &str, error: &str) -> BwResult<RunRecord> {
        let mut record = RunRecord::new(experiment, run_name, RunStatus::Failed);
        record.error = Some(error.to_string());
        self.insert(record, None)
    }

    fn get_run(&self, run_id: &str) -> BwResult<Option<RunRecord>> {
        Ok(self.runs.lock().get(run_id).map(|(r, _)| r.clone()))
    }

    fn load_artifact(&self, uri: &str) -> BwResult<ModelArtifact> {
        let run_id = parse_artifact_uri(uri)?;
        self.runs
            .lock()
            .get(run_id)
            .and_then(|(_, artifact)| artifact.clone())
            .ok_or_else(|| {
                RegistryError::Artifact {
                    uri: uri.to_string(),
                    message: "no artifact recorded for run".to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bw_models::ModelFamily;
    use bw_optimizer::{ParamSet, ParameterValue};
    use bw_types::{FeatureMatrix, FEATURE_COLUMNS};
    use tempfile::TempDir;

    pub(crate) fn sample_artifact() -> ModelArtifact {
        let rows: Vec<Vec<f64>> = (0..6)
            .map(|i| vec![i as f64; FEATURE_COLUMNS.len()])
            .collect();
        let x = FeatureMatrix::from_rows(FEATURE_COLUMNS.len(), &rows).unwrap();
        let y = vec![0, 0, 0, 1, 1, 1];
        let names: Vec<String> = FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect();
        let mut params = ParamSet::new();
        params.insert("max_depth".into(), ParameterValue::Int(2));
        ModelArtifact::train(ModelFamily::DecisionTree, &params, &names, &x, &y, true).unwrap()
    }

    fn submission(run_name: &str) -> RunSubmission {
        let mut metrics = BTreeMap::new();
        metrics.insert("f1_macro".to_string(), 0.9);
        RunSubmission {
            experiment: "iris".to_string(),
            run_name: run_name.to_string(),
            params: BTreeMap::from([("max_depth".to_string(), "2".to_string())]),
            metrics,
            tags: BTreeMap::new(),
            artifact: sample_artifact(),
        }
    }

    #[test]
    fn artifact_uri_parsing() {
        assert_eq!(parse_artifact_uri("runs:/abc/model").unwrap(), "abc");
        assert!(parse_artifact_uri("s3://bucket/model").is_err());
        assert!(parse_artifact_uri("runs://model").is_err());
    }

    #[test]
    fn file_tracker_round_trip() {
        let dir = TempDir::new().unwrap();
        let tracker = FileTracker::new(dir.path());

        let record = tracker.record_run(submission("decision_tree")).unwrap();
        assert_eq!(record.status, RunStatus::Finished);
        let uri = record.artifact_uri.clone().unwrap();

        let fetched = tracker.get_run(&record.run_id).unwrap().unwrap();
        assert_eq!(fetched, record);
        let artifact = tracker.load_artifact(&uri).unwrap();
        assert_eq!(artifact.family, ModelFamily::DecisionTree);

        // No staging directory is left behind.
        let leftovers: Vec<_> = fs::read_dir(dir.path().join("iris"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().starts_with(".staging"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn file_tracker_failure_runs_have_no_artifact() {
        let dir = TempDir::new().unwrap();
        let tracker = FileTracker::new(dir.path());
        let record = tracker.record_failure("iris", "svc", "fit timed out").unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert!(tracker.load_artifact(&artifact_uri(&record.run_id)).is_err());
        assert!(tracker.get_run("missing").unwrap().is_none());
    }

    #[test]
    fn memory_tracker_can_reject_writes() {
        let tracker = MemoryTracker::new();
        tracker.record_run(submission("a")).unwrap();
        tracker.set_reject_writes(true);
        assert!(tracker.record_run(submission("b")).is_err());
        assert_eq!(tracker.run_count(), 1);
    }
}
