// Training pipeline - tune every family, evaluate finalists, select and promote
// Families run one after another; only the final promotion touches the registry.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use bw_data::{split_dataset, CsvLoader};
use bw_models::{Metric, ModelArtifact, ModelFamily};
use bw_optimizer::{OptimizationConfig, TrialOptimizer, TrialResult};
use bw_registry::{
    ExperimentTracker, FileRegistryStore, FileTracker, ModelRegistry, ModelVersion, RegistryStore,
};
use bw_types::{BwResult, Dataset, EvaluationError, TrialError};

use crate::config::{FamilyConfig, PipelineConfig};
use crate::evaluator::{Candidate, CandidateEvaluator, Finalist};
use crate::selector::{SelectionState, Selector};

/// What happened to one family during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FamilyStatus {
    Evaluated {
        validation_score: f64,
        test_score: f64,
        inference_time: f64,
        run_id: String,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FamilyOutcome {
    pub name: String,
    pub family: ModelFamily,
    #[serde(flatten)]
    pub status: FamilyStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Winner {
    pub name: String,
    pub family: ModelFamily,
    pub run_id: String,
    pub score: f64,
    pub inference_time: f64,
}

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineReport {
    pub registry_name: String,
    pub primary_metric: Metric,
    pub families: Vec<FamilyOutcome>,
    pub winner: Option<Winner>,
    /// The version put in Production, `None` when no family survived.
    pub promoted: Option<ModelVersion>,
}

pub struct TrainingPipeline<S> {
    config: PipelineConfig,
    tracker: Arc<dyn ExperimentTracker>,
    registry: Arc<ModelRegistry<S>>,
}

impl TrainingPipeline<FileRegistryStore> {
    /// Pipeline backed by the file tracker and file registry named in `config`.
    pub fn from_config(config: PipelineConfig) -> Self {
        let tracker = Arc::new(FileTracker::new(&config.experiment.tracking_root));
        let registry = Arc::new(ModelRegistry::new(FileRegistryStore::new(&config.registry_root)));
        Self::new(config, tracker, registry)
    }
}

impl<S: RegistryStore> TrainingPipeline<S> {
    pub fn new(
        config: PipelineConfig,
        tracker: Arc<dyn ExperimentTracker>,
        registry: Arc<ModelRegistry<S>>,
    ) -> Self {
        Self {
            config,
            tracker,
            registry,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ModelRegistry<S>> {
        &self.registry
    }

    /// Load the processed dataset named in the configuration and run.
    pub fn run(&self) -> BwResult<PipelineReport> {
        let path = self.config.processed_data()?;
        let dataset = CsvLoader::for_feature_contract(&self.config.model.target_column).load(path)?;
        self.run_on(dataset)
    }

    /// Run every phase on an already loaded dataset.
    ///
    /// Per-family failures are logged and leave that family out of the
    /// selection. A registration or promotion failure is returned as an
    /// error; the report is only produced once the winner is in Production.
    pub fn run_on(&self, dataset: Dataset) -> BwResult<PipelineReport> {
        let settings = &self.config.model;
        if let Some(repaired) = self.registry.recover(&settings.registry_name)? {
            info!(
                "Recovered interrupted promotion of {} version {}",
                repaired.name, repaired.version
            );
        }

        let split = split_dataset(
            &dataset,
            settings.test_size,
            settings.validation_size,
            settings.random_state,
        )?;
        let train_full = Arc::new(split.train_full()?);
        let train = Arc::new(split.train);
        let validation = Arc::new(split.validation);
        let test = split.test;

        let evaluator = CandidateEvaluator::new(
            Arc::clone(&self.tracker),
            self.config.experiment.name.clone(),
            settings.standardize,
            self.config.selection.candidate_timeout,
        );
        let selector = Selector::new(
            self.config.selection.primary_metric,
            self.config.selection.tie_break,
        );
        let mut state = SelectionState::new();
        let mut families = Vec::with_capacity(self.config.families.len());

        info!(
            "Starting experiment {} with {} families",
            self.config.experiment.name,
            self.config.families.len()
        );
        for family in &self.config.families {
            let outcome =
                self.process_family(family, &train, &validation, &train_full, &test, &evaluator);
            let status = match outcome {
                Ok(candidate) => {
                    let status = FamilyStatus::Evaluated {
                        validation_score: candidate.validation_score,
                        test_score: candidate.score(selector.primary_metric()),
                        inference_time: candidate.inference_time,
                        run_id: candidate.run_id.clone(),
                    };
                    selector.consider(&mut state, candidate);
                    status
                }
                Err(e) => {
                    error!("Family {} excluded from selection: {}", family.name, e);
                    FamilyStatus::Failed {
                        error: e.to_string(),
                    }
                }
            };
            families.push(FamilyOutcome {
                name: family.name.clone(),
                family: family.family,
                status,
            });
        }

        let Some(winner) = state.into_winner() else {
            warn!(
                "No family produced a candidate; Production for {} is unchanged",
                settings.registry_name
            );
            return Ok(PipelineReport {
                registry_name: settings.registry_name.clone(),
                primary_metric: selector.primary_metric(),
                families,
                winner: None,
                promoted: None,
            });
        };

        let promoted = self.promote(&winner)?;
        Ok(PipelineReport {
            registry_name: settings.registry_name.clone(),
            primary_metric: selector.primary_metric(),
            families,
            winner: Some(Winner {
                name: winner.name.clone(),
                family: winner.family,
                run_id: winner.run_id.clone(),
                score: winner.score(selector.primary_metric()),
                inference_time: winner.inference_time,
            }),
            promoted: Some(promoted),
        })
    }

    fn process_family(
        &self,
        family: &FamilyConfig,
        train: &Arc<Dataset>,
        validation: &Arc<Dataset>,
        train_full: &Arc<Dataset>,
        test: &Dataset,
        evaluator: &CandidateEvaluator,
    ) -> Result<Candidate, EvaluationError> {
        let best = self.tune(family, train, validation)?;
        let finalist = Finalist {
            name: &family.name,
            family: family.family,
            parameters: &best.parameters,
            validation_score: best.score,
        };
        evaluator.evaluate(&finalist, train_full, test)
    }

    /// Search `family`'s space, fitting on `train` and scoring on `validation`.
    fn tune(
        &self,
        family: &FamilyConfig,
        train: &Arc<Dataset>,
        validation: &Arc<Dataset>,
    ) -> Result<TrialResult, EvaluationError> {
        let settings = &self.config.optimizer;
        let mut config = OptimizationConfig::new(&family.name, settings.n_trials)
            .with_strategy(settings.strategy)
            .with_concurrency(settings.concurrency)
            .with_seed(self.config.model.random_state);
        if let Some(limit) = settings.trial_timeout {
            config = config.with_trial_timeout(limit);
        }

        let kind = family.family;
        let metric = settings.metric;
        let standardize = self.config.model.standardize;
        let train = Arc::clone(train);
        let validation = Arc::clone(validation);
        let outcome = TrialOptimizer::new(config, family.search_space.clone()).optimize(move |params| {
            let fit_failed = |e: bw_types::ModelError| TrialError::FitFailed {
                message: e.to_string(),
            };
            let artifact = ModelArtifact::train(
                kind,
                params,
                &train.feature_names,
                &train.features,
                &train.targets,
                standardize,
            )
            .map_err(fit_failed)?;
            let predictions = artifact.predict(&validation.features).map_err(fit_failed)?;
            metric
                .score(&validation.targets, &predictions)
                .map_err(fit_failed)
        });

        outcome
            .best()
            .cloned()
            .ok_or_else(|| EvaluationError::NoSuccessfulTrial {
                family: family.name.clone(),
            })
    }

    fn promote(&self, winner: &Candidate) -> BwResult<ModelVersion> {
        let name = &self.config.model.registry_name;
        info!(
            "Best model: {} ({} = {:.4}, inference {:.6}s)",
            winner.name,
            self.config.selection.primary_metric,
            winner.score(self.config.selection.primary_metric),
            winner.inference_time
        );
        let registered = self
            .registry
            .register(name, &winner.artifact_uri, &winner.run_id)?;
        let promoted = self.registry.promote(name, registered.version)?;
        info!("{} version {} is now in Production", name, promoted.version);
        Ok(promoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use bw_registry::{MemoryRegistryStore, MemoryTracker, ProductionLoader, Stage};
    use bw_types::{BwError, FeatureContract, FeatureMatrix, RawInput, FEATURE_COLUMNS};

    /// Deterministic iris-shaped data: three well separated classes.
    fn iris_like(per_class: usize) -> Dataset {
        let centers = [(5.0, 3.4, 1.5, 0.2), (5.9, 2.8, 4.3, 1.3), (6.6, 3.0, 5.6, 2.1)];
        let mut features = FeatureMatrix::new(FEATURE_COLUMNS.len());
        let mut targets = Vec::new();
        for i in 0..per_class {
            let jitter = ((i * 7) % 11) as f64 / 11.0 - 0.5;
            for (label, (a, b, c, d)) in centers.iter().enumerate() {
                let raw = RawInput::new(a + 0.3 * jitter, b - 0.2 * jitter, c + 0.2 * jitter, d + 0.1 * jitter);
                features
                    .push_row(FeatureContract::derive(&raw).as_slice())
                    .unwrap();
                targets.push(label);
            }
        }
        let names = FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect();
        Dataset::new(names, features, targets).unwrap()
    }

    fn pipeline(
        text: &str,
    ) -> (
        TrainingPipeline<MemoryRegistryStore>,
        Arc<MemoryTracker>,
        Arc<ModelRegistry<MemoryRegistryStore>>,
    ) {
        let config = PipelineConfig::from_toml_str(text).unwrap();
        let tracker = Arc::new(MemoryTracker::new());
        let registry = Arc::new(ModelRegistry::new(MemoryRegistryStore::new()));
        let pipeline = TrainingPipeline::new(
            config,
            Arc::clone(&tracker) as Arc<dyn ExperimentTracker>,
            Arc::clone(&registry),
        );
        (pipeline, tracker, registry)
    }

    #[test]
    fn run_promotes_the_winner() {
        let (pipeline, tracker, registry) = pipeline(SAMPLE);
        let report = pipeline.run_on(iris_like(20)).unwrap();

        assert_eq!(report.families.len(), 2);
        assert_eq!(report.families[0].name, "svc");
        assert_eq!(report.families[1].name, "decision_tree");
        let winner = report.winner.unwrap();
        let promoted = report.promoted.unwrap();
        assert_eq!(promoted.version, 1);
        assert_eq!(promoted.stage, Stage::Production);
        assert_eq!(promoted.run_id, winner.run_id);
        assert!(winner.score > 0.8);

        // One finished run per evaluated family.
        assert_eq!(tracker.run_count(), 2);
        let loader = ProductionLoader::new(registry, tracker as Arc<dyn ExperimentTracker>);
        let loaded = loader.load_production("iris_best_model").unwrap();
        assert_eq!(loaded.run_id, winner.run_id);
    }

    #[test]
    fn second_run_archives_previous_production() {
        let (pipeline, _tracker, registry) = pipeline(SAMPLE);
        pipeline.run_on(iris_like(20)).unwrap();
        pipeline.run_on(iris_like(20)).unwrap();

        let versions = registry.search_versions("iris_best_model").unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].stage, Stage::Archived);
        assert_eq!(versions[1].stage, Stage::Production);
    }

    #[test]
    fn no_candidates_leaves_production_untouched() {
        let (pipeline, tracker, registry) = pipeline(SAMPLE);
        pipeline.run_on(iris_like(20)).unwrap();

        tracker.set_reject_writes(true);
        let report = pipeline.run_on(iris_like(20)).unwrap();
        assert!(report.winner.is_none());
        assert!(report.promoted.is_none());
        assert!(report
            .families
            .iter()
            .all(|f| matches!(f.status, FamilyStatus::Failed { .. })));
        assert_eq!(registry.production_version("iris_best_model").unwrap().version, 1);
    }

    #[test]
    fn failing_family_does_not_stop_the_others() {
        let text = SAMPLE.replace("choices = [\"linear\"]", "choices = [\"rbf\"]");
        let (pipeline, _tracker, _registry) = pipeline(&text);
        let report = pipeline.run_on(iris_like(20)).unwrap();

        assert!(matches!(report.families[0].status, FamilyStatus::Failed { .. }));
        assert!(matches!(report.families[1].status, FamilyStatus::Evaluated { .. }));
        assert_eq!(report.winner.unwrap().name, "decision_tree");
    }

    #[test]
    fn file_backed_run_is_servable_after_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let csv = dir.path().join("processed.csv");
        let tracking = dir.path().join("mlruns");
        let registry_root = dir.path().join("registry");
        bw_data::write_dataset(&iris_like(20), "target", &csv).unwrap();

        let text = format!(
            "{}\n[registry]\nroot = {:?}\n",
            SAMPLE
                .replace("data/processed/iris_processed.csv", &csv.display().to_string())
                .replace(
                    "name = \"iris_classification\"",
                    &format!(
                        "name = \"iris_classification\"\ntracking_root = {:?}",
                        tracking.display().to_string()
                    ),
                ),
            registry_root.display().to_string()
        );
        let config = PipelineConfig::from_toml_str(&text).unwrap();
        let report = TrainingPipeline::from_config(config).run().unwrap();
        let promoted = report.promoted.unwrap();

        let registry = Arc::new(ModelRegistry::new(FileRegistryStore::new(&registry_root)));
        let tracker: Arc<dyn ExperimentTracker> = Arc::new(FileTracker::new(&tracking));
        let loaded = ProductionLoader::new(registry, tracker)
            .load_production("iris_best_model")
            .unwrap();
        assert_eq!(loaded.version, promoted.version);
        assert_eq!(loaded.artifact.feature_names.len(), FEATURE_COLUMNS.len());
    }

    #[test]
    fn promotion_failure_is_an_error() {
        let (pipeline, _tracker, registry) = pipeline(SAMPLE);
        // Registration succeeds, the promotion journal write does not.
        registry.store().fail_after(1);
        let err = pipeline.run_on(iris_like(20)).unwrap_err();
        assert!(matches!(err, BwError::Registry(_)));

        registry.store().heal();
        assert!(registry.production_version("iris_best_model").is_err());
    }
}
