//! Candidate Evaluator: final refit, test scoring and run tracking for one
//! family's best parameters.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use bw_models::{ClassificationReport, Metric, ModelArtifact, ModelFamily};
use bw_optimizer::{run_isolated, ParamSet, ParameterValue, WorkerError};
use bw_registry::{ExperimentTracker, RunSubmission};
use bw_types::{Dataset, EvaluationError};

/// A fully evaluated family, eligible for selection.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Family key from the configuration.
    pub name: String,
    pub family: ModelFamily,
    pub parameters: ParamSet,
    /// Best validation score found by the optimizer.
    pub validation_score: f64,
    pub artifact: ModelArtifact,
    pub report: ClassificationReport,
    /// Seconds spent in one batched prediction over the test split.
    pub inference_time: f64,
    pub run_id: String,
    pub artifact_uri: String,
}

impl Candidate {
    pub fn score(&self, metric: Metric) -> f64 {
        self.report.get(metric)
    }
}

/// What the evaluator needs to know about one finalist.
#[derive(Debug, Clone)]
pub struct Finalist<'a> {
    pub name: &'a str,
    pub family: ModelFamily,
    pub parameters: &'a ParamSet,
    pub validation_score: f64,
}

pub struct CandidateEvaluator {
    tracker: Arc<dyn ExperimentTracker>,
    experiment: String,
    standardize: bool,
    timeout: Option<Duration>,
}

impl CandidateEvaluator {
    pub fn new(
        tracker: Arc<dyn ExperimentTracker>,
        experiment: impl Into<String>,
        standardize: bool,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            tracker,
            experiment: experiment.into(),
            standardize,
            timeout,
        }
    }

    /// Refit on `train_full`, score on `test` and record the run.
    ///
    /// Any failure (fit, timeout, tracking write) is returned as an
    /// `EvaluationError`; the tracker gets a failed run for it where possible.
    pub fn evaluate(
        &self,
        finalist: &Finalist<'_>,
        train_full: &Arc<Dataset>,
        test: &Dataset,
    ) -> Result<Candidate, EvaluationError> {
        let result = self.evaluate_inner(finalist, train_full, test);
        if let Err(error) = &result {
            if let Err(e) =
                self.tracker
                    .record_failure(&self.experiment, &run_name(finalist.name), &error.to_string())
            {
                warn!("Could not record failed run for {}: {}", finalist.name, e);
            }
        }
        result
    }

    fn evaluate_inner(
        &self,
        finalist: &Finalist<'_>,
        train_full: &Arc<Dataset>,
        test: &Dataset,
    ) -> Result<Candidate, EvaluationError> {
        let family_name = finalist.name.to_string();
        let fit_failed = |message: String| EvaluationError::FitFailed {
            family: family_name.clone(),
            message,
        };

        let data = Arc::clone(train_full);
        let family = finalist.family;
        let parameters = finalist.parameters.clone();
        let standardize = self.standardize;
        let fitted = run_isolated(
            &format!("{family_name}-refit"),
            move || {
                ModelArtifact::train(
                    family,
                    &parameters,
                    &data.feature_names,
                    &data.features,
                    &data.targets,
                    standardize,
                )
            },
            self.timeout,
        );
        let artifact = match fitted {
            Ok(Ok(artifact)) => artifact,
            Ok(Err(e)) => return Err(fit_failed(e.to_string())),
            Err(WorkerError::TimedOut(limit)) => {
                return Err(EvaluationError::Timeout {
                    family: family_name.clone(),
                    timeout_seconds: limit.as_secs_f64(),
                })
            }
            Err(e) => return Err(fit_failed(e.to_string())),
        };

        let started = Instant::now();
        let predictions = artifact
            .predict(&test.features)
            .map_err(|e| fit_failed(e.to_string()))?;
        let inference_time = started.elapsed().as_secs_f64();

        let report = ClassificationReport::compute(&test.targets, &predictions)
            .map_err(|e| fit_failed(e.to_string()))?;
        debug!(
            "{}: accuracy {:.4}, f1 {:.4}, inference {:.6}s",
            finalist.name, report.accuracy, report.f1_macro, inference_time
        );

        let record = self
            .tracker
            .record_run(RunSubmission {
                experiment: self.experiment.clone(),
                run_name: run_name(finalist.name),
                params: tracked_params(finalist.parameters),
                metrics: tracked_metrics(&report, inference_time),
                tags: BTreeMap::from([
                    ("family".to_string(), finalist.family.key().to_string()),
                    (
                        "model_class".to_string(),
                        finalist.family.dotted_reference().to_string(),
                    ),
                    (
                        "validation_score".to_string(),
                        finalist.validation_score.to_string(),
                    ),
                ]),
                artifact: artifact.clone(),
            })
            .map_err(|e| EvaluationError::Tracking {
                family: finalist.name.to_string(),
                message: e.to_string(),
            })?;
        let artifact_uri = record
            .artifact_uri
            .clone()
            .ok_or_else(|| EvaluationError::Tracking {
                family: finalist.name.to_string(),
                message: format!("run {} has no artifact", record.run_id),
            })?;

        info!(
            "Evaluated {} (run {}): f1_macro {:.4}, accuracy {:.4}",
            finalist.name, record.run_id, report.f1_macro, report.accuracy
        );
        Ok(Candidate {
            name: finalist.name.to_string(),
            family: finalist.family,
            parameters: finalist.parameters.clone(),
            validation_score: finalist.validation_score,
            artifact,
            report,
            inference_time,
            run_id: record.run_id,
            artifact_uri,
        })
    }
}

fn run_name(family: &str) -> String {
    format!("{family}_run")
}

fn tracked_params(params: &ParamSet) -> BTreeMap<String, String> {
    params
        .iter()
        .map(|(name, value)| {
            let rendered = match value {
                ParameterValue::Json(serde_json::Value::String(s)) => s.clone(),
                ParameterValue::Json(serde_json::Value::Null) => "None".to_string(),
                other => other.to_string(),
            };
            (name.clone(), rendered)
        })
        .collect()
}

fn tracked_metrics(report: &ClassificationReport, inference_time: f64) -> BTreeMap<String, f64> {
    let mut metrics: BTreeMap<String, f64> = Metric::ALL
        .iter()
        .map(|metric| (format!("test_{}", metric.as_str()), report.get(*metric)))
        .collect();
    metrics.insert("inference_time".to_string(), inference_time);
    metrics
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bw_registry::{MemoryTracker, RunStatus};
    use bw_types::FeatureMatrix;

    /// Small, well separated two-feature dataset.
    pub(crate) fn blobs(n_per_class: usize) -> Dataset {
        let mut features = FeatureMatrix::new(2);
        let mut targets = Vec::new();
        for i in 0..n_per_class {
            let jitter = (i % 5) as f64 * 0.1;
            features.push_row(&[1.0 + jitter, 1.0 - jitter]).unwrap();
            targets.push(0);
            features.push_row(&[5.0 - jitter, 5.0 + jitter]).unwrap();
            targets.push(1);
        }
        Dataset::new(vec!["a".into(), "b".into()], features, targets).unwrap()
    }

    fn tree_params() -> ParamSet {
        ParamSet::from([(
            "max_depth".to_string(),
            ParameterValue::Json(serde_json::Value::Null),
        )])
    }

    /// Candidate with a fixed f1/accuracy score and inference time.
    pub(crate) fn candidate(name: &str, score: f64, inference_time: f64) -> Candidate {
        let data = blobs(5);
        let params = tree_params();
        let artifact = ModelArtifact::train(
            ModelFamily::DecisionTree,
            &params,
            &data.feature_names,
            &data.features,
            &data.targets,
            false,
        )
        .unwrap();
        Candidate {
            name: name.to_string(),
            family: ModelFamily::DecisionTree,
            parameters: params,
            validation_score: score,
            artifact,
            report: ClassificationReport {
                accuracy: score,
                f1_macro: score,
                precision_macro: score,
                recall_macro: score,
            },
            inference_time,
            run_id: format!("run-{name}"),
            artifact_uri: format!("runs:/run-{name}/model"),
        }
    }

    fn evaluator(tracker: &Arc<MemoryTracker>) -> CandidateEvaluator {
        let tracker: Arc<dyn ExperimentTracker> = Arc::clone(tracker) as Arc<dyn ExperimentTracker>;
        CandidateEvaluator::new(tracker, "iris", true, Some(Duration::from_secs(30)))
    }

    #[test]
    fn evaluation_records_a_finished_run() {
        let tracker = Arc::new(MemoryTracker::new());
        let train = Arc::new(blobs(10));
        let test = blobs(3);
        let params = tree_params();
        let finalist = Finalist {
            name: "decision_tree",
            family: ModelFamily::DecisionTree,
            parameters: &params,
            validation_score: 1.0,
        };

        let candidate = evaluator(&tracker).evaluate(&finalist, &train, &test).unwrap();
        assert_eq!(candidate.report.accuracy, 1.0);
        assert!(candidate.inference_time >= 0.0);
        assert_eq!(candidate.artifact_uri, format!("runs:/{}/model", candidate.run_id));

        let run = tracker.get_run(&candidate.run_id).unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Finished);
        assert_eq!(run.run_name, "decision_tree_run");
        assert_eq!(run.params.get("max_depth").map(String::as_str), Some("None"));
        for key in [
            "test_accuracy",
            "test_f1_macro",
            "test_precision_macro",
            "test_recall_macro",
            "inference_time",
        ] {
            assert!(run.metrics.contains_key(key), "missing metric {key}");
        }
        assert!(tracker.load_artifact(&candidate.artifact_uri).is_ok());
    }

    #[test]
    fn invalid_parameters_fail_the_candidate() {
        let tracker = Arc::new(MemoryTracker::new());
        let params = ParamSet::from([
            ("C".to_string(), ParameterValue::Float(1.0)),
            (
                "kernel".to_string(),
                ParameterValue::Json(serde_json::json!("rbf")),
            ),
        ]);
        let finalist = Finalist {
            name: "svc",
            family: ModelFamily::Svc,
            parameters: &params,
            validation_score: 0.5,
        };

        let err = evaluator(&tracker)
            .evaluate(&finalist, &Arc::new(blobs(10)), &blobs(3))
            .unwrap_err();
        assert!(matches!(err, EvaluationError::FitFailed { .. }));
        let runs = tracker.runs();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, RunStatus::Failed);
    }

    #[test]
    fn tracking_failure_makes_candidate_ineligible() {
        let tracker = Arc::new(MemoryTracker::new());
        tracker.set_reject_writes(true);
        let params = tree_params();
        let finalist = Finalist {
            name: "decision_tree",
            family: ModelFamily::DecisionTree,
            parameters: &params,
            validation_score: 1.0,
        };

        let err = evaluator(&tracker)
            .evaluate(&finalist, &Arc::new(blobs(10)), &blobs(3))
            .unwrap_err();
        assert!(matches!(err, EvaluationError::Tracking { .. }));
        assert_eq!(tracker.run_count(), 0);
    }
}
