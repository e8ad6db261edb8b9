//! Trial Optimizer: bounded propose → fit → score loop for one family.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use bw_types::TrialError;

use crate::search::{ParamSet, SearchSpace};
use crate::trial::{OptimizationConfig, OptimizationStatus, Trial, TrialResult};
use crate::worker::{run_isolated, WorkerError};

type Objective = dyn Fn(&ParamSet) -> Result<f64, TrialError> + Send + Sync;

/// Everything one optimization run produced.
#[derive(Debug, Clone)]
pub struct OptimizationOutcome {
    pub status: OptimizationStatus,
    /// Every trial, ordered by trial number.
    pub trials: Vec<Trial>,
}

impl OptimizationOutcome {
    pub fn best(&self) -> Option<&TrialResult> {
        self.status.best_trial.as_ref()
    }
}

/// Runs trials for one family.
///
/// Trials are proposed in batches of `concurrency` and each batch is fitted
/// in parallel. A trial whose fit fails, panics, or exceeds the trial timeout
/// is recorded as failed and skipped; it never aborts the run. Results are
/// folded into the best-so-far in trial-number order, so an equal score
/// keeps the earlier trial regardless of completion order.
pub struct TrialOptimizer {
    config: OptimizationConfig,
    space: SearchSpace,
}

impl TrialOptimizer {
    pub fn new(config: OptimizationConfig, space: SearchSpace) -> Self {
        Self { config, space }
    }

    pub fn optimize<F>(&self, objective: F) -> OptimizationOutcome
    where
        F: Fn(&ParamSet) -> Result<f64, TrialError> + Send + Sync + 'static,
    {
        let objective: Arc<Objective> = Arc::new(objective);
        let mut status = OptimizationStatus::new(self.config.clone());
        let mut strategy = self
            .config
            .strategy
            .build(self.space.clone(), self.config.seed);
        let batch_size = self.config.concurrency.max(1);
        let total = self.config.n_trials;

        info!(
            "Tuning {} with {} strategy: {} trials, batch size {}",
            self.config.name,
            strategy.name(),
            total,
            batch_size
        );
        status.mark_running();

        let mut trials = Vec::with_capacity(total);
        while trials.len() < total {
            let offset = trials.len();
            let count = batch_size.min(total - offset);
            let pending: Vec<Trial> = strategy
                .suggest(count)
                .into_iter()
                .enumerate()
                .map(|(i, params)| Trial::new(offset + i, params))
                .collect();

            // `collect` on an indexed parallel iterator preserves input order.
            let finished: Vec<Trial> = pending
                .into_par_iter()
                .map(|mut trial| {
                    self.run_trial(&objective, &mut trial);
                    trial
                })
                .collect();

            for trial in &finished {
                match (&trial.result, &trial.error) {
                    (Some(result), _) => {
                        debug!(
                            "{} trial {} scored {:.4}",
                            self.config.name, trial.trial_number, result.score
                        );
                        strategy.report(&result.parameters, result.score);
                        status.trials_completed += 1;
                        status.update_best(result);
                    }
                    (None, error) => {
                        warn!(
                            "{} trial {} skipped: {}",
                            self.config.name,
                            trial.trial_number,
                            error
                                .as_ref()
                                .map(ToString::to_string)
                                .unwrap_or_else(|| "no result".to_string())
                        );
                        status.trials_failed += 1;
                    }
                }
            }
            trials.extend(finished);
        }

        match &status.best_trial {
            Some(best) => {
                info!(
                    "{} best validation score {:.4} (trial {}, {} failed)",
                    self.config.name, best.score, best.trial_number, status.trials_failed
                );
                status.mark_completed();
            }
            None => {
                let message = format!("all {} trials failed", status.trials_failed);
                warn!("{}: {}", self.config.name, message);
                status.mark_failed(message);
            }
        }

        OptimizationOutcome { status, trials }
    }

    fn run_trial(&self, objective: &Arc<Objective>, trial: &mut Trial) {
        trial.mark_running();
        let started = Instant::now();

        let job_objective = Arc::clone(objective);
        let params = trial.parameters.clone();
        let label = format!("{}-trial-{}", self.config.name, trial.trial_number);
        let outcome = run_isolated(
            &label,
            move || job_objective(&params),
            self.config.trial_timeout,
        );

        let score = match outcome {
            Ok(Ok(score)) if score.is_finite() => Ok(score),
            Ok(Ok(score)) => Err(TrialError::FitFailed {
                message: format!("non-finite score {score}"),
            }),
            Ok(Err(e)) => Err(e),
            Err(WorkerError::TimedOut(limit)) => Err(TrialError::Timeout {
                timeout_seconds: limit.as_secs_f64(),
            }),
            Err(WorkerError::Lost) => Err(TrialError::WorkerLost),
            Err(WorkerError::Spawn(message)) => Err(TrialError::FitFailed { message }),
        };

        match score {
            Ok(score) => trial.mark_completed(TrialResult {
                trial_number: trial.trial_number,
                score,
                parameters: trial.parameters.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            }),
            Err(error) => trial.mark_failed(error),
        }
    }
}
