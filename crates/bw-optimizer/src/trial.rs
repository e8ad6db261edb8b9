//! Trial tracking and optimization run management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use bw_types::TrialError;

use crate::search::{ParamSet, StrategyKind};

/// Top-level configuration for one family's optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    /// Name of the model family being tuned.
    pub name: String,

    /// Which search strategy to use.
    pub strategy: StrategyKind,

    /// Number of trials to run. Must be positive.
    pub n_trials: usize,

    /// How many trials to run in parallel.
    pub concurrency: usize,

    /// Wall-clock limit for a single trial; exceeding it fails the trial.
    pub trial_timeout: Option<Duration>,

    /// Seed for the strategy's sampler.
    pub seed: u64,

    pub created_at: DateTime<Utc>,
}

impl OptimizationConfig {
    pub fn new(name: impl Into<String>, n_trials: usize) -> Self {
        Self {
            name: name.into(),
            strategy: StrategyKind::Random,
            n_trials,
            concurrency: 4,
            trial_timeout: None,
            seed: 0,
            created_at: Utc::now(),
        }
    }

    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn with_trial_timeout(mut self, timeout: Duration) -> Self {
        self.trial_timeout = Some(timeout);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Lifecycle state for an optimization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationState {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Aggregate status of an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationStatus {
    pub config: OptimizationConfig,
    pub state: OptimizationState,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub best_trial: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl OptimizationStatus {
    pub fn new(config: OptimizationConfig) -> Self {
        Self {
            config,
            state: OptimizationState::Pending,
            trials_completed: 0,
            trials_failed: 0,
            best_trial: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.state = OptimizationState::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.state = OptimizationState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = OptimizationState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    /// Update the best trial if `result` strictly improves on the current
    /// best. An equal score keeps the earlier trial.
    pub fn update_best(&mut self, result: &TrialResult) {
        let improves = match &self.best_trial {
            None => true,
            Some(current_best) => result.score > current_best.score,
        };
        if improves {
            self.best_trial = Some(result.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial (one parameter assignment, fitted and scored once).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub trial_number: usize,
    pub parameters: ParamSet,
    pub status: TrialStatus,
    pub result: Option<TrialResult>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<TrialError>,
}

impl Trial {
    pub fn new(trial_number: usize, parameters: ParamSet) -> Self {
        Self {
            trial_number,
            parameters,
            status: TrialStatus::Pending,
            result: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: TrialResult) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: TrialError) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Result of a single trial: its parameters and validation score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_number: usize,
    pub score: f64,
    pub parameters: ParamSet,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ParameterValue;

    fn result(trial_number: usize, score: f64) -> TrialResult {
        let mut parameters = ParamSet::new();
        parameters.insert("max_depth".into(), ParameterValue::Int(trial_number as i64));
        TrialResult {
            trial_number,
            score,
            parameters,
            duration_ms: 1,
        }
    }

    #[test]
    fn optimization_status_lifecycle() {
        let config = OptimizationConfig::new("decision_tree", 20).with_concurrency(2);
        let mut status = OptimizationStatus::new(config);

        assert_eq!(status.state, OptimizationState::Pending);
        assert!(status.started_at.is_none());

        status.mark_running();
        assert_eq!(status.state, OptimizationState::Running);
        assert!(status.started_at.is_some());

        status.mark_completed();
        assert_eq!(status.state, OptimizationState::Completed);
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn best_trial_tracking_maximize() {
        let mut status = OptimizationStatus::new(OptimizationConfig::new("svc", 3));

        status.update_best(&result(0, 0.80));
        assert_eq!(status.best_trial.as_ref().unwrap().trial_number, 0);

        status.update_best(&result(1, 0.93));
        assert_eq!(status.best_trial.as_ref().unwrap().trial_number, 1);

        // Worse result should not replace
        status.update_best(&result(2, 0.70));
        assert_eq!(status.best_trial.as_ref().unwrap().score, 0.93);
    }

    #[test]
    fn equal_score_keeps_first_found() {
        let mut status = OptimizationStatus::new(OptimizationConfig::new("svc", 3));
        status.update_best(&result(4, 0.9));
        status.update_best(&result(5, 0.9));
        assert_eq!(status.best_trial.as_ref().unwrap().trial_number, 4);
    }

    #[test]
    fn trial_lifecycle() {
        let mut trial = Trial::new(1, ParamSet::new());
        assert_eq!(trial.status, TrialStatus::Pending);

        trial.mark_running();
        assert_eq!(trial.status, TrialStatus::Running);

        trial.mark_completed(result(1, 0.5));
        assert_eq!(trial.status, TrialStatus::Completed);
        assert!(trial.finished_at.is_some());
        assert_eq!(trial.result.as_ref().unwrap().score, 0.5);
    }

    #[test]
    fn trial_failure() {
        let mut trial = Trial::new(0, ParamSet::new());
        trial.mark_running();
        trial.mark_failed(TrialError::Timeout { timeout_seconds: 3.0 });
        assert_eq!(trial.status, TrialStatus::Failed);
        assert_eq!(trial.error, Some(TrialError::Timeout { timeout_seconds: 3.0 }));
    }
}
