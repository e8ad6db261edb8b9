//! # bw-optimizer
//!
//! Hyperparameter search for Bloomwise model families.
//!
//! Provides search space descriptors, sampling strategies (seeded random and
//! guided), trial tracking, and a runner that evaluates trials in parallel
//! batches with per-trial timeouts while keeping first-found-best semantics.

mod runner;
mod search;
mod trial;
mod worker;

pub use runner::{OptimizationOutcome, TrialOptimizer};
pub use search::{
    GuidedSearch, ParamSet, ParameterDef, ParameterKind, ParameterValue, RandomSearch,
    SearchSpace, SearchStrategy, StrategyKind,
};
pub use trial::{
    OptimizationConfig, OptimizationState, OptimizationStatus, Trial, TrialResult, TrialStatus,
};
pub use worker::{run_isolated, WorkerError};
