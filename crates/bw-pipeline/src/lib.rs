//! # bw-pipeline
//!
//! Offline training for Bloomwise: reads the pipeline configuration, tunes
//! every configured model family, evaluates each family's best parameters on
//! the held-out test split, selects one winner and promotes it to
//! Production in the model registry.

pub mod config;
pub mod evaluator;
pub mod pipeline;
pub mod selector;

pub use config::{
    DataConfig, ExperimentSettings, FamilyConfig, ModelSettings, OptimizerSettings,
    PipelineConfig, SelectionSettings,
};
pub use evaluator::{Candidate, CandidateEvaluator, Finalist};
pub use pipeline::{FamilyOutcome, FamilyStatus, PipelineReport, TrainingPipeline, Winner};
pub use selector::{SelectionState, Selector, TieBreak};
