//! Classifier families for Bloomwise.
//!
//! The set of families is closed: a configuration names a family by key (or by
//! its historical dotted constructor path) and [`ModelFamily::from_reference`]
//! either resolves it or rejects it. Each family validates its own parameters
//! when a model is built from a sampled [`bw_optimizer::ParamSet`].

pub mod artifact;
pub mod family;
pub mod forest;
pub mod linear;
pub mod metrics;
mod params;
pub mod preprocessing;
pub mod svm;
pub mod tree;

pub use artifact::ModelArtifact;
pub use family::{Classifier, Model, ModelFamily};
pub use forest::RandomForest;
pub use linear::LogisticRegression;
pub use metrics::{ClassificationReport, Metric};
pub use preprocessing::StandardScaler;
pub use svm::LinearSvc;
pub use tree::{Criterion, DecisionTree};
