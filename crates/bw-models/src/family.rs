//! Closed registry of candidate model families.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use bw_optimizer::ParamSet;
use bw_types::{FeatureMatrix, ModelError};

use crate::forest::{MaxFeatures, RandomForest};
use crate::linear::LogisticRegression;
use crate::params::ParamReader;
use crate::svm::LinearSvc;
use crate::tree::{Criterion, DecisionTree};

/// Common interface of every classifier in the registry.
pub trait Classifier {
    fn fit(&mut self, x: &FeatureMatrix, y: &[usize]) -> Result<(), ModelError>;

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError>;
}

/// A candidate family. Resolved once at configuration time; there is no
/// lookup by name after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    LogisticRegression,
    DecisionTree,
    RandomForest,
    Svc,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 4] = [
        ModelFamily::LogisticRegression,
        ModelFamily::DecisionTree,
        ModelFamily::RandomForest,
        ModelFamily::Svc,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            ModelFamily::LogisticRegression => "logistic_regression",
            ModelFamily::DecisionTree => "decision_tree",
            ModelFamily::RandomForest => "random_forest",
            ModelFamily::Svc => "svc",
        }
    }

    /// Dotted constructor path older configuration files use.
    pub fn dotted_reference(&self) -> &'static str {
        match self {
            ModelFamily::LogisticRegression => "sklearn.linear_model.LogisticRegression",
            ModelFamily::DecisionTree => "sklearn.tree.DecisionTreeClassifier",
            ModelFamily::RandomForest => "sklearn.ensemble.RandomForestClassifier",
            ModelFamily::Svc => "sklearn.svm.SVC",
        }
    }

    /// Resolve a canonical key or a dotted constructor path.
    pub fn from_reference(reference: &str) -> Result<Self, ModelError> {
        let trimmed = reference.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.key() == trimmed || f.dotted_reference() == trimmed)
            .ok_or_else(|| ModelError::UnknownFamily {
                reference: reference.to_string(),
            })
    }

    /// Parameters a search space must declare for this family.
    pub fn required_params(&self) -> &'static [&'static str] {
        match self {
            ModelFamily::LogisticRegression => &["C", "max_iter"],
            ModelFamily::DecisionTree => &["max_depth"],
            ModelFamily::RandomForest => &["n_estimators", "max_depth"],
            ModelFamily::Svc => &["C"],
        }
    }

    /// Every parameter name this family accepts.
    pub fn known_params(&self) -> &'static [&'static str] {
        match self {
            ModelFamily::LogisticRegression => {
                &["C", "max_iter", "learning_rate", "fit_intercept", "tol"]
            }
            ModelFamily::DecisionTree => &[
                "max_depth",
                "min_samples_split",
                "min_samples_leaf",
                "criterion",
            ],
            ModelFamily::RandomForest => &[
                "n_estimators",
                "max_depth",
                "min_samples_split",
                "min_samples_leaf",
                "criterion",
                "max_features",
                "bootstrap",
                "random_state",
            ],
            ModelFamily::Svc => &["C", "max_iter", "learning_rate", "kernel"],
        }
    }

    /// Construct an unfitted model from a sampled parameter set.
    pub fn build(&self, params: &ParamSet) -> Result<Model, ModelError> {
        let p = ParamReader::new(self.key(), params, self.known_params())?;
        for name in self.required_params() {
            p.require(name)?;
        }

        let model = match self {
            ModelFamily::LogisticRegression => Model::LogisticRegression(
                LogisticRegression::new(p.positive_f64("C", None)?, p.usize_at_least("max_iter", None, 1)?)
                    .with_learning_rate(p.positive_f64("learning_rate", Some(0.1))?)
                    .with_fit_intercept(p.bool("fit_intercept", true)?)
                    .with_tolerance(p.positive_f64("tol", Some(1e-6))?),
            ),
            ModelFamily::DecisionTree => Model::DecisionTree(
                DecisionTree::new()
                    .with_max_depth(p.optional_usize("max_depth", 1)?)
                    .with_min_samples_split(p.usize_at_least("min_samples_split", Some(2), 2)?)
                    .with_min_samples_leaf(p.usize_at_least("min_samples_leaf", Some(1), 1)?)
                    .with_criterion(criterion(&p)?),
            ),
            ModelFamily::RandomForest => {
                let max_features = match p.choice("max_features", "sqrt", &["sqrt", "log2", "all"])? {
                    "log2" => MaxFeatures::Log2,
                    "all" => MaxFeatures::All,
                    _ => MaxFeatures::Sqrt,
                };
                Model::RandomForest(
                    RandomForest::new(p.usize_at_least("n_estimators", None, 1)?)
                        .with_max_depth(p.optional_usize("max_depth", 1)?)
                        .with_min_samples_split(p.usize_at_least("min_samples_split", Some(2), 2)?)
                        .with_min_samples_leaf(p.usize_at_least("min_samples_leaf", Some(1), 1)?)
                        .with_criterion(criterion(&p)?)
                        .with_max_features(max_features)
                        .with_bootstrap(p.bool("bootstrap", true)?)
                        .with_random_state(p.u64_or("random_state", 0)?),
                )
            }
            ModelFamily::Svc => {
                p.choice("kernel", "linear", &["linear"])?;
                Model::Svc(
                    LinearSvc::new(p.positive_f64("C", None)?)
                        .with_max_iter(p.usize_at_least("max_iter", Some(1000), 1)?)
                        .with_learning_rate(p.positive_f64("learning_rate", Some(0.01))?),
                )
            }
        };
        Ok(model)
    }
}

fn criterion(p: &ParamReader<'_>) -> Result<Criterion, ModelError> {
    Ok(match p.choice("criterion", "gini", &["gini", "entropy"])? {
        "entropy" => Criterion::Entropy,
        _ => Criterion::Gini,
    })
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for ModelFamily {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_reference(s)
    }
}

/// A model of any registered family, fitted or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Model {
    LogisticRegression(LogisticRegression),
    DecisionTree(DecisionTree),
    RandomForest(RandomForest),
    Svc(LinearSvc),
}

impl Model {
    pub fn family(&self) -> ModelFamily {
        match self {
            Model::LogisticRegression(_) => ModelFamily::LogisticRegression,
            Model::DecisionTree(_) => ModelFamily::DecisionTree,
            Model::RandomForest(_) => ModelFamily::RandomForest,
            Model::Svc(_) => ModelFamily::Svc,
        }
    }
}

impl Classifier for Model {
    fn fit(&mut self, x: &FeatureMatrix, y: &[usize]) -> Result<(), ModelError> {
        match self {
            Model::LogisticRegression(m) => m.fit(x, y),
            Model::DecisionTree(m) => m.fit(x, y),
            Model::RandomForest(m) => m.fit(x, y),
            Model::Svc(m) => m.fit(x, y),
        }
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError> {
        match self {
            Model::LogisticRegression(m) => m.predict(x),
            Model::DecisionTree(m) => m.predict(x),
            Model::RandomForest(m) => m.predict(x),
            Model::Svc(m) => m.predict(x),
        }
    }
}

/// Validate a training set and return its sorted distinct labels.
pub(crate) fn training_classes(x: &FeatureMatrix, y: &[usize]) -> Result<Vec<usize>, ModelError> {
    if x.n_rows() != y.len() {
        return Err(ModelError::TrainingFailed {
            message: format!("{} feature rows but {} labels", x.n_rows(), y.len()),
        });
    }
    if y.is_empty() {
        return Err(ModelError::TrainingFailed {
            message: "cannot fit with 0 samples".to_string(),
        });
    }
    if x.rows().flatten().any(|v| !v.is_finite()) {
        return Err(ModelError::TrainingFailed {
            message: "training features contain non-finite values".to_string(),
        });
    }
    let mut classes = y.to_vec();
    classes.sort_unstable();
    classes.dedup();
    Ok(classes)
}

/// Map labels onto positions in `classes`.
pub(crate) fn encode_labels(classes: &[usize], y: &[usize]) -> Result<Vec<usize>, ModelError> {
    y.iter()
        .map(|label| {
            classes
                .binary_search(label)
                .map_err(|_| ModelError::TrainingFailed {
                    message: format!("label {label} missing from class list"),
                })
        })
        .collect()
}

/// Reject prediction input that does not match the fitted width.
pub(crate) fn check_width(expected: usize, x: &FeatureMatrix) -> Result<(), ModelError> {
    if x.n_features() != expected {
        return Err(ModelError::ShapeMismatch {
            expected,
            actual: x.n_features(),
        });
    }
    Ok(())
}

/// Index of the largest value; the first one wins on equality.
pub(crate) fn argmax(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}
