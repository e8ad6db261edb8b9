//! Bagged ensemble of decision trees.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use bw_types::{FeatureMatrix, ModelError};

use crate::family::{check_width, training_classes, Classifier};
use crate::tree::{Criterion, DecisionTree};

/// How many features each split may look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
    All,
}

impl MaxFeatures {
    fn resolve(&self, n_features: usize) -> Option<usize> {
        let n = n_features as f64;
        match self {
            MaxFeatures::Sqrt => Some((n.sqrt() as usize).max(1)),
            MaxFeatures::Log2 => Some((n.log2() as usize).max(1)),
            MaxFeatures::All => None,
        }
    }
}

/// Random forest: every tree sees a bootstrap sample (when enabled) and a
/// random feature subset per split. Prediction is a majority vote; a tied
/// vote goes to the lowest label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForest {
    n_estimators: usize,
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    criterion: Criterion,
    max_features: MaxFeatures,
    bootstrap: bool,
    random_state: u64,
    n_features: usize,
    classes: Vec<usize>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    pub fn new(n_estimators: usize) -> Self {
        Self {
            n_estimators,
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            criterion: Criterion::Gini,
            max_features: MaxFeatures::Sqrt,
            bootstrap: true,
            random_state: 0,
            n_features: 0,
            classes: Vec::new(),
            trees: Vec::new(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn with_min_samples_split(mut self, n: usize) -> Self {
        self.min_samples_split = n;
        self
    }

    pub fn with_min_samples_leaf(mut self, n: usize) -> Self {
        self.min_samples_leaf = n;
        self
    }

    pub fn with_criterion(mut self, criterion: Criterion) -> Self {
        self.criterion = criterion;
        self
    }

    pub fn with_max_features(mut self, max_features: MaxFeatures) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_bootstrap(mut self, bootstrap: bool) -> Self {
        self.bootstrap = bootstrap;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Classifier for RandomForest {
    fn fit(&mut self, x: &FeatureMatrix, y: &[usize]) -> Result<(), ModelError> {
        let classes = training_classes(x, y)?;
        let n = x.n_rows();
        let mut rng = ChaCha8Rng::seed_from_u64(self.random_state);
        let max_features = self.max_features.resolve(x.n_features());

        let mut trees = Vec::with_capacity(self.n_estimators);
        for _ in 0..self.n_estimators {
            let (sample_x, sample_y) = if self.bootstrap {
                let mut sample_x = FeatureMatrix::new(x.n_features());
                let mut sample_y = Vec::with_capacity(n);
                for _ in 0..n {
                    let i = rng.gen_range(0..n);
                    sample_x.push_row(x.row(i))?;
                    sample_y.push(y[i]);
                }
                (sample_x, sample_y)
            } else {
                (x.clone(), y.to_vec())
            };

            let mut tree = DecisionTree::new()
                .with_max_depth(self.max_depth)
                .with_min_samples_split(self.min_samples_split)
                .with_min_samples_leaf(self.min_samples_leaf)
                .with_criterion(self.criterion)
                .with_max_features(max_features)
                .with_seed(rng.gen());
            tree.fit(&sample_x, &sample_y)?;
            trees.push(tree);
        }

        self.classes = classes;
        self.n_features = x.n_features();
        self.trees = trees;
        Ok(())
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::NotFitted);
        }
        check_width(self.n_features, x)?;

        let mut votes = vec![vec![0usize; self.classes.len()]; x.n_rows()];
        for tree in &self.trees {
            for (row_votes, label) in votes.iter_mut().zip(tree.predict(x)?) {
                // A bootstrap sample only contains labels from the full set.
                if let Ok(pos) = self.classes.binary_search(&label) {
                    row_votes[pos] += 1;
                }
            }
        }

        Ok(votes
            .iter()
            .map(|row_votes| {
                let mut best = 0;
                for (i, &v) in row_votes.iter().enumerate() {
                    if v > row_votes[best] {
                        best = i;
                    }
                }
                self.classes[best]
            })
            .collect())
    }
}
