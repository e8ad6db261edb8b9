//! CART decision tree classifier.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use bw_types::{FeatureMatrix, ModelError};

use crate::family::{check_width, encode_labels, training_classes, Classifier};

/// Split quality measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Gini,
    Entropy,
}

impl Criterion {
    fn impurity(&self, counts: &[usize], total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let n = total as f64;
        match self {
            Criterion::Gini => {
                1.0 - counts
                    .iter()
                    .map(|&c| (c as f64 / n).powi(2))
                    .sum::<f64>()
            }
            Criterion::Entropy => -counts
                .iter()
                .filter(|&&c| c > 0)
                .map(|&c| {
                    let p = c as f64 / n;
                    p * p.log2()
                })
                .sum::<f64>(),
        }
    }
}

/// Tree node. Leaves hold a position in the fitted class list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        class: usize,
        n_samples: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        /// Rows with `x[feature] <= threshold`.
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    fn classify(&self, row: &[f64]) -> usize {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { class, .. } => return *class,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

struct Candidate {
    gain: f64,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    max_depth: Option<usize>,
    min_samples_split: usize,
    min_samples_leaf: usize,
    criterion: Criterion,
    /// Features considered per split; `None` means all of them.
    max_features: Option<usize>,
    seed: u64,
    n_features: usize,
    classes: Vec<usize>,
    root: Option<TreeNode>,
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionTree {
    pub fn new() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            criterion: Criterion::Gini,
            max_features: None,
            seed: 0,
            n_features: 0,
            classes: Vec::new(),
            root: None,
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

    pub fn with_max_features(mut self, max_features: Option<usize>) -> Self {
        self.max_features = max_features;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn depth(&self) -> Option<usize> {
        self.root.as_ref().map(TreeNode::depth)
    }

    /// Fitted class labels, ascending.
    pub fn classes(&self) -> &[usize] {
        &self.classes
    }

    fn grow(
        &self,
        x: &FeatureMatrix,
        targets: &[usize],
        indices: Vec<usize>,
        depth: usize,
        rng: &mut ChaCha8Rng,
    ) -> TreeNode {
        let counts = class_counts(targets, &indices, self.classes.len());
        let leaf = TreeNode::Leaf {
            class: majority(&counts),
            n_samples: indices.len(),
        };

        let pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let depth_reached = self.max_depth.is_some_and(|max| depth >= max);
        if pure || depth_reached || indices.len() < self.min_samples_split {
            return leaf;
        }

        let Some(split) = self.best_split(x, targets, &indices, &counts, rng) else {
            return leaf;
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| x.get(i, split.feature) <= split.threshold);
        TreeNode::Split {
            feature: split.feature,
            threshold: split.threshold,
            left: Box::new(self.grow(x, targets, left, depth + 1, rng)),
            right: Box::new(self.grow(x, targets, right, depth + 1, rng)),
        }
    }

    fn best_split(
        &self,
        x: &FeatureMatrix,
        targets: &[usize],
        indices: &[usize],
        counts: &[usize],
        rng: &mut ChaCha8Rng,
    ) -> Option<Candidate> {
        let total = indices.len();
        let parent = self.criterion.impurity(counts, total);

        let mut features: Vec<usize> = (0..x.n_features()).collect();
        if let Some(m) = self.max_features.filter(|&m| m < features.len()) {
            features.shuffle(rng);
            features.truncate(m.max(1));
            features.sort_unstable();
        }

        let mut best: Option<Candidate> = None;
        let mut order = indices.to_vec();
        for feature in features {
            order.sort_by(|&a, &b| x.get(a, feature).total_cmp(&x.get(b, feature)));

            let mut left = vec![0usize; counts.len()];
            let mut right = counts.to_vec();
            for pos in 0..total - 1 {
                let t = targets[order[pos]];
                left[t] += 1;
                right[t] -= 1;

                let value = x.get(order[pos], feature);
                let next = x.get(order[pos + 1], feature);
                if next <= value {
                    continue;
                }
                let n_left = pos + 1;
                let n_right = total - n_left;
                if n_left < self.min_samples_leaf || n_right < self.min_samples_leaf {
                    continue;
                }

                let weighted = (n_left as f64 * self.criterion.impurity(&left, n_left)
                    + n_right as f64 * self.criterion.impurity(&right, n_right))
                    / total as f64;
                let gain = parent - weighted;
                if gain > 1e-12 && best.as_ref().map_or(true, |b| gain > b.gain) {
                    let mut threshold = (value + next) / 2.0;
                    if threshold >= next {
                        threshold = value;
                    }
                    best = Some(Candidate {
                        gain,
                        feature,
                        threshold,
                    });
                }
            }
        }
        best
    }
}

fn class_counts(targets: &[usize], indices: &[usize], k: usize) -> Vec<usize> {
    let mut counts = vec![0; k];
    for &i in indices {
        counts[targets[i]] += 1;
    }
    counts
}

/// Most frequent class position; the lowest position wins ties.
fn majority(counts: &[usize]) -> usize {
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = i;
        }
    }
    best
}

impl Classifier for DecisionTree {
    fn fit(&mut self, x: &FeatureMatrix, y: &[usize]) -> Result<(), ModelError> {
        let classes = training_classes(x, y)?;
        let targets = encode_labels(&classes, y)?;
        self.classes = classes;
        self.n_features = x.n_features();

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let indices: Vec<usize> = (0..x.n_rows()).collect();
        self.root = Some(self.grow(x, &targets, indices, 0, &mut rng));
        Ok(())
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError> {
        let root = self.root.as_ref().ok_or(ModelError::NotFitted)?;
        check_width(self.n_features, x)?;
        Ok(x.rows().map(|row| self.classes[root.classify(row)]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staircase() -> (FeatureMatrix, Vec<usize>) {
        let rows: Vec<Vec<f64>> = (0..12).map(|i| vec![i as f64, 0.0]).collect();
        let y = (0..12).map(|i| i / 4).collect();
        (FeatureMatrix::from_rows(2, &rows).unwrap(), y)
    }

    #[test]
    fn unlimited_tree_fits_training_data() {
        let (x, y) = staircase();
        let mut tree = DecisionTree::new();
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.predict(&x).unwrap(), y);
        assert_eq!(tree.depth(), Some(2));
    }

    #[test]
    fn max_depth_limits_growth() {
        let (x, y) = staircase();
        let mut stump = DecisionTree::new().with_max_depth(Some(1));
        stump.fit(&x, &y).unwrap();
        assert_eq!(stump.depth(), Some(1));

        let mut root_only = DecisionTree::new().with_min_samples_split(100);
        root_only.fit(&x, &y).unwrap();
        assert_eq!(root_only.depth(), Some(0));
        // Equal class counts: the lowest label wins.
        assert!(root_only.predict(&x).unwrap().iter().all(|&p| p == 0));
    }

    #[test]
    fn entropy_criterion_agrees_on_clean_split() {
        let (x, y) = staircase();
        let mut tree = DecisionTree::new().with_criterion(Criterion::Entropy);
        tree.fit(&x, &y).unwrap();
        assert_eq!(tree.predict(&x).unwrap(), y);
    }

    #[test]
    fn impurity_values() {
        assert_eq!(Criterion::Gini.impurity(&[5, 0], 5), 0.0);
        assert!((Criterion::Gini.impurity(&[2, 2], 4) - 0.5).abs() < 1e-12);
        assert!((Criterion::Entropy.impurity(&[2, 2], 4) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn constant_features_give_a_leaf() {
        let x = FeatureMatrix::from_rows(1, &[vec![1.0], vec![1.0], vec![1.0]]).unwrap();
        let mut tree = DecisionTree::new();
        tree.fit(&x, &[2, 5, 5]).unwrap();
        assert_eq!(tree.depth(), Some(0));
        assert_eq!(tree.predict(&x).unwrap(), vec![5, 5, 5]);
    }
}
