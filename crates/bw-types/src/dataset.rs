use serde::{Deserialize, Serialize};

use crate::errors::{DataError, ModelError};

/// Dense row-major feature matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    n_features: usize,
    data: Vec<f64>,
}

impl FeatureMatrix {
    pub fn new(n_features: usize) -> Self {
        Self {
            n_features,
            data: Vec::new(),
        }
    }

    pub fn from_rows(n_features: usize, rows: &[Vec<f64>]) -> Result<Self, ModelError> {
        let mut matrix = Self::new(n_features);
        for row in rows {
            matrix.push_row(row)?;
        }
        Ok(matrix)
    }

    pub fn push_row(&mut self, row: &[f64]) -> Result<(), ModelError> {
        if row.len() != self.n_features {
            return Err(ModelError::ShapeMismatch {
                expected: self.n_features,
                actual: row.len(),
            });
        }
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn n_rows(&self) -> usize {
        if self.n_features == 0 {
            0
        } else {
            self.data.len() / self.n_features
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn row(&self, index: usize) -> &[f64] {
        let start = index * self.n_features;
        &self.data[start..start + self.n_features]
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_features + col]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks(self.n_features.max(1))
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [f64]> {
        self.data.chunks_mut(self.n_features.max(1))
    }
}

/// Labeled tabular dataset: features plus integer class labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub feature_names: Vec<String>,
    pub features: FeatureMatrix,
    pub targets: Vec<usize>,
}

impl Dataset {
    pub fn new(
        feature_names: Vec<String>,
        features: FeatureMatrix,
        targets: Vec<usize>,
    ) -> Result<Self, DataError> {
        if features.n_rows() != targets.len() {
            return Err(DataError::InvalidInput {
                message: format!(
                    "{} feature rows but {} targets",
                    features.n_rows(),
                    targets.len()
                ),
            });
        }
        if feature_names.len() != features.n_features() {
            return Err(DataError::InvalidInput {
                message: format!(
                    "{} feature names for {} feature columns",
                    feature_names.len(),
                    features.n_features()
                ),
            });
        }
        Ok(Self {
            feature_names,
            features,
            targets,
        })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Distinct class labels, ascending.
    pub fn classes(&self) -> Vec<usize> {
        let mut classes = self.targets.clone();
        classes.sort_unstable();
        classes.dedup();
        classes
    }

    /// New dataset holding the given rows, in the given order.
    pub fn subset(&self, indices: &[usize]) -> Self {
        let mut features = FeatureMatrix::new(self.features.n_features());
        let mut targets = Vec::with_capacity(indices.len());
        for &index in indices {
            features.data.extend_from_slice(self.features.row(index));
            targets.push(self.targets[index]);
        }
        Self {
            feature_names: self.feature_names.clone(),
            features,
            targets,
        }
    }

    /// Rows of `self` followed by rows of `other`.
    pub fn concat(&self, other: &Dataset) -> Result<Self, DataError> {
        if self.feature_names != other.feature_names {
            return Err(DataError::InvalidInput {
                message: "cannot concatenate datasets with different columns".to_string(),
            });
        }
        let mut combined = self.clone();
        combined.features.data.extend_from_slice(&other.features.data);
        combined.targets.extend_from_slice(&other.targets);
        Ok(combined)
    }
}

/// Disjoint train/validation/test partition of one dataset.
///
/// Validation rows are only used to score optimization trials; test rows are
/// only used for the final scoring pass of each candidate.
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train: Dataset,
    pub validation: Dataset,
    pub test: Dataset,
}

impl DatasetSplit {
    /// Train and validation recombined, used for the final refit.
    pub fn train_full(&self) -> Result<Dataset, DataError> {
        self.train.concat(&self.validation)
    }
}
