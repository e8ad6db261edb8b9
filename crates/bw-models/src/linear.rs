//! Multinomial logistic regression.

use serde::{Deserialize, Serialize};

use bw_types::{FeatureMatrix, ModelError};

use crate::family::{argmax, check_width, encode_labels, training_classes, Classifier};

/// Softmax regression trained with full-batch gradient descent.
///
/// The objective is mean cross-entropy plus an L2 penalty of
/// `||W||² / (2·C·n)`, so larger `C` means weaker regularization. The
/// intercept is never penalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    c: f64,
    max_iter: usize,
    learning_rate: f64,
    fit_intercept: bool,
    tol: f64,
    classes: Vec<usize>,
    /// One row of weights per class.
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    n_iter: usize,
}

impl LogisticRegression {
    pub fn new(c: f64, max_iter: usize) -> Self {
        Self {
            c,
            max_iter,
            learning_rate: 0.1,
            fit_intercept: true,
            tol: 1e-6,
            classes: Vec::new(),
            weights: Vec::new(),
            bias: Vec::new(),
            n_iter: 0,
        }
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Gradient steps taken by the last fit.
    pub fn n_iter(&self) -> usize {
        self.n_iter
    }

    fn probabilities(&self, row: &[f64]) -> Vec<f64> {
        let mut logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| b + w.iter().zip(row).map(|(wi, xi)| wi * xi).sum::<f64>())
            .collect();
        let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mut total = 0.0;
        for z in &mut logits {
            *z = (*z - max).exp();
            total += *z;
        }
        for z in &mut logits {
            *z /= total;
        }
        logits
    }

    pub fn predict_proba(&self, x: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ModelError> {
        if self.classes.is_empty() {
            return Err(ModelError::NotFitted);
        }
        check_width(self.weights[0].len(), x)?;
        Ok(x.rows().map(|row| self.probabilities(row)).collect())
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: &FeatureMatrix, y: &[usize]) -> Result<(), ModelError> {
        let classes = training_classes(x, y)?;
        if classes.len() < 2 {
            return Err(ModelError::TrainingFailed {
                message: format!("needs at least two classes, got {}", classes.len()),
            });
        }
        let targets = encode_labels(&classes, y)?;
        let n = x.n_rows() as f64;
        let d = x.n_features();
        let k = classes.len();
        let lambda = 1.0 / (self.c * n);

        self.classes = classes;
        self.weights = vec![vec![0.0; d]; k];
        self.bias = vec![0.0; k];
        self.n_iter = 0;

        for _ in 0..self.max_iter {
            let mut grad_w = vec![vec![0.0; d]; k];
            let mut grad_b = vec![0.0; k];
            for (row, &target) in x.rows().zip(&targets) {
                let probs = self.probabilities(row);
                for (class, p) in probs.iter().enumerate() {
                    let err = p - if class == target { 1.0 } else { 0.0 };
                    for (g, xi) in grad_w[class].iter_mut().zip(row) {
                        *g += err * xi;
                    }
                    grad_b[class] += err;
                }
            }

            let mut largest = 0.0f64;
            for class in 0..k {
                for (w, g) in self.weights[class].iter_mut().zip(&grad_w[class]) {
                    let step = g / n + lambda * *w;
                    *w -= self.learning_rate * step;
                    largest = largest.max(step.abs());
                }
                if self.fit_intercept {
                    let step = grad_b[class] / n;
                    self.bias[class] -= self.learning_rate * step;
                    largest = largest.max(step.abs());
                }
            }
            self.n_iter += 1;

            if !largest.is_finite() {
                return Err(ModelError::TrainingFailed {
                    message: "gradient descent diverged".to_string(),
                });
            }
            if largest < self.tol {
                break;
            }
        }
        Ok(())
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError> {
        Ok(self
            .predict_proba(x)?
            .iter()
            .map(|probs| self.classes[argmax(probs)])
            .collect())
    }
}
