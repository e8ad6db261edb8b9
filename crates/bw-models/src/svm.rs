//! One-vs-rest linear support vector classifier.

use serde::{Deserialize, Serialize};

use bw_types::{FeatureMatrix, ModelError};

use crate::family::{argmax, check_width, encode_labels, training_classes, Classifier};

/// Linear SVM trained by hinge-loss subgradient descent, one binary
/// machine per class. Prediction picks the class with the largest margin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearSvc {
    c: f64,
    learning_rate: f64,
    max_iter: usize,
    tol: f64,
    classes: Vec<usize>,
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

impl LinearSvc {
    pub fn new(c: f64) -> Self {
        Self {
            c,
            learning_rate: 0.01,
            max_iter: 1000,
            tol: 1e-4,
            classes: Vec::new(),
            weights: Vec::new(),
            bias: Vec::new(),
        }
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn decision_function(&self, x: &FeatureMatrix) -> Result<Vec<Vec<f64>>, ModelError> {
        if self.classes.is_empty() {
            return Err(ModelError::NotFitted);
        }
        check_width(self.weights[0].len(), x)?;
        Ok(x.rows()
            .map(|row| {
                self.weights
                    .iter()
                    .zip(&self.bias)
                    .map(|(w, b)| margin(w, *b, row))
                    .collect()
            })
            .collect())
    }

    fn fit_binary(&self, x: &FeatureMatrix, signs: &[f64]) -> (Vec<f64>, f64) {
        let n = x.n_rows() as f64;
        let lambda = 1.0 / (2.0 * n * self.c);
        let mut w = vec![0.0; x.n_features()];
        let mut b = 0.0;

        for epoch in 0..self.max_iter {
            // Step decay.
            let eta = self.learning_rate / (1.0 + epoch as f64 * 0.01);
            let prev_w = w.clone();
            let prev_b = b;

            for (row, &sign) in x.rows().zip(signs) {
                let inside = sign * margin(&w, b, row) < 1.0;
                for (wj, xj) in w.iter_mut().zip(row) {
                    let mut gradient = 2.0 * lambda * *wj;
                    if inside {
                        gradient -= sign * xj;
                    }
                    *wj -= eta * gradient;
                }
                if inside {
                    b += eta * sign;
                }
            }

            let change = w
                .iter()
                .zip(&prev_w)
                .map(|(a, p)| (a - p).powi(2))
                .sum::<f64>()
                + (b - prev_b).powi(2);
            if change.sqrt() < self.tol {
                break;
            }
        }
        (w, b)
    }
}

fn margin(w: &[f64], b: f64, row: &[f64]) -> f64 {
    b + w.iter().zip(row).map(|(wi, xi)| wi * xi).sum::<f64>()
}

impl Classifier for LinearSvc {
    fn fit(&mut self, x: &FeatureMatrix, y: &[usize]) -> Result<(), ModelError> {
        let classes = training_classes(x, y)?;
        if classes.len() < 2 {
            return Err(ModelError::TrainingFailed {
                message: format!("needs at least two classes, got {}", classes.len()),
            });
        }
        let targets = encode_labels(&classes, y)?;

        let mut weights = Vec::with_capacity(classes.len());
        let mut bias = Vec::with_capacity(classes.len());
        for class in 0..classes.len() {
            let signs: Vec<f64> = targets
                .iter()
                .map(|&t| if t == class { 1.0 } else { -1.0 })
                .collect();
            let (w, b) = self.fit_binary(x, &signs);
            if !(b.is_finite() && w.iter().all(|v| v.is_finite())) {
                return Err(ModelError::TrainingFailed {
                    message: format!("subgradient descent diverged for class {}", classes[class]),
                });
            }
            weights.push(w);
            bias.push(b);
        }

        self.classes = classes;
        self.weights = weights;
        self.bias = bias;
        Ok(())
    }

    fn predict(&self, x: &FeatureMatrix) -> Result<Vec<usize>, ModelError> {
        Ok(self
            .decision_function(x)?
            .iter()
            .map(|scores| self.classes[argmax(scores)])
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separates_three_classes_on_a_line() {
        let rows: Vec<Vec<f64>> = [-3.0, -2.5, -2.0, 0.0, 0.2, -0.2, 2.0, 2.5, 3.0]
            .iter()
            .map(|v| vec![*v, 1.0])
            .collect();
        let x = FeatureMatrix::from_rows(2, &rows).unwrap();
        let y = vec![0, 0, 0, 1, 1, 1, 2, 2, 2];

        let mut svc = LinearSvc::new(10.0).with_max_iter(2000).with_learning_rate(0.05);
        svc.fit(&x, &y).unwrap();
        let predicted = svc.predict(&x).unwrap();
        // Outer classes are linearly separable from the rest.
        assert_eq!(predicted[0], 0);
        assert_eq!(predicted[8], 2);
    }

    #[test]
    fn rejects_wrong_width_after_fit() {
        let x = FeatureMatrix::from_rows(1, &[vec![-1.0], vec![1.0]]).unwrap();
        let mut svc = LinearSvc::new(1.0);
        svc.fit(&x, &[0, 1]).unwrap();
        let wide = FeatureMatrix::from_rows(2, &[vec![0.0, 0.0]]).unwrap();
        assert!(matches!(
            svc.predict(&wide),
            Err(ModelError::ShapeMismatch { expected: 1, actual: 2 })
        ));
    }
}
